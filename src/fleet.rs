pub mod health;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use health::FleetHealthModel;

/// Coefficients blending the per-server load signals into one scalar.
/// Lower quality is healthier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub time_weight: f64,
    pub player_weight: f64,
    pub resource_weight: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            time_weight: 5.0,
            player_weight: 1.0,
            resource_weight: 2.0,
        }
    }
}

impl QualityWeights {
    pub fn quality(&self, average_latency: f64, players: usize, owned_resources: i64) -> f64 {
        average_latency * self.time_weight
            + players as f64 * self.player_weight
            + owned_resources as f64 * self.resource_weight
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Latency above which a server counts as struggling.
    pub latency_high: f64,
    /// Latency below which a server counts as idle.
    pub latency_low: f64,
    pub ideal_players: u32,
    /// Expected owned resources per connected player.
    pub resource_per_player: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            latency_high: 40.0,
            latency_low: 10.0,
            ideal_players: 40,
            resource_per_player: 256.0,
        }
    }
}

impl QualityThresholds {
    /// The quality value at which a server is considered degraded: the score
    /// of a server running at `latency_high` with the ideal player count and
    /// the resources those players are expected to own.
    pub fn quality_threshold(&self, weights: &QualityWeights) -> f64 {
        self.latency_high * weights.time_weight
            + self.ideal_players as f64 * weights.player_weight
            + self.ideal_players as f64 * self.resource_per_player * weights.resource_weight
    }
}

/// Point-in-time picture of one server. Rebuilt wholesale every reporting
/// interval, never mutated in place.
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub name: String,
    pub players: usize,
    pub average_latency: f64,
    pub throughput: f32,
    pub owned_resources: i64,
    pub alive: bool,
    /// False when the server has never delivered a report; such servers are
    /// scored as zero-load, not excluded.
    pub has_telemetry: bool,
    pub quality: f64,
    pub degraded: bool,
}

/// All registered servers at decision time. Built fresh per decision cycle
/// and thrown away afterwards; ordering carries no meaning.
#[derive(Debug, Clone)]
pub struct FleetView {
    pub servers: Vec<ServerSnapshot>,
    pub quality_threshold: f64,
    pub taken_at: DateTime<Utc>,
}

impl FleetView {
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn degraded_count(&self) -> usize {
        self.servers.iter().filter(|s| s.degraded).count()
    }

    pub fn total_players(&self) -> usize {
        self.servers.iter().map(|s| s.players).sum()
    }

    pub fn average_players(&self) -> usize {
        self.total_players() / self.len().max(1)
    }

    pub fn get(&self, name: &str) -> Option<&ServerSnapshot> {
        self.servers.iter().find(|s| s.name == name)
    }
}
