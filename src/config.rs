//! Configuration surface.
//!
//! Loaded once at startup from the file named by `APP_CONFIG` (fallback
//! `config.yml`); every section has defaults so a missing file yields a
//! runnable standalone setup.
//!
//! The scaling and rebalancing strategy names select behavior presets:
//!
//! * scaling `static_ratio` — partitions on raw latency against
//!   `thresholds.latency_high` / `latency_low`.
//! * scaling `quality` — partitions on the blended quality score; the
//!   historical tuning widened the degraded margin with
//!   `scale_up_ratio: 0.3`, the default of `0.0` uses the bare threshold.
//! * rebalancing `static_ratio` — latency partition, single pair, signed
//!   player differences.
//! * rebalancing `quality_driven` — quality partition, single worst/best
//!   pair per cycle.
//! * rebalancing `multi_pair` — quality partition, every degraded server
//!   paired in one cycle.

use crate::fleet::{QualityThresholds, QualityWeights};
use crate::AppConfig;
use anyhow::Context;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub quality: Quality,
    pub telemetry: Telemetry,
    pub placement: Placement,
    pub scaling: Scaling,
    pub rebalancing: Rebalancing,
    pub drain: Drain,
    pub transfer: Transfer,
    pub drain_server: DrainServer,
    pub orchestrator: Orchestrator,
    pub router: RouterConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Quality {
    pub weights: QualityWeights,
    pub thresholds: QualityThresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Samples kept per server; consumed once at process start.
    pub window_size: usize,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { window_size: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub strategy: String,
    /// Score candidates from the latest health snapshot instead of
    /// recomputing per placement (weighted_quality only).
    pub use_cached_quality: bool,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            strategy: "lowest_latency".into(),
            use_cached_quality: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scaling {
    pub strategy: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Degraded share of the fleet that triggers a scale-up.
    pub red_ratio: f64,
    /// Extra margin on the degraded threshold (quality preset).
    pub scale_up_ratio: f64,
    /// Hysteresis band below the threshold required before shrinking, and
    /// the share of the fleet removed per shrink.
    pub scale_down_ratio: f64,
    pub min_servers: i64,
    pub max_servers: i64,
    /// Size scale-up requests from the fleet instead of one at a time.
    pub dynamic: bool,
    pub min_step: i64,
    pub max_step: i64,
    /// Cycles an in-flight scale action may wait for its membership change
    /// before the lock is released.
    pub lock_timeout_cycles: i64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            strategy: "quality".into(),
            interval: Duration::from_secs(2 * 60),
            red_ratio: 0.6,
            scale_up_ratio: 0.0,
            scale_down_ratio: 0.3,
            min_servers: 2,
            max_servers: 10,
            dynamic: false,
            min_step: 2,
            max_step: 5,
            lock_timeout_cycles: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rebalancing {
    pub strategy: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Tolerated player-count overshoot on a transfer target, as a share of
    /// the fleet average.
    pub band: f64,
    pub max_players_per_cycle: i64,
    pub min_servers: i64,
    pub transfer_retries: i64,
}

impl Default for Rebalancing {
    fn default() -> Self {
        Self {
            strategy: "quality_driven".into(),
            interval: Duration::from_secs(60),
            band: 0.2,
            max_players_per_cycle: 5,
            min_servers: 5,
            transfer_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Drain {
    pub strategy: String,
    pub transfer_retries: i64,
}

impl Default for Drain {
    fn default() -> Self {
        Self {
            strategy: "default".into(),
            transfer_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Transfer {
    /// First retry delay; doubles on every further attempt.
    #[serde(with = "humantime_serde")]
    pub retry_base: Duration,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrainServer {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DrainServer {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8580,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Orchestrator {
    Mock,
    Http { address: String },
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::Mock
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RouterConfig {
    Memory,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::Memory
    }
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    use std::env;
    use tracing::info;

    let config = match env::var("APP_CONFIG") {
        Ok(path) => read_config(&path)?,
        Err(_) => {
            if Path::new("config.yml").exists() {
                read_config("config.yml")?
            } else {
                info!("Missing APP_CONFIG env var and no config.yml, using defaults");
                Config::default()
            }
        }
    };

    Ok(Arc::new(config))
}

fn read_config(path: &str) -> anyhow::Result<Config> {
    let file =
        File::open(path).with_context(|| format!("Failed to open config file {}", path))?;

    Ok(serde_yaml::from_reader(BufReader::new(file))?)
}
