use crate::config;
use crate::fleet::{FleetView, QualityWeights, ServerSnapshot};
use crate::strategy::settings::configurable;
use crate::strategy::{PlacementStrategy, Strategy, StrategyContext};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PlacementKind {
    Random,
    LowestPlayers,
    LowestLatency,
    WeightedQuality,
}

pub fn build(
    kind: PlacementKind,
    config: &config::Placement,
    weights: &QualityWeights,
) -> Box<dyn PlacementStrategy> {
    match kind {
        PlacementKind::Random => Box::new(RandomPlacement),
        PlacementKind::LowestPlayers => Box::new(LowestPlayersPlacement),
        PlacementKind::LowestLatency => Box::new(LowestLatencyPlacement),
        PlacementKind::WeightedQuality => Box::new(WeightedQualityPlacement {
            time_weight: weights.time_weight,
            player_weight: weights.player_weight,
            use_cached_quality: config.use_cached_quality,
        }),
    }
}

/// Uniform choice among all registered servers.
pub struct RandomPlacement;

configurable!(RandomPlacement {});

#[async_trait]
impl Strategy for RandomPlacement {
    fn kind(&self) -> &'static str {
        "random"
    }
}

#[async_trait]
impl PlacementStrategy for RandomPlacement {
    async fn select(
        &mut self,
        _ctx: &StrategyContext,
        view: &FleetView,
        _connection: &str,
    ) -> Option<String> {
        view.servers
            .choose(&mut rand::thread_rng())
            .map(|s| s.name.clone())
    }
}

/// Fewest connected players wins; ties go to the first candidate seen.
pub struct LowestPlayersPlacement;

configurable!(LowestPlayersPlacement {});

#[async_trait]
impl Strategy for LowestPlayersPlacement {
    fn kind(&self) -> &'static str {
        "lowest_players"
    }
}

#[async_trait]
impl PlacementStrategy for LowestPlayersPlacement {
    async fn select(
        &mut self,
        _ctx: &StrategyContext,
        view: &FleetView,
        _connection: &str,
    ) -> Option<String> {
        let mut best: Option<&ServerSnapshot> = None;

        for server in &view.servers {
            if best.map_or(true, |b| server.players < b.players) {
                best = Some(server);
            }
        }

        best.map(|s| s.name.clone())
    }
}

/// Lowest average latency among servers that are alive and actually report
/// telemetry. A server without a timer is excluded here, not scored as
/// zero-latency.
pub struct LowestLatencyPlacement;

configurable!(LowestLatencyPlacement {});

#[async_trait]
impl Strategy for LowestLatencyPlacement {
    fn kind(&self) -> &'static str {
        "lowest_latency"
    }
}

#[async_trait]
impl PlacementStrategy for LowestLatencyPlacement {
    async fn select(
        &mut self,
        _ctx: &StrategyContext,
        view: &FleetView,
        _connection: &str,
    ) -> Option<String> {
        let mut best: Option<&ServerSnapshot> = None;

        for server in &view.servers {
            if !server.alive || !server.has_telemetry {
                continue;
            }

            if best.map_or(true, |b| server.average_latency < b.average_latency) {
                best = Some(server);
            }
        }

        best.map(|s| s.name.clone())
    }
}

/// Lowest `latency * time_weight + players * player_weight`. With
/// `use_cached_quality` the score comes straight from the snapshot instead,
/// amortizing the scoring across many placements in the same cycle.
pub struct WeightedQualityPlacement {
    time_weight: f64,
    player_weight: f64,
    use_cached_quality: bool,
}

configurable!(WeightedQualityPlacement {
    time_weight: Double,
    player_weight: Double,
    use_cached_quality: Boolean,
});

#[async_trait]
impl Strategy for WeightedQualityPlacement {
    fn kind(&self) -> &'static str {
        "weighted_quality"
    }
}

#[async_trait]
impl PlacementStrategy for WeightedQualityPlacement {
    async fn select(
        &mut self,
        _ctx: &StrategyContext,
        view: &FleetView,
        _connection: &str,
    ) -> Option<String> {
        let mut best: Option<(&ServerSnapshot, f64)> = None;

        for server in &view.servers {
            if !server.alive || !server.has_telemetry {
                continue;
            }

            let score = if self.use_cached_quality {
                server.quality
            } else {
                server.average_latency * self.time_weight
                    + server.players as f64 * self.player_weight
            };

            if best.map_or(true, |(_, b)| score < b) {
                best = Some((server, score));
            }
        }

        if let Some((server, score)) = best {
            debug!(
                "Best placement score {} for server {}",
                score.round(),
                server.name
            );
        }

        best.map(|(s, _)| s.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testkit;
    use chrono::Utc;

    fn snapshot(name: &str, players: usize, latency: f64) -> ServerSnapshot {
        ServerSnapshot {
            name: name.into(),
            players,
            average_latency: latency,
            throughput: 0.0,
            owned_resources: 0,
            alive: true,
            has_telemetry: true,
            quality: latency * 5.0 + players as f64,
            degraded: false,
        }
    }

    fn view(servers: Vec<ServerSnapshot>) -> FleetView {
        FleetView {
            servers,
            quality_threshold: 240.0,
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn lowest_players_breaks_ties_towards_the_first_candidate() {
        let fleet = testkit::fleet().await;
        let mut strategy = LowestPlayersPlacement;

        let view = view(vec![
            snapshot("alpha", 3, 10.0),
            snapshot("beta", 2, 10.0),
            snapshot("gamma", 2, 10.0),
        ]);

        assert_eq!(
            Some("beta".to_string()),
            strategy.select(&fleet.ctx, &view, "conn-1").await
        );
    }

    #[tokio::test]
    async fn lowest_latency_skips_servers_without_telemetry() {
        let fleet = testkit::fleet().await;
        let mut strategy = LowestLatencyPlacement;

        let mut quiet = snapshot("quiet", 0, 0.0);
        quiet.has_telemetry = false;

        let view = view(vec![
            quiet,
            snapshot("alpha", 10, 25.0),
            snapshot("beta", 10, 15.0),
        ]);

        assert_eq!(
            Some("beta".to_string()),
            strategy.select(&fleet.ctx, &view, "conn-1").await
        );
    }

    #[tokio::test]
    async fn weighted_quality_picks_the_lowest_score() {
        let fleet = testkit::fleet().await;
        let mut strategy = WeightedQualityPlacement {
            time_weight: 5.0,
            player_weight: 1.0,
            use_cached_quality: false,
        };

        // alpha: 10 * 5 + 40 = 90, beta: 15 * 5 + 5 = 80
        let view = view(vec![snapshot("alpha", 40, 10.0), snapshot("beta", 5, 15.0)]);

        assert_eq!(
            Some("beta".to_string()),
            strategy.select(&fleet.ctx, &view, "conn-1").await
        );
    }

    #[tokio::test]
    async fn cached_quality_uses_the_snapshot_score() {
        let fleet = testkit::fleet().await;
        let mut strategy = WeightedQualityPlacement {
            time_weight: 5.0,
            player_weight: 1.0,
            use_cached_quality: true,
        };

        let mut alpha = snapshot("alpha", 40, 10.0);
        alpha.quality = 1.0;
        let view = view(vec![alpha, snapshot("beta", 5, 15.0)]);

        assert_eq!(
            Some("alpha".to_string()),
            strategy.select(&fleet.ctx, &view, "conn-1").await
        );
    }

    #[tokio::test]
    async fn random_selects_a_registered_server() {
        let fleet = testkit::fleet().await;
        let mut strategy = RandomPlacement;

        let view = view(vec![snapshot("alpha", 1, 1.0), snapshot("beta", 2, 2.0)]);
        let selected = strategy.select(&fleet.ctx, &view, "conn-1").await.unwrap();
        assert!(["alpha", "beta"].contains(&selected.as_str()));
    }

    #[tokio::test]
    async fn empty_fleets_place_nothing() {
        let fleet = testkit::fleet().await;
        let empty = view(vec![]);

        assert_eq!(
            None,
            RandomPlacement.select(&fleet.ctx, &empty, "conn-1").await
        );
        assert_eq!(
            None,
            LowestPlayersPlacement
                .select(&fleet.ctx, &empty, "conn-1")
                .await
        );
        assert_eq!(
            None,
            LowestLatencyPlacement
                .select(&fleet.ctx, &empty, "conn-1")
                .await
        );
    }
}
