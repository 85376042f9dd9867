use crate::config;
use crate::fleet::{QualityThresholds, ServerSnapshot};
use crate::router::Router;
use crate::strategy::settings::configurable;
use crate::strategy::{RebalancingStrategy, Strategy, StrategyContext};
use act_zero::call;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RebalanceKind {
    /// Latency-threshold partition, one pair per cycle.
    StaticRatio,
    /// Quality partition, one worst/best pair per cycle.
    QualityDriven,
    /// Quality partition, every degraded server paired in one cycle.
    MultiPair,
}

/// Flattens load by moving connections between running servers. Fleet size
/// is never touched here; growth and shrink belong to the scaling loop,
/// which runs on its own cadence.
pub struct Rebalancer {
    kind: RebalanceKind,
    interval_secs: i64,
    band: f64,
    max_players_per_cycle: i64,
    min_servers: i64,
    transfer_retries: i64,
    latency_high: f64,
}

configurable!(Rebalancer {
    interval_secs: Long,
    band: Double,
    max_players_per_cycle: Long,
    min_servers: Long,
    transfer_retries: Long,
    latency_high: Double,
});

impl Rebalancer {
    pub fn new(
        kind: RebalanceKind,
        config: &config::Rebalancing,
        thresholds: &QualityThresholds,
    ) -> Self {
        Self {
            kind,
            interval_secs: config.interval.as_secs() as i64,
            band: config.band,
            max_players_per_cycle: config.max_players_per_cycle,
            min_servers: config.min_servers,
            transfer_retries: config.transfer_retries,
            latency_high: thresholds.latency_high,
        }
    }

    fn latency_partition(&self) -> bool {
        self.kind == RebalanceKind::StaticRatio
    }

    fn is_degraded(&self, server: &ServerSnapshot, quality_threshold: f64) -> bool {
        if self.latency_partition() {
            server.has_telemetry && server.average_latency >= self.latency_high
        } else {
            server.has_telemetry && server.quality >= quality_threshold
        }
    }

    /// Pick the healthy target this preset favors.
    fn pick_best<'a>(&self, healthy: &[&'a ServerSnapshot]) -> Option<&'a ServerSnapshot> {
        match self.kind {
            RebalanceKind::StaticRatio => healthy
                .iter()
                .copied()
                .min_by(|a, b| a.average_latency.total_cmp(&b.average_latency)),
            RebalanceKind::QualityDriven => healthy
                .iter()
                .copied()
                .min_by(|a, b| a.quality.total_cmp(&b.quality)),
            RebalanceKind::MultiPair => healthy.iter().copied().min_by_key(|s| s.players),
        }
    }

    async fn pair(
        &self,
        ctx: &StrategyContext,
        worst: &ServerSnapshot,
        best: &ServerSnapshot,
        ideal_players: i64,
    ) {
        if worst.name == best.name {
            info!("No transfer possible, best and worst are the same server");
            return;
        }

        let band_limit = (ideal_players as f64 * (1.0 + self.band)).round() as i64;

        let (mut to_move, mut headroom) = if self.latency_partition() {
            (
                worst.players as i64 - ideal_players,
                band_limit - best.players as i64,
            )
        } else {
            (
                (ideal_players - worst.players as i64).abs(),
                (band_limit - best.players as i64).abs(),
            )
        };

        if !self.latency_partition() {
            // A server can be balanced by count yet still degraded by
            // latency; drop the count caps so latency alone keeps driving
            // the migration.
            if to_move == 0 {
                to_move = i64::MAX;
            }
            if headroom == 0 {
                headroom = i64::MAX;
            }
        }

        let count = to_move.min(headroom).min(self.max_players_per_cycle);
        if count <= 0 {
            info!(
                "Not possible to transfer connections from {} to {}",
                worst.name, best.name
            );
            return;
        }

        debug!(
            "Trying to move {} connections from {} (space for {} on {})",
            to_move, worst.name, headroom, best.name
        );

        let connections = call!(ctx.router.connections_on(worst.name.clone()))
            .await
            .unwrap_or_default();

        let mut moved = 0;
        for connection in connections.into_iter().take(count as usize) {
            let initiation = call!(ctx.transfers.transfer(
                connection.clone(),
                best.name.clone(),
                self.transfer_retries.max(0) as u32
            ))
            .await;

            match initiation {
                Ok(()) => moved += 1,
                Err(e) => warn!("Failed to initiate transfer of {}: {:?}", connection, e),
            }
        }

        info!(
            "Moved {} connections from {} to {}",
            moved, worst.name, best.name
        );
    }
}

#[async_trait]
impl Strategy for Rebalancer {
    fn kind(&self) -> &'static str {
        match self.kind {
            RebalanceKind::StaticRatio => "static_ratio",
            RebalanceKind::QualityDriven => "quality_driven",
            RebalanceKind::MultiPair => "multi_pair",
        }
    }
}

#[async_trait]
impl RebalancingStrategy for Rebalancer {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1) as u64)
    }

    #[tracing::instrument(name = "Rebalancer::execute", skip(self, ctx))]
    async fn execute(&mut self, ctx: &StrategyContext) {
        let view = match call!(ctx.fleet.fleet_view()).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Failed to build the fleet view: {:?}", e);
                return;
            }
        };

        if view.is_empty() {
            info!("Waiting for servers before running the rebalancing cycle");
            return;
        }

        if (view.len() as i64) < self.min_servers {
            info!("Not enough servers for connection rebalancing");
        }

        let total_players = view.total_players();
        if total_players == 0 {
            info!("Waiting for players...");
            return;
        }

        let ideal_players = (total_players / view.len()) as i64;
        info!("Average players per server is {}", ideal_players);

        let quality_threshold = view.quality_threshold;
        let band_limit = ideal_players as f64 * (1.0 + self.band);

        let mut degraded: Vec<&ServerSnapshot> = view
            .servers
            .iter()
            .filter(|s| self.is_degraded(s, quality_threshold))
            .collect();
        let healthy: Vec<&ServerSnapshot> = view
            .servers
            .iter()
            .filter(|s| {
                !self.is_degraded(s, quality_threshold) && (s.players as f64) <= band_limit
            })
            .collect();

        if degraded.is_empty() {
            info!("No degraded servers found");
            return;
        }
        if healthy.is_empty() {
            info!("No healthy servers able to take connections");
            return;
        }

        // Worst first.
        if self.latency_partition() {
            degraded.sort_by(|a, b| b.players.cmp(&a.players));
        } else {
            degraded.sort_by(|a, b| b.quality.total_cmp(&a.quality));
        }

        let pairings: &[&ServerSnapshot] = if self.kind == RebalanceKind::MultiPair {
            &degraded
        } else {
            &degraded[..1]
        };

        for worst in pairings {
            match self.pick_best(&healthy) {
                Some(best) => self.pair(ctx, worst, best, ideal_players).await,
                None => info!("No healthy servers able to take connections"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testkit::{self, TestFleet};
    use act_zero::call;
    use std::collections::HashMap;

    fn rebalancing_config() -> config::Rebalancing {
        config::Rebalancing {
            strategy: "quality_driven".into(),
            interval: Duration::from_secs(60),
            band: 0.2,
            max_players_per_cycle: 5,
            min_servers: 2,
            transfer_retries: 3,
        }
    }

    fn rebalancer(kind: RebalanceKind) -> Rebalancer {
        Rebalancer::new(kind, &rebalancing_config(), &testkit::test_thresholds())
    }

    async fn counts(fleet: &TestFleet) -> HashMap<String, usize> {
        call!(fleet.router.connection_counts()).await.unwrap()
    }

    #[tokio::test]
    async fn moves_connections_from_worst_to_best_capped_per_cycle() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 20, Some((50.0, 0))).await;
        testkit::add_server(&fleet, "beta", 4, Some((1.0, 0))).await;

        rebalancer(RebalanceKind::QualityDriven)
            .execute(&fleet.ctx)
            .await;

        // ideal = 12; raw difference is 8 but the cycle cap of 5 wins.
        let counts = counts(&fleet).await;
        assert_eq!(Some(&15), counts.get("alpha"));
        assert_eq!(Some(&9), counts.get("beta"));
    }

    #[tokio::test]
    async fn balanced_counts_still_migrate_when_latency_is_degraded() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 12, Some((50.0, 0))).await;
        testkit::add_server(&fleet, "beta", 12, Some((1.0, 0))).await;

        rebalancer(RebalanceKind::QualityDriven)
            .execute(&fleet.ctx)
            .await;

        // ideal = 12, so the raw difference is zero; the band headroom of
        // round(14.4) - 12 = 2 drives the move instead.
        let counts = counts(&fleet).await;
        assert_eq!(Some(&10), counts.get("alpha"));
        assert_eq!(Some(&14), counts.get("beta"));
    }

    #[tokio::test]
    async fn healthy_fleets_are_left_alone() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 20, Some((1.0, 0))).await;
        testkit::add_server(&fleet, "beta", 4, Some((1.0, 0))).await;

        rebalancer(RebalanceKind::QualityDriven)
            .execute(&fleet.ctx)
            .await;

        let counts = counts(&fleet).await;
        assert_eq!(Some(&20), counts.get("alpha"));
        assert_eq!(Some(&4), counts.get("beta"));
    }

    #[tokio::test]
    async fn degraded_fleet_without_healthy_targets_is_a_no_op() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 10, Some((50.0, 0))).await;

        rebalancer(RebalanceKind::QualityDriven)
            .execute(&fleet.ctx)
            .await;

        assert_eq!(Some(&10), counts(&fleet).await.get("alpha"));
    }

    #[tokio::test]
    async fn multi_pair_drains_every_degraded_server_in_one_cycle() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 10, Some((50.0, 0))).await;
        testkit::add_server(&fleet, "beta", 8, Some((50.0, 0))).await;
        testkit::add_server(&fleet, "gamma", 0, Some((1.0, 0))).await;

        rebalancer(RebalanceKind::MultiPair).execute(&fleet.ctx).await;

        // ideal = 6: alpha sheds 4, beta sheds 2, both into gamma.
        let counts = counts(&fleet).await;
        assert_eq!(Some(&6), counts.get("alpha"));
        assert_eq!(Some(&6), counts.get("beta"));
        assert_eq!(Some(&6), counts.get("gamma"));
    }

    #[tokio::test]
    async fn static_ratio_uses_raw_latency_and_signed_differences() {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 6, Some((50.0, 0))).await;
        testkit::add_server(&fleet, "beta", 8, Some((1.0, 0))).await;

        rebalancer(RebalanceKind::StaticRatio).execute(&fleet.ctx).await;

        // alpha is degraded but under the ideal of 7; the signed difference
        // is negative, so nothing moves.
        let counts = counts(&fleet).await;
        assert_eq!(Some(&6), counts.get("alpha"));
        assert_eq!(Some(&8), counts.get("beta"));
    }
}
