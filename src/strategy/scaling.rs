use crate::config;
use crate::fleet::{FleetView, QualityThresholds, ServerSnapshot};
use crate::orchestrator::ClusterOrchestrator;
use crate::strategy::settings::configurable;
use crate::strategy::{ScalingStrategy, Strategy, StrategyContext};
use act_zero::call;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hysteresis latch for in-flight scale actions. While a requested instance
/// is still starting or stopping, the matching lock keeps the controller
/// from firing again; the membership change (or a timeout) releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingLock {
    Idle,
    ScalingUp,
    ScalingDown,
}

impl fmt::Display for ScalingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalingLock::Idle => "idle",
            ScalingLock::ScalingUp => "scale-up",
            ScalingLock::ScalingDown => "scale-down",
        };

        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ScalingKind {
    /// Partition on raw latency thresholds.
    StaticRatio,
    /// Partition on the blended quality score.
    Quality,
}

/// The fleet-growth control loop. Runs on its own interval; each cycle it
/// checks the scale-up condition first and only considers shrinking when no
/// growth was requested, so the two can never fire together.
pub struct AutoscalingController {
    preset: &'static str,
    latency_partition: bool,
    interval_secs: i64,
    red_ratio: f64,
    scale_up_ratio: f64,
    scale_down_ratio: f64,
    min_servers: i64,
    max_servers: i64,
    dynamic: bool,
    min_step: i64,
    max_step: i64,
    lock_timeout_cycles: i64,
    latency_high: f64,
    latency_low: f64,
    lock: ScalingLock,
    waited_cycles: i64,
}

configurable!(AutoscalingController {
    interval_secs: Long,
    red_ratio: Double,
    scale_up_ratio: Double,
    scale_down_ratio: Double,
    min_servers: Long,
    max_servers: Long,
    dynamic: Boolean,
    min_step: Long,
    max_step: Long,
    lock_timeout_cycles: Long,
    latency_high: Double,
    latency_low: Double,
});

impl AutoscalingController {
    pub fn new(
        kind: ScalingKind,
        config: &config::Scaling,
        thresholds: &QualityThresholds,
    ) -> Self {
        Self {
            preset: match kind {
                ScalingKind::StaticRatio => "static_ratio",
                ScalingKind::Quality => "quality",
            },
            latency_partition: kind == ScalingKind::StaticRatio,
            interval_secs: config.interval.as_secs() as i64,
            red_ratio: config.red_ratio,
            scale_up_ratio: config.scale_up_ratio,
            scale_down_ratio: config.scale_down_ratio,
            min_servers: config.min_servers,
            max_servers: config.max_servers,
            dynamic: config.dynamic,
            min_step: config.min_step,
            max_step: config.max_step,
            lock_timeout_cycles: config.lock_timeout_cycles,
            latency_high: thresholds.latency_high,
            latency_low: thresholds.latency_low,
            lock: ScalingLock::Idle,
            waited_cycles: 0,
        }
    }

    pub fn lock(&self) -> ScalingLock {
        self.lock
    }

    fn is_degraded(&self, server: &ServerSnapshot, quality_threshold: f64) -> bool {
        if self.latency_partition {
            server.has_telemetry && server.average_latency >= self.latency_high
        } else {
            server.has_telemetry
                && server.quality >= quality_threshold * (1.0 + self.scale_up_ratio)
        }
    }

    /// Calm enough to consider shrinking. Servers without telemetry score as
    /// zero load and therefore count as calm.
    fn is_calm(&self, server: &ServerSnapshot, quality_threshold: f64) -> bool {
        if self.latency_partition {
            server.average_latency < self.latency_low
        } else {
            server.quality < quality_threshold * (1.0 - self.scale_down_ratio)
        }
    }

    fn tick_lock(&mut self) {
        if self.lock == ScalingLock::Idle {
            return;
        }

        self.waited_cycles += 1;
        if self.waited_cycles >= self.lock_timeout_cycles {
            warn!(
                "Releasing {} lock after {} cycles without a membership change",
                self.lock, self.waited_cycles
            );
            self.lock = ScalingLock::Idle;
            self.waited_cycles = 0;
        }
    }
}

#[async_trait]
impl Strategy for AutoscalingController {
    fn kind(&self) -> &'static str {
        self.preset
    }

    async fn on_server_register(&mut self, _ctx: &StrategyContext, server: &str) {
        if self.lock == ScalingLock::ScalingUp {
            info!("Server {} registered, releasing the scale-up lock", server);
            self.lock = ScalingLock::Idle;
            self.waited_cycles = 0;
        }
    }

    async fn on_server_unregister(&mut self, _ctx: &StrategyContext, server: &str) {
        if self.lock == ScalingLock::ScalingDown {
            info!(
                "Server {} unregistered, releasing the scale-down lock",
                server
            );
            self.lock = ScalingLock::Idle;
            self.waited_cycles = 0;
        }
    }
}

#[async_trait]
impl ScalingStrategy for AutoscalingController {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1) as u64)
    }

    #[tracing::instrument(name = "AutoscalingController::execute", skip(self, ctx))]
    async fn execute(&mut self, ctx: &StrategyContext) {
        self.tick_lock();

        let view = match call!(ctx.fleet.fleet_view()).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Failed to build the fleet view: {:?}", e);
                return;
            }
        };

        if view.is_empty() {
            info!("Waiting for servers before running the scaling cycle");
            return;
        }

        let size = view.len() as i64;
        let quality_threshold = view.quality_threshold;
        let degraded = view
            .servers
            .iter()
            .filter(|s| self.is_degraded(s, quality_threshold))
            .count() as i64;
        let red_servers = (self.red_ratio * size as f64).round() as i64;

        info!(
            "Servers with degraded performance: {} of {}, {} needed for scale-up",
            degraded, size, red_servers
        );

        if degraded >= red_servers && degraded > 0 {
            if self.lock != ScalingLock::Idle {
                info!(
                    "Scale action already in flight ({}), skipping scale-up",
                    self.lock
                );
            } else if size >= self.max_servers {
                info!("Fleet already at the {} server limit", self.max_servers);
            } else {
                let replicas = if self.dynamic {
                    Some(red_servers.max(self.min_step).min(self.max_step) as u32)
                } else {
                    None
                };

                info!("Scaling up {} server(s)", replicas.unwrap_or(1));
                match call!(ctx.orchestrator.scale_up(replicas)).await {
                    Ok(true) => {
                        self.lock = ScalingLock::ScalingUp;
                        self.waited_cycles = 0;
                    }
                    outcome => warn!("Scale-up request failed: {:?}", outcome),
                }
            }

            // Growth takes precedence; never shrink in the same cycle.
            return;
        }

        if self.lock != ScalingLock::Idle {
            info!(
                "Scale action already in flight ({}), skipping scale-down",
                self.lock
            );
            return;
        }

        if size <= self.min_servers {
            debug!(
                "Fleet at {} servers, scale-down needs more than {}",
                size, self.min_servers
            );
            return;
        }

        if !view
            .servers
            .iter()
            .all(|s| self.is_calm(s, quality_threshold))
        {
            debug!("No scale-down needed");
            return;
        }

        let servers_down = ((self.scale_down_ratio * size as f64).round() as i64).max(1) as usize;
        let mut victims = least_loaded(&view, servers_down);
        if !self.dynamic {
            victims.truncate(1);
        }

        info!("Scaling down {} server(s)", victims.len());

        let mut initiated = false;
        for victim in victims {
            match call!(ctx.orchestrator.delete_server(victim.clone())).await {
                Ok(true) => {
                    info!("Requested deletion of server {}", victim);
                    initiated = true;
                }
                outcome => warn!("Deletion request for {} failed: {:?}", victim, outcome),
            }
        }

        if initiated {
            self.lock = ScalingLock::ScalingDown;
            self.waited_cycles = 0;
        }
    }
}

/// The `count` servers with the fewest connected players, fewest first.
/// Partitions instead of sorting the whole fleet.
fn least_loaded(view: &FleetView, count: usize) -> Vec<String> {
    let mut candidates: Vec<&ServerSnapshot> = view.servers.iter().collect();
    let count = count.min(candidates.len());
    if count == 0 {
        return Vec::new();
    }

    if count < candidates.len() {
        candidates.select_nth_unstable_by(count - 1, |a, b| a.players.cmp(&b.players));
        candidates.truncate(count);
    }
    candidates.sort_by_key(|s| s.players);

    candidates.into_iter().map(|s| s.name.clone()).collect()
}
