use crate::actor;
use crate::fleet::{FleetView, QualityThresholds, QualityWeights, ServerSnapshot};
use crate::latency::RollingLatencyTimer;
use crate::router::Router;
use crate::telemetry::{TelemetryObserver, TelemetryReport};
use act_zero::{call, Actor, ActorError, ActorResult, Addr, Produces};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

struct ServerTelemetry {
    timer: RollingLatencyTimer,
    throughput: f32,
    owned_resources: i64,
    alive: bool,
    /// A timer exists from registration on, but the server only counts as
    /// covered by telemetry once the first report lands.
    reported: bool,
}

impl ServerTelemetry {
    fn new() -> Self {
        Self {
            timer: RollingLatencyTimer::new(),
            throughput: 0.0,
            owned_resources: 0,
            alive: true,
            reported: false,
        }
    }
}

/// Holds the per-server telemetry state and turns it into snapshots on
/// demand. Membership comes from the router; a registered server that has
/// not reported yet is scored as healthy and unloaded, never treated as an
/// error.
pub struct FleetHealthModel {
    router: Addr<dyn Router>,
    weights: QualityWeights,
    thresholds: QualityThresholds,
    servers: HashMap<String, ServerTelemetry>,
}

impl FleetHealthModel {
    pub fn new(
        router: Addr<dyn Router>,
        weights: QualityWeights,
        thresholds: QualityThresholds,
    ) -> Self {
        Self {
            router,
            weights,
            thresholds,
            servers: HashMap::new(),
        }
    }
}

impl fmt::Display for FleetHealthModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FleetHealthModel")
    }
}

impl fmt::Debug for FleetHealthModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[async_trait]
impl Actor for FleetHealthModel {
    #[tracing::instrument(name = "FleetHealthModel::started", skip(self, _addr))]
    async fn started(&mut self, _addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started");

        Produces::ok(())
    }

    async fn error(&mut self, error: ActorError) -> bool {
        actor::handle_error(error)
    }
}

#[async_trait]
impl TelemetryObserver for FleetHealthModel {
    async fn observe_report(
        &mut self,
        server: String,
        report: TelemetryReport,
    ) -> ActorResult<()> {
        let entry = self
            .servers
            .entry(server)
            .or_insert_with(ServerTelemetry::new);

        entry.timer.append(report.latency_ms);
        entry.throughput = report.throughput;
        entry.owned_resources = report.owned_resources;
        entry.alive = true;
        entry.reported = true;

        Produces::ok(())
    }
}

impl FleetHealthModel {
    /// Creates the server's latency timer. Called when the server joins the
    /// fleet; reports that arrived earlier already created one.
    pub async fn server_registered(&mut self, server: String) -> ActorResult<()> {
        self.servers
            .entry(server)
            .or_insert_with(ServerTelemetry::new);

        Produces::ok(())
    }

    /// Drops the server's telemetry state along with its timer.
    pub async fn server_unregistered(&mut self, server: String) -> ActorResult<()> {
        self.servers.remove(&server);

        Produces::ok(())
    }

    /// Flags a server whose ingress connection went quiet. It keeps its
    /// timer but is reported as if it had no telemetry until it speaks up
    /// again.
    pub async fn set_alive(&mut self, server: String, alive: bool) -> ActorResult<()> {
        if let Some(entry) = self.servers.get_mut(&server) {
            entry.alive = alive;
        }

        Produces::ok(())
    }

    #[tracing::instrument(name = "FleetHealthModel::snapshot", skip(self))]
    pub async fn snapshot(&mut self, server: String) -> ActorResult<ServerSnapshot> {
        let players = call!(self.router.connections_on(server.clone()))
            .await
            .map(|connections| connections.len())
            .unwrap_or(0);

        Produces::ok(self.make_snapshot(&server, players))
    }

    /// Builds a fresh view of every server currently in rotation. Never
    /// cached across cycles.
    #[tracing::instrument(name = "FleetHealthModel::fleet_view", skip(self))]
    pub async fn fleet_view(&mut self) -> ActorResult<FleetView> {
        let names = call!(self.router.server_names()).await?;
        let counts = call!(self.router.connection_counts()).await?;

        let servers = names
            .iter()
            .map(|name| self.make_snapshot(name, counts.get(name).copied().unwrap_or(0)))
            .collect();

        Produces::ok(FleetView {
            servers,
            quality_threshold: self.thresholds.quality_threshold(&self.weights),
            taken_at: Utc::now(),
        })
    }

    fn make_snapshot(&self, name: &str, players: usize) -> ServerSnapshot {
        let threshold = self.thresholds.quality_threshold(&self.weights);

        match self.servers.get(name).filter(|t| t.alive && t.reported) {
            Some(telemetry) => {
                let average_latency = telemetry.timer.average();
                let quality =
                    self.weights
                        .quality(average_latency, players, telemetry.owned_resources);

                ServerSnapshot {
                    name: name.to_owned(),
                    players,
                    average_latency,
                    throughput: telemetry.throughput,
                    owned_resources: telemetry.owned_resources,
                    alive: true,
                    has_telemetry: true,
                    quality,
                    degraded: quality >= threshold,
                }
            }
            None => {
                warn!(
                    "No telemetry for server {}; assuming healthy and unloaded",
                    name
                );

                ServerSnapshot {
                    name: name.to_owned(),
                    players,
                    average_latency: 0.0,
                    throughput: 0.0,
                    owned_resources: 0,
                    alive: false,
                    has_telemetry: false,
                    quality: 0.0,
                    degraded: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency;
    use crate::router::InMemoryRouter;
    use act_zero::runtimes::tokio::spawn_actor;
    use act_zero::upcast;

    fn test_weights() -> QualityWeights {
        QualityWeights {
            time_weight: 5.0,
            player_weight: 1.0,
            resource_weight: 0.0,
        }
    }

    async fn fill_reports(health: &Addr<FleetHealthModel>, server: &str, latency_ms: f64) {
        for _ in 0..latency::window_size() {
            call!(health.observe_report(
                server.to_owned(),
                TelemetryReport {
                    latency_ms,
                    throughput: 20.0,
                    owned_resources: 0,
                }
            ))
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn scores_reporting_servers_and_flags_degradation() {
        let router = spawn_actor(InMemoryRouter::new());
        let health = spawn_actor(FleetHealthModel::new(
            upcast!(router.clone()),
            test_weights(),
            QualityThresholds::default(),
        ));

        for name in ["alpha", "beta"] {
            call!(router.add_server(name.into())).await.unwrap();
            call!(health.server_registered(name.into())).await.unwrap();
        }
        for i in 0..10 {
            call!(router.open_connection(format!("conn-{}", i), "alpha".into()))
                .await
                .unwrap();
        }

        fill_reports(&health, "alpha", 50.0).await;
        fill_reports(&health, "beta", 5.0).await;

        let view = call!(health.fleet_view()).await.unwrap();
        assert_eq!(2, view.len());

        // threshold = 40 * 5 + 40 * 1 = 240 with zero resource weight
        let alpha = view.get("alpha").unwrap();
        assert!((alpha.quality - (50.0 * 5.0 + 10.0)).abs() < 1e-9);
        assert!(alpha.degraded);

        let beta = view.get("beta").unwrap();
        assert!((beta.quality - 25.0).abs() < 1e-9);
        assert!(!beta.degraded);
    }

    #[tokio::test]
    async fn missing_telemetry_reads_as_healthy_zero_load() {
        let router = spawn_actor(InMemoryRouter::new());
        let health = spawn_actor(FleetHealthModel::new(
            upcast!(router.clone()),
            test_weights(),
            QualityThresholds::default(),
        ));

        call!(router.add_server("quiet".into())).await.unwrap();
        call!(health.server_registered("quiet".into())).await.unwrap();
        call!(router.open_connection("conn-1".into(), "quiet".into()))
            .await
            .unwrap();
        call!(health.set_alive("quiet".into(), false)).await.unwrap();

        let snapshot = call!(health.snapshot("quiet".into())).await.unwrap();
        assert_eq!(0.0, snapshot.quality);
        assert!(!snapshot.degraded);
        assert!(!snapshot.has_telemetry);
        assert_eq!(1, snapshot.players);
    }

    #[tokio::test]
    async fn unregistering_discards_the_timer() {
        let router = spawn_actor(InMemoryRouter::new());
        let health = spawn_actor(FleetHealthModel::new(
            upcast!(router.clone()),
            test_weights(),
            QualityThresholds::default(),
        ));

        call!(router.add_server("alpha".into())).await.unwrap();
        call!(health.server_registered("alpha".into())).await.unwrap();
        fill_reports(&health, "alpha", 30.0).await;

        call!(health.server_unregistered("alpha".into())).await.unwrap();
        call!(health.server_registered("alpha".into())).await.unwrap();

        let snapshot = call!(health.snapshot("alpha".into())).await.unwrap();
        assert_eq!(0.0, snapshot.average_latency);
    }
}
