pub mod drain;
pub mod placement;
pub mod rebalance;
pub mod registry;
pub mod scaling;
pub mod settings;

use act_zero::Addr;
use async_trait::async_trait;
use std::time::Duration;

use crate::fleet::{FleetHealthModel, FleetView};
use crate::orchestrator::ClusterOrchestrator;
use crate::router::Router;
use crate::transfer::ConnectionTransfer;
use settings::Configurable;

pub use registry::StrategyRegistry;

/// Everything a strategy may act on. Strategies never talk to each other;
/// they share the world only through these collaborator handles.
#[derive(Clone)]
pub struct StrategyContext {
    pub fleet: Addr<FleetHealthModel>,
    pub router: Addr<dyn Router>,
    pub transfers: Addr<ConnectionTransfer>,
    pub orchestrator: Addr<dyn ClusterOrchestrator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StrategyRole {
    Placement,
    Scaling,
    Rebalancing,
    Drain,
}

/// Lifecycle surface shared by every role. The registry fans these events
/// out to all active strategies; implementations must not rely on the order
/// in which other roles see the same event.
#[async_trait]
pub trait Strategy: Configurable + Send + 'static {
    /// The configured name this instance was built from.
    fn kind(&self) -> &'static str;

    async fn on_startup(&mut self, _ctx: &StrategyContext) {}

    async fn on_shutdown(&mut self) {}

    async fn on_player_connect(&mut self, _ctx: &StrategyContext, _connection: &str, _server: &str) {
    }

    async fn on_player_disconnect(
        &mut self,
        _ctx: &StrategyContext,
        _connection: &str,
        _server: &str,
    ) {
    }

    async fn on_server_register(&mut self, _ctx: &StrategyContext, _server: &str) {}

    async fn on_server_unregister(&mut self, _ctx: &StrategyContext, _server: &str) {}
}

/// Chooses a target server for an incoming or migrating connection.
/// `None` means no candidate exists; the caller leaves the request unplaced.
#[async_trait]
pub trait PlacementStrategy: Strategy {
    async fn select(
        &mut self,
        ctx: &StrategyContext,
        view: &FleetView,
        connection: &str,
    ) -> Option<String>;
}

/// Periodically grows or shrinks the fleet through the orchestrator.
#[async_trait]
pub trait ScalingStrategy: Strategy {
    fn interval(&self) -> Duration;

    async fn execute(&mut self, ctx: &StrategyContext);
}

/// Periodically moves connections between running servers. Never changes
/// fleet size.
#[async_trait]
pub trait RebalancingStrategy: Strategy {
    fn interval(&self) -> Duration;

    async fn execute(&mut self, ctx: &StrategyContext);
}

/// Evacuates one server on demand, re-homing its connections through the
/// active placement strategy.
#[async_trait]
pub trait DrainStrategy: Strategy {
    async fn drain(
        &mut self,
        ctx: &StrategyContext,
        placement: Option<&mut dyn PlacementStrategy>,
        server: &str,
    ) -> bool;
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::StrategyContext;
    use crate::fleet::{FleetHealthModel, QualityThresholds, QualityWeights};
    use crate::latency;
    use crate::orchestrator::MockOrchestrator;
    use crate::router::InMemoryRouter;
    use crate::telemetry::{TelemetryObserver, TelemetryReport};
    use crate::transfer::ConnectionTransfer;
    use act_zero::runtimes::tokio::spawn_actor;
    use act_zero::{call, upcast, Addr};
    use std::time::Duration;

    pub struct TestFleet {
        pub router: Addr<InMemoryRouter>,
        pub health: Addr<FleetHealthModel>,
        pub transfers: Addr<ConnectionTransfer>,
        pub orchestrator: Addr<MockOrchestrator>,
        pub ctx: StrategyContext,
    }

    pub fn test_weights() -> QualityWeights {
        QualityWeights {
            time_weight: 5.0,
            player_weight: 1.0,
            resource_weight: 0.0,
        }
    }

    /// Threshold with the test weights: 40 * 5 + 40 * 1 = 240.
    pub fn test_thresholds() -> QualityThresholds {
        QualityThresholds::default()
    }

    pub async fn fleet() -> TestFleet {
        let router = spawn_actor(InMemoryRouter::new());
        let health = spawn_actor(FleetHealthModel::new(
            upcast!(router.clone()),
            test_weights(),
            test_thresholds(),
        ));
        let transfers = spawn_actor(ConnectionTransfer::new(
            upcast!(router.clone()),
            Duration::from_millis(5),
        ));
        let orchestrator = spawn_actor(MockOrchestrator::new());

        let ctx = StrategyContext {
            fleet: health.clone(),
            router: upcast!(router.clone()),
            transfers: transfers.clone(),
            orchestrator: upcast!(orchestrator.clone()),
        };

        TestFleet {
            router,
            health,
            transfers,
            orchestrator,
            ctx,
        }
    }

    /// Registers a server with `players` connections named `{name}-conn-{i}`
    /// and, unless `telemetry` is `None`, a full latency window plus an
    /// owned-resource count.
    pub async fn add_server(
        fleet: &TestFleet,
        name: &str,
        players: usize,
        telemetry: Option<(f64, i64)>,
    ) {
        call!(fleet.router.add_server(name.into())).await.unwrap();
        call!(fleet.health.server_registered(name.into()))
            .await
            .unwrap();

        for i in 0..players {
            call!(fleet
                .router
                .open_connection(format!("{}-conn-{}", name, i), name.into()))
            .await
            .unwrap();
        }

        if let Some((latency_ms, owned_resources)) = telemetry {
            for _ in 0..latency::window_size() {
                call!(fleet.health.observe_report(
                    name.into(),
                    TelemetryReport {
                        latency_ms,
                        throughput: 20.0,
                        owned_resources,
                    }
                ))
                .await
                .unwrap();
            }
        }
    }
}
