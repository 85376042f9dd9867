use crate::actor;
use crate::router::FleetEventObserver;
use crate::strategy::drain::{self, DrainKind};
use crate::strategy::placement::{self, PlacementKind};
use crate::strategy::rebalance::{RebalanceKind, Rebalancer};
use crate::strategy::scaling::{AutoscalingController, ScalingKind};
use crate::strategy::settings::{FieldDef, SettingsError};
use crate::strategy::{
    DrainStrategy, PlacementStrategy, RebalancingStrategy, ScalingStrategy, StrategyContext,
    StrategyRole,
};
use crate::telemetry::{TelemetryObserver, TelemetryStreamFactory, TelemetryStreamer};
use crate::AppConfig;
use act_zero::runtimes::tokio::{spawn_actor, Timer};
use act_zero::timer::Tick;
use act_zero::{call, send, upcast, Actor, ActorError, ActorResult, Addr, Produces, WeakAddr};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Owns the one live strategy per role, runs the periodic roles on their
/// own timers and fans lifecycle events out to every active strategy.
///
/// Strategy swaps happen inside a single actor invocation, so no event is
/// ever delivered to a half-replaced role. A role whose configured name
/// does not resolve simply stays disabled: events to it are absorbed and
/// its operations report "nothing chosen".
pub struct StrategyRegistry {
    ctx: StrategyContext,
    config: AppConfig,
    telemetry_factory: Option<Box<dyn TelemetryStreamFactory>>,
    streamers: HashMap<String, Addr<TelemetryStreamer>>,
    placement: Option<Box<dyn PlacementStrategy>>,
    scaling: Option<Box<dyn ScalingStrategy>>,
    rebalancing: Option<Box<dyn RebalancingStrategy>>,
    drain: Option<Box<dyn DrainStrategy>>,
    scaling_timer: Timer,
    rebalancing_timer: Timer,
    addr: WeakAddr<Self>,
}

impl StrategyRegistry {
    pub fn new(ctx: StrategyContext, config: AppConfig) -> Self {
        Self {
            ctx,
            config,
            telemetry_factory: None,
            streamers: HashMap::new(),
            placement: None,
            scaling: None,
            rebalancing: None,
            drain: None,
            scaling_timer: Timer::default(),
            rebalancing_timer: Timer::default(),
            addr: Default::default(),
        }
    }

    /// Makes the registry spawn a telemetry streamer for every server that
    /// registers, feeding the health model.
    pub fn with_telemetry(mut self, factory: Box<dyn TelemetryStreamFactory>) -> Self {
        self.telemetry_factory = Some(factory);
        self
    }
}

impl fmt::Display for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrategyRegistry")
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[async_trait]
impl Actor for StrategyRegistry {
    #[tracing::instrument(name = "StrategyRegistry::started", skip(self, addr))]
    async fn started(&mut self, addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started");

        self.addr = addr.downgrade();

        let placement_name = self.config.placement.strategy.clone();
        let scaling_name = self.config.scaling.strategy.clone();
        let rebalancing_name = self.config.rebalancing.strategy.clone();
        let drain_name = self.config.drain.strategy.clone();

        self.placement = self.build_placement(&placement_name);
        self.scaling = self.build_scaling(&scaling_name);
        self.rebalancing = self.build_rebalancing(&rebalancing_name);
        self.drain = self.build_drain(&drain_name);

        let ctx = self.ctx.clone();
        if let Some(s) = self.placement.as_mut() {
            s.on_startup(&ctx).await;
        }
        if let Some(s) = self.scaling.as_mut() {
            s.on_startup(&ctx).await;
        }
        if let Some(s) = self.rebalancing.as_mut() {
            s.on_startup(&ctx).await;
        }
        if let Some(s) = self.drain.as_mut() {
            s.on_startup(&ctx).await;
        }

        self.arm_timers();

        Produces::ok(())
    }

    async fn error(&mut self, error: ActorError) -> bool {
        actor::handle_error(error)
    }
}

#[async_trait]
impl Tick for StrategyRegistry {
    async fn tick(&mut self) -> ActorResult<()> {
        if self.scaling_timer.tick() {
            send!(self.addr.run_scaling_cycle());
        }
        if self.rebalancing_timer.tick() {
            send!(self.addr.run_rebalancing_cycle());
        }

        Produces::ok(())
    }
}

impl StrategyRegistry {
    fn build_placement(&self, name: &str) -> Option<Box<dyn PlacementStrategy>> {
        match name.parse::<PlacementKind>() {
            Ok(kind) => {
                info!("Loaded placement strategy: {}", name);
                Some(placement::build(
                    kind,
                    &self.config.placement,
                    &self.config.quality.weights,
                ))
            }
            Err(_) => {
                warn!(
                    "Unknown placement strategy {:?}, leaving the role disabled",
                    name
                );
                None
            }
        }
    }

    fn build_scaling(&self, name: &str) -> Option<Box<dyn ScalingStrategy>> {
        match name.parse::<ScalingKind>() {
            Ok(kind) => {
                info!("Loaded scaling strategy: {}", name);
                Some(Box::new(AutoscalingController::new(
                    kind,
                    &self.config.scaling,
                    &self.config.quality.thresholds,
                )))
            }
            Err(_) => {
                warn!(
                    "Unknown scaling strategy {:?}, leaving the role disabled",
                    name
                );
                None
            }
        }
    }

    fn build_rebalancing(&self, name: &str) -> Option<Box<dyn RebalancingStrategy>> {
        match name.parse::<RebalanceKind>() {
            Ok(kind) => {
                info!("Loaded rebalancing strategy: {}", name);
                Some(Box::new(Rebalancer::new(
                    kind,
                    &self.config.rebalancing,
                    &self.config.quality.thresholds,
                )))
            }
            Err(_) => {
                warn!(
                    "Unknown rebalancing strategy {:?}, leaving the role disabled",
                    name
                );
                None
            }
        }
    }

    fn build_drain(&self, name: &str) -> Option<Box<dyn DrainStrategy>> {
        match name.parse::<DrainKind>() {
            Ok(kind) => {
                info!("Loaded drain strategy: {}", name);
                Some(drain::build(kind, &self.config.drain))
            }
            Err(_) => {
                warn!(
                    "Unknown drain strategy {:?}, leaving the role disabled",
                    name
                );
                None
            }
        }
    }

    fn arm_timers(&mut self) {
        if let Some(s) = &self.scaling {
            self.scaling_timer
                .set_interval_weak(self.addr.clone(), s.interval());
        }
        if let Some(s) = &self.rebalancing {
            self.rebalancing_timer
                .set_interval_weak(self.addr.clone(), s.interval());
        }
    }

    fn spawn_streamer(&mut self, server: &str) {
        let factory = match &self.telemetry_factory {
            Some(factory) => factory.clone(),
            None => return,
        };

        let observer: Addr<dyn TelemetryObserver> = upcast!(self.ctx.fleet.clone());
        let streamer = spawn_actor(TelemetryStreamer::new(
            server.to_owned(),
            observer.downgrade(),
            factory,
        ));

        self.streamers.insert(server.to_owned(), streamer);
    }

    pub async fn run_scaling_cycle(&mut self) {
        let Self { ctx, scaling, .. } = self;
        if let Some(s) = scaling.as_mut() {
            s.execute(ctx).await;
        }
    }

    pub async fn run_rebalancing_cycle(&mut self) {
        let Self { ctx, rebalancing, .. } = self;
        if let Some(s) = rebalancing.as_mut() {
            s.execute(ctx).await;
        }
    }

    /// Front-door entry point: choose a server for an incoming connection.
    /// `None` leaves the request unplaced; callers defer, they do not crash.
    #[tracing::instrument(name = "StrategyRegistry::select_server", skip(self))]
    pub async fn select_server(&mut self, connection: String) -> ActorResult<Option<String>> {
        let view = call!(self.ctx.fleet.fleet_view()).await?;

        let Self { ctx, placement, .. } = self;
        match placement.as_mut() {
            Some(p) => Produces::ok(p.select(ctx, &view, &connection).await),
            None => {
                debug!(
                    "No placement strategy active, leaving {} unplaced",
                    connection
                );
                Produces::ok(None)
            }
        }
    }

    #[tracing::instrument(name = "StrategyRegistry::start_drain", skip(self))]
    pub async fn start_drain(&mut self, server: String) -> ActorResult<bool> {
        let Self {
            ctx,
            placement,
            drain,
            ..
        } = self;

        match drain.as_mut() {
            Some(d) => {
                let placement = placement
                    .as_mut()
                    .map(|p| p.as_mut() as &mut dyn PlacementStrategy);
                Produces::ok(d.drain(ctx, placement, &server).await)
            }
            None => {
                warn!(
                    "Drain requested for {} but the drain role is disabled",
                    server
                );
                Produces::ok(false)
            }
        }
    }

    /// Shuts the old instance down and starts the new one in one step; no
    /// lifecycle event can interleave with the swap. Returns whether the
    /// role ended up with an active strategy.
    #[tracing::instrument(name = "StrategyRegistry::set_strategy", skip(self))]
    pub async fn set_strategy(&mut self, role: StrategyRole, name: String) -> ActorResult<bool> {
        info!("Replacing {} strategy with {:?}", role, name);

        let ctx = self.ctx.clone();
        let active = match role {
            StrategyRole::Placement => {
                if let Some(mut old) = self.placement.take() {
                    old.on_shutdown().await;
                }
                self.placement = self.build_placement(&name);
                if let Some(s) = self.placement.as_mut() {
                    s.on_startup(&ctx).await;
                }
                self.placement.is_some()
            }
            StrategyRole::Scaling => {
                if let Some(mut old) = self.scaling.take() {
                    old.on_shutdown().await;
                }
                self.scaling = self.build_scaling(&name);
                if let Some(s) = self.scaling.as_mut() {
                    s.on_startup(&ctx).await;
                }
                self.scaling.is_some()
            }
            StrategyRole::Rebalancing => {
                if let Some(mut old) = self.rebalancing.take() {
                    old.on_shutdown().await;
                }
                self.rebalancing = self.build_rebalancing(&name);
                if let Some(s) = self.rebalancing.as_mut() {
                    s.on_startup(&ctx).await;
                }
                self.rebalancing.is_some()
            }
            StrategyRole::Drain => {
                if let Some(mut old) = self.drain.take() {
                    old.on_shutdown().await;
                }
                self.drain = self.build_drain(&name);
                if let Some(s) = self.drain.as_mut() {
                    s.on_startup(&ctx).await;
                }
                self.drain.is_some()
            }
        };

        self.arm_timers();

        Produces::ok(active)
    }

    pub async fn list_fields(&mut self, role: StrategyRole) -> ActorResult<Vec<FieldDef>> {
        let fields = match role {
            StrategyRole::Placement => self.placement.as_ref().map(|s| s.fields()),
            StrategyRole::Scaling => self.scaling.as_ref().map(|s| s.fields()),
            StrategyRole::Rebalancing => self.rebalancing.as_ref().map(|s| s.fields()),
            StrategyRole::Drain => self.drain.as_ref().map(|s| s.fields()),
        };

        Produces::ok(fields.unwrap_or(&[]).to_vec())
    }

    pub async fn get_field(
        &mut self,
        role: StrategyRole,
        field: String,
    ) -> ActorResult<Result<String, SettingsError>> {
        let value = match role {
            StrategyRole::Placement => self.placement.as_ref().map(|s| s.get_field(&field)),
            StrategyRole::Scaling => self.scaling.as_ref().map(|s| s.get_field(&field)),
            StrategyRole::Rebalancing => self.rebalancing.as_ref().map(|s| s.get_field(&field)),
            StrategyRole::Drain => self.drain.as_ref().map(|s| s.get_field(&field)),
        };

        Produces::ok(match value {
            None => Err(SettingsError::RoleDisabled(role)),
            Some(None) => Err(SettingsError::UnknownField(field)),
            Some(Some(value)) => Ok(value),
        })
    }

    pub async fn set_field(
        &mut self,
        role: StrategyRole,
        field: String,
        value: String,
    ) -> ActorResult<Result<(), SettingsError>> {
        let result = match role {
            StrategyRole::Placement => self
                .placement
                .as_mut()
                .map(|s| s.set_field(&field, &value)),
            StrategyRole::Scaling => self.scaling.as_mut().map(|s| s.set_field(&field, &value)),
            StrategyRole::Rebalancing => self
                .rebalancing
                .as_mut()
                .map(|s| s.set_field(&field, &value)),
            StrategyRole::Drain => self.drain.as_mut().map(|s| s.set_field(&field, &value)),
        };

        let result = result.unwrap_or(Err(SettingsError::RoleDisabled(role)));

        if result.is_ok() {
            // An interval change takes effect on the next tick.
            self.arm_timers();
        }

        Produces::ok(result)
    }
}

#[async_trait]
impl FleetEventObserver for StrategyRegistry {
    #[tracing::instrument(name = "StrategyRegistry::observe_server_register", skip(self))]
    async fn observe_server_register(&mut self, server: String) {
        if let Err(e) = call!(self.ctx.fleet.server_registered(server.clone())).await {
            warn!("Failed to register {} with the health model: {:?}", server, e);
        }
        self.spawn_streamer(&server);

        let ctx = self.ctx.clone();
        let Self {
            placement,
            scaling,
            rebalancing,
            drain,
            ..
        } = self;

        if let Some(s) = placement.as_mut() {
            s.on_server_register(&ctx, &server).await;
        }
        if let Some(s) = scaling.as_mut() {
            s.on_server_register(&ctx, &server).await;
        }
        if let Some(s) = rebalancing.as_mut() {
            s.on_server_register(&ctx, &server).await;
        }
        if let Some(s) = drain.as_mut() {
            s.on_server_register(&ctx, &server).await;
        }
    }

    #[tracing::instrument(name = "StrategyRegistry::observe_server_unregister", skip(self))]
    async fn observe_server_unregister(&mut self, server: String) {
        if let Err(e) = call!(self.ctx.fleet.server_unregistered(server.clone())).await {
            warn!(
                "Failed to unregister {} from the health model: {:?}",
                server, e
            );
        }
        self.streamers.remove(&server);

        let ctx = self.ctx.clone();
        let Self {
            placement,
            scaling,
            rebalancing,
            drain,
            ..
        } = self;

        if let Some(s) = placement.as_mut() {
            s.on_server_unregister(&ctx, &server).await;
        }
        if let Some(s) = scaling.as_mut() {
            s.on_server_unregister(&ctx, &server).await;
        }
        if let Some(s) = rebalancing.as_mut() {
            s.on_server_unregister(&ctx, &server).await;
        }
        if let Some(s) = drain.as_mut() {
            s.on_server_unregister(&ctx, &server).await;
        }
    }

    async fn observe_player_connect(&mut self, connection: String, server: String) {
        let ctx = self.ctx.clone();
        let Self {
            placement,
            scaling,
            rebalancing,
            drain,
            ..
        } = self;

        if let Some(s) = placement.as_mut() {
            s.on_player_connect(&ctx, &connection, &server).await;
        }
        if let Some(s) = scaling.as_mut() {
            s.on_player_connect(&ctx, &connection, &server).await;
        }
        if let Some(s) = rebalancing.as_mut() {
            s.on_player_connect(&ctx, &connection, &server).await;
        }
        if let Some(s) = drain.as_mut() {
            s.on_player_connect(&ctx, &connection, &server).await;
        }
    }

    async fn observe_player_disconnect(&mut self, connection: String, server: String) {
        let ctx = self.ctx.clone();
        let Self {
            placement,
            scaling,
            rebalancing,
            drain,
            ..
        } = self;

        if let Some(s) = placement.as_mut() {
            s.on_player_disconnect(&ctx, &connection, &server).await;
        }
        if let Some(s) = scaling.as_mut() {
            s.on_player_disconnect(&ctx, &connection, &server).await;
        }
        if let Some(s) = rebalancing.as_mut() {
            s.on_player_disconnect(&ctx, &connection, &server).await;
        }
        if let Some(s) = drain.as_mut() {
            s.on_player_disconnect(&ctx, &connection, &server).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::router::Router;
    use crate::strategy::testkit;
    use std::sync::Arc;

    async fn spawn_registry(config: Config) -> (testkit::TestFleet, Addr<StrategyRegistry>) {
        let fleet = testkit::fleet().await;
        let registry = spawn_actor(StrategyRegistry::new(fleet.ctx.clone(), Arc::new(config)));
        (fleet, registry)
    }

    #[tokio::test]
    async fn loads_the_configured_strategies() {
        let (_fleet, registry) = spawn_registry(Config::default()).await;

        let fields = call!(registry.list_fields(StrategyRole::Scaling))
            .await
            .unwrap();
        assert!(fields.iter().any(|f| f.name == "red_ratio"));

        let value = call!(registry.get_field(StrategyRole::Scaling, "red_ratio".into()))
            .await
            .unwrap();
        assert_eq!("0.6", value.unwrap());
    }

    #[tokio::test]
    async fn unknown_strategy_names_leave_the_role_disabled() {
        let mut config = Config::default();
        config.placement.strategy = "bogus".into();
        let (fleet, registry) = spawn_registry(config).await;

        testkit::add_server(&fleet, "alpha", 0, Some((10.0, 0))).await;

        // events to the disabled role are absorbed, operations yield nothing
        send!(registry.observe_server_register("alpha".into()));
        let selected = call!(registry.select_server("conn-1".into())).await.unwrap();
        assert_eq!(None, selected);

        let fields = call!(registry.list_fields(StrategyRole::Placement))
            .await
            .unwrap();
        assert!(fields.is_empty());

        let value = call!(registry.get_field(StrategyRole::Placement, "anything".into()))
            .await
            .unwrap();
        assert!(matches!(value, Err(SettingsError::RoleDisabled(_))));
    }

    #[tokio::test]
    async fn selects_a_server_through_the_active_placement_strategy() {
        let (fleet, registry) = spawn_registry(Config::default()).await;

        testkit::add_server(&fleet, "alpha", 10, Some((30.0, 0))).await;
        testkit::add_server(&fleet, "beta", 2, Some((5.0, 0))).await;

        // default placement is lowest_latency
        let selected = call!(registry.select_server("conn-1".into())).await.unwrap();
        assert_eq!(Some("beta".to_string()), selected);
    }

    #[tokio::test]
    async fn hot_swap_replaces_the_live_instance() {
        let (_fleet, registry) = spawn_registry(Config::default()).await;

        let swapped = call!(registry.set_strategy(
            StrategyRole::Placement,
            "weighted_quality".into()
        ))
        .await
        .unwrap();
        assert!(swapped);

        let fields = call!(registry.list_fields(StrategyRole::Placement))
            .await
            .unwrap();
        assert!(fields.iter().any(|f| f.name == "time_weight"));

        // a bad name disables the role instead of keeping the old instance
        let swapped = call!(registry.set_strategy(StrategyRole::Placement, "bogus".into()))
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(
            None,
            call!(registry.select_server("conn-1".into())).await.unwrap()
        );
    }

    #[tokio::test]
    async fn field_updates_coerce_and_reject() {
        let (_fleet, registry) = spawn_registry(Config::default()).await;

        let result = call!(registry.set_field(
            StrategyRole::Scaling,
            "red_ratio".into(),
            "0.9".into()
        ))
        .await
        .unwrap();
        assert!(result.is_ok());

        let value = call!(registry.get_field(StrategyRole::Scaling, "red_ratio".into()))
            .await
            .unwrap();
        assert_eq!("0.9", value.unwrap());

        let result = call!(registry.set_field(
            StrategyRole::Scaling,
            "red_ratio".into(),
            "not-a-number".into()
        ))
        .await
        .unwrap();
        assert!(matches!(result, Err(SettingsError::Unconvertible { .. })));
    }

    #[tokio::test]
    async fn drains_through_the_active_roles() {
        let (fleet, registry) = spawn_registry(Config::default()).await;

        testkit::add_server(&fleet, "alpha", 2, Some((10.0, 0))).await;
        testkit::add_server(&fleet, "beta", 0, Some((10.0, 0))).await;

        assert!(call!(registry.start_drain("alpha".into())).await.unwrap());
        assert!(!call!(registry.start_drain("ghost".into())).await.unwrap());
    }

    #[tokio::test]
    async fn membership_events_flow_into_the_health_model() {
        let (fleet, registry) = spawn_registry(Config::default()).await;

        let observer: Addr<dyn FleetEventObserver> = upcast!(registry.clone());
        call!(fleet.router.set_observer(observer)).await.unwrap();

        call!(fleet.router.add_server("alpha".into())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // the health model learned about the server through the registry
        let snapshot = call!(fleet.health.snapshot("alpha".into())).await.unwrap();
        assert!(!snapshot.has_telemetry);
        assert!(!snapshot.degraded);
    }
}
