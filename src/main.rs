use act_zero::runtimes::tokio::spawn_actor;
use act_zero::{call, upcast, Addr};
use fleet_auto_balancer::config::load_config;
use fleet_auto_balancer::fleet::FleetHealthModel;
use fleet_auto_balancer::router::{FleetEventObserver, Router};
use fleet_auto_balancer::strategy::{StrategyContext, StrategyRegistry};
use fleet_auto_balancer::telemetry::{FixedTelemetryStreamFactory, TelemetryReport};
use fleet_auto_balancer::transfer::ConnectionTransfer;
use fleet_auto_balancer::{drain_server, latency, orchestrator, router};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    set_global_default(subscriber).expect("Failed to set subscriber");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let config = load_config()?;

    // The window size is global and must be fixed before the first server
    // joins the fleet.
    latency::set_window_size(config.telemetry.window_size);

    let router = router::build_from_config(Arc::clone(&config))?;
    let orchestrator = orchestrator::build_from_config(Arc::clone(&config))?;

    let health = spawn_actor(FleetHealthModel::new(
        router.clone(),
        config.quality.weights.clone(),
        config.quality.thresholds.clone(),
    ));

    let transfers = spawn_actor(ConnectionTransfer::new(
        router.clone(),
        config.transfer.retry_base,
    ));

    let ctx = StrategyContext {
        fleet: health.clone(),
        router: router.clone(),
        transfers,
        orchestrator,
    };

    let registry = spawn_actor(
        StrategyRegistry::new(ctx, Arc::clone(&config)).with_telemetry(Box::new(
            FixedTelemetryStreamFactory {
                interval: Duration::from_secs(1),
                report: TelemetryReport {
                    latency_ms: 20.0,
                    throughput: 20.0,
                    owned_resources: 0,
                },
            },
        )),
    );

    let observer: Addr<dyn FleetEventObserver> = upcast!(registry.clone());
    call!(router.set_observer(observer)).await?;

    if config.drain_server.enabled {
        let port = config.drain_server.port;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = drain_server::serve(port, registry).await {
                error!("Drain endpoint failed: {:?}", e);
            }
        });
    }

    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
    }
}
