mod http;
mod mock;

use act_zero::{Actor, ActorResult, Addr};
use async_trait::async_trait;

use crate::{config, AppConfig};
use act_zero::runtimes::tokio::spawn_actor;
use act_zero::upcast;
pub use http::HttpOrchestrator;
pub use mock::{MockOrchestrator, OrchestrationCall};

/// Outbound interface to whatever actually creates and destroys backend
/// instances. Failures surface as `false`; the next control-loop cycle
/// re-evaluates its conditions from scratch, so there is no retry here.
#[async_trait]
pub trait ClusterOrchestrator: Actor {
    /// Requests `replicas` new instances, or the orchestrator's default of
    /// one when `None`.
    async fn scale_up(&mut self, replicas: Option<u32>) -> ActorResult<bool>;

    async fn delete_server(&mut self, name: String) -> ActorResult<bool>;
}

pub fn build_from_config(config: AppConfig) -> anyhow::Result<Addr<dyn ClusterOrchestrator>> {
    Ok(match &config.orchestrator {
        config::Orchestrator::Mock => upcast!(spawn_actor(MockOrchestrator::new())),
        config::Orchestrator::Http { address } => {
            upcast!(spawn_actor(HttpOrchestrator::new(address)?))
        }
    })
}
