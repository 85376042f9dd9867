use crate::orchestrator::ClusterOrchestrator;
use act_zero::{Actor, ActorResult, Addr, Produces};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationCall {
    ScaleUp(Option<u32>),
    Delete(String),
}

/// Records requested scale actions instead of performing them. Used by the
/// test suite and as the default orchestrator when none is configured.
pub struct MockOrchestrator {
    calls: Vec<OrchestrationCall>,
    fail_requests: bool,
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            fail_requests: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Vec::new(),
            fail_requests: true,
        }
    }

    pub async fn recorded_calls(&mut self) -> ActorResult<Vec<OrchestrationCall>> {
        Produces::ok(self.calls.clone())
    }
}

#[async_trait]
impl Actor for MockOrchestrator {
    async fn started(&mut self, _addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started MockOrchestrator");

        Produces::ok(())
    }
}

#[async_trait]
impl ClusterOrchestrator for MockOrchestrator {
    async fn scale_up(&mut self, replicas: Option<u32>) -> ActorResult<bool> {
        info!("MockOrchestrator scale_up {:?}", replicas);
        self.calls.push(OrchestrationCall::ScaleUp(replicas));

        Produces::ok(!self.fail_requests)
    }

    async fn delete_server(&mut self, name: String) -> ActorResult<bool> {
        info!("MockOrchestrator delete_server {}", name);
        self.calls.push(OrchestrationCall::Delete(name));

        Produces::ok(!self.fail_requests)
    }
}
