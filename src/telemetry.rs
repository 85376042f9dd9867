pub mod codec;
mod stream;

use act_zero::{Actor, ActorResult};
use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;

pub use stream::FixedTelemetryStreamFactory;
pub use stream::TelemetryStreamer;

/// One periodic report from a backend server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReport {
    /// Per-tick response time in milliseconds.
    pub latency_ms: f64,
    pub throughput: f32,
    pub owned_resources: i64,
}

#[async_trait]
pub trait TelemetryObserver: Actor {
    async fn observe_report(&mut self, server: String, report: TelemetryReport)
        -> ActorResult<()>;
}

pub trait TelemetryStreamFactory: Send + Sync + CloneTelemetryStreamFactory + Debug {
    fn create_stream(&self, server: String)
        -> Pin<Box<dyn Stream<Item = TelemetryReport> + Send>>;
}

pub trait CloneTelemetryStreamFactory {
    fn clone_boxed(&self) -> Box<dyn TelemetryStreamFactory>;
}

impl<T> CloneTelemetryStreamFactory for T
where
    T: TelemetryStreamFactory + Clone + 'static,
{
    fn clone_boxed(&self) -> Box<dyn TelemetryStreamFactory> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn TelemetryStreamFactory> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}
