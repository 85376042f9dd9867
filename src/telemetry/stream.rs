use crate::telemetry::{TelemetryObserver, TelemetryReport, TelemetryStreamFactory};
use act_zero::{call, Actor, ActorResult, Addr, AddrLike, Produces, WeakAddr};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Synthetic report source used by the standalone mode and tests: yields the
/// same report on a fixed interval.
#[derive(Clone, Debug)]
pub struct FixedTelemetryStreamFactory {
    pub interval: Duration,
    pub report: TelemetryReport,
}

impl TelemetryStreamFactory for FixedTelemetryStreamFactory {
    fn create_stream(
        &self,
        server: String,
    ) -> Pin<Box<dyn Stream<Item = TelemetryReport> + Send>> {
        info!("Creating fixed telemetry stream for {}", server);

        let interval = self.interval;
        let report = self.report;

        Box::pin(async_stream::stream! {
            let mut ticks = tokio::time::interval(interval);
            loop {
                ticks.tick().await;
                yield report;
            }
        })
    }
}

/// Pumps one server's telemetry stream into the observer, reopening the
/// stream whenever it runs dry.
pub struct TelemetryStreamer {
    server: String,
    observer: WeakAddr<dyn TelemetryObserver>,
    stream_factory: Box<dyn TelemetryStreamFactory>,
}

#[async_trait]
impl Actor for TelemetryStreamer {
    #[tracing::instrument(
        name = "TelemetryStreamer::started",
        skip(self, addr),
        fields(server = %self.server)
    )]
    async fn started(&mut self, addr: Addr<Self>) -> ActorResult<()> {
        info!("Started TelemetryStreamer {}", self.server);

        addr.send_fut({
            let observer = self.observer.clone();
            let server = self.server.clone();
            let stream_factory = self.stream_factory.clone();

            async move { Self::poll_stream(observer, server, stream_factory).await }
        });

        Produces::ok(())
    }
}

impl TelemetryStreamer {
    pub fn new(
        server: String,
        observer: WeakAddr<dyn TelemetryObserver>,
        stream_factory: Box<dyn TelemetryStreamFactory>,
    ) -> Self {
        Self {
            server,
            observer,
            stream_factory,
        }
    }

    #[tracing::instrument(name = "TelemetryStreamer::poll_stream", skip(observer, stream_factory))]
    async fn poll_stream(
        observer: WeakAddr<dyn TelemetryObserver>,
        server: String,
        stream_factory: Box<dyn TelemetryStreamFactory>,
    ) {
        loop {
            info!("Opening telemetry stream");
            let mut reports = stream_factory.create_stream(server.clone());

            while let Some(report) = reports.next().await {
                trace!("Received telemetry report {:?}", report);
                let publish_result =
                    call!(observer.observe_report(server.clone(), report)).await;

                if let Err(e) = publish_result {
                    warn!("Failed to publish telemetry report {:?}", e)
                }
            }
        }
    }
}
