use crate::config;
use crate::router::Router;
use crate::strategy::settings::configurable;
use crate::strategy::{DrainStrategy, PlacementStrategy, Strategy, StrategyContext};
use act_zero::call;
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DrainKind {
    Default,
}

pub fn build(kind: DrainKind, config: &config::Drain) -> Box<dyn DrainStrategy> {
    match kind {
        DrainKind::Default => Box::new(DefaultDrain {
            transfer_retries: config.transfer_retries,
        }),
    }
}

/// Evacuates one server: pull it out of rotation first so nothing new lands
/// on it, then re-home every remaining connection through the active
/// placement strategy. The result reports whether every evacuation was
/// initiated; the transfers themselves finish asynchronously.
pub struct DefaultDrain {
    transfer_retries: i64,
}

configurable!(DefaultDrain {
    transfer_retries: Long,
});

#[async_trait]
impl Strategy for DefaultDrain {
    fn kind(&self) -> &'static str {
        "default"
    }
}

#[async_trait]
impl DrainStrategy for DefaultDrain {
    #[tracing::instrument(name = "DefaultDrain::drain", skip(self, ctx, placement))]
    async fn drain(
        &mut self,
        ctx: &StrategyContext,
        placement: Option<&mut dyn PlacementStrategy>,
        server: &str,
    ) -> bool {
        let names = call!(ctx.router.server_names()).await.unwrap_or_default();

        if !names.iter().any(|name| name == server) {
            warn!("Refusing to drain {}: not a registered server", server);
            return false;
        }
        if names.len() <= 1 {
            warn!("Refusing to drain {}: it is the last fleet server", server);
            return false;
        }

        let placement = match placement {
            Some(placement) => placement,
            None => {
                warn!("Refusing to drain {}: no placement strategy active", server);
                return false;
            }
        };

        info!("Draining server {}", server);

        // Out of rotation before the connection set is collected, so no new
        // connection can race onto the server mid-evacuation.
        match call!(ctx.router.unregister_server(server.to_owned())).await {
            Ok(true) => {}
            outcome => {
                warn!("Failed to pull {} out of rotation: {:?}", server, outcome);
                return false;
            }
        }

        let connections = call!(ctx.router.connections_on(server.to_owned()))
            .await
            .unwrap_or_default();

        if connections.is_empty() {
            info!("Server {} had no connections, drain complete", server);
            return true;
        }

        let view = match call!(ctx.fleet.fleet_view()).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Failed to build the fleet view for drain: {:?}", e);
                return false;
            }
        };

        let mut all_initiated = true;
        for connection in connections {
            match placement.select(ctx, &view, &connection).await {
                Some(target) => {
                    let initiation = call!(ctx.transfers.transfer(
                        connection.clone(),
                        target,
                        self.transfer_retries.max(0) as u32
                    ))
                    .await;

                    if let Err(e) = initiation {
                        warn!("Failed to initiate transfer of {}: {:?}", connection, e);
                        all_initiated = false;
                    }
                }
                None => {
                    warn!("No placement candidate for connection {}", connection);
                    all_initiated = false;
                }
            }
        }

        all_initiated
    }
}
