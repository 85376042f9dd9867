use crate::actor;
use crate::router::{ConnectionState, Router};
use act_zero::{call, send, Actor, ActorError, ActorResult, Addr, AddrLike, Produces, WeakAddr};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// The one path through which any strategy moves a connection between
/// servers: detach, try to establish on the target, retry failed attempts
/// with a doubling delay until the retry budget runs out.
///
/// Callers only wait for the initiation; retries run as detached delayed
/// tasks. A retry that fires after the connection already left or found a
/// home elsewhere is dropped after a state re-check.
pub struct ConnectionTransfer {
    router: Addr<dyn Router>,
    retry_base: Duration,
    addr: WeakAddr<Self>,
}

impl ConnectionTransfer {
    pub fn new(router: Addr<dyn Router>, retry_base: Duration) -> Self {
        Self {
            router,
            retry_base,
            addr: Default::default(),
        }
    }
}

impl fmt::Display for ConnectionTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionTransfer")
    }
}

impl fmt::Debug for ConnectionTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[async_trait]
impl Actor for ConnectionTransfer {
    #[tracing::instrument(name = "ConnectionTransfer::started", skip(self, addr))]
    async fn started(&mut self, addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started");

        self.addr = addr.downgrade();

        Produces::ok(())
    }

    async fn error(&mut self, error: ActorError) -> bool {
        actor::handle_error(error)
    }
}

impl ConnectionTransfer {
    #[tracing::instrument(name = "ConnectionTransfer::transfer", skip(self))]
    pub async fn transfer(
        &mut self,
        connection: String,
        target: String,
        max_retries: u32,
    ) -> ActorResult<()> {
        info!(
            "Transferring connection {} to server {}",
            connection, target
        );

        // Detach from any prior target first; a still-pending earlier
        // transfer must not keep the connection claimed.
        if let Err(e) = call!(self.router.disconnect(connection.clone())).await {
            warn!("Failed to detach {} before transfer: {:?}", connection, e);
        }

        match call!(self.router.establish(connection.clone(), target.clone())).await {
            Ok(true) => {
                info!(
                    "Transferred connection {} to server {} successfully",
                    connection, target
                );
            }
            Ok(false) => {
                warn!(
                    "Failed to transfer connection {} to server {}: target refused",
                    connection, target
                );
                self.schedule_retry(connection, target, max_retries, self.retry_base);
            }
            Err(e) => {
                warn!(
                    "Failed to transfer connection {} to server {}: {:?}",
                    connection, target, e
                );
                self.schedule_retry(connection, target, max_retries, self.retry_base);
            }
        }

        Produces::ok(())
    }

    pub async fn retry(
        &mut self,
        connection: String,
        target: String,
        budget: u32,
        delay: Duration,
    ) -> ActorResult<()> {
        // The world may have moved on while the retry was sleeping.
        let state = call!(self.router.lookup(connection.clone()))
            .await
            .unwrap_or(ConnectionState::Unknown);

        match state {
            ConnectionState::Unknown => {
                info!("Dropping retry for {}: connection is gone", connection);
                return Produces::ok(());
            }
            ConnectionState::On(server) => {
                info!(
                    "Dropping retry for {}: already connected to {}",
                    connection, server
                );
                return Produces::ok(());
            }
            ConnectionState::Parked => {}
        }

        match call!(self.router.establish(connection.clone(), target.clone())).await {
            Ok(true) => {
                info!(
                    "Transferred connection {} to server {} successfully after retry",
                    connection, target
                );
            }
            outcome => {
                warn!(
                    "Retry failed for connection {} to server {} ({:?}), {} retries left",
                    connection,
                    target,
                    outcome,
                    budget.saturating_sub(1)
                );
                self.schedule_retry(connection, target, budget.saturating_sub(1), delay * 2);
            }
        }

        Produces::ok(())
    }

    fn schedule_retry(&self, connection: String, target: String, budget: u32, delay: Duration) {
        if budget == 0 {
            error!(
                "Giving up on transferring connection {} to server {}: retry budget exhausted",
                connection, target
            );
            return;
        }

        info!(
            "Retrying transfer of connection {} to server {} in {:?}",
            connection, target, delay
        );

        let addr = self.addr.clone();
        self.addr.send_fut(async move {
            tokio::time::sleep(delay).await;
            send!(addr.retry(connection, target, budget, delay));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InMemoryRouter;
    use act_zero::runtimes::tokio::spawn_actor;
    use act_zero::upcast;

    async fn two_server_fleet() -> (Addr<InMemoryRouter>, Addr<ConnectionTransfer>) {
        let router = spawn_actor(InMemoryRouter::new());
        let transfers = spawn_actor(ConnectionTransfer::new(
            upcast!(router.clone()),
            Duration::from_millis(5),
        ));

        call!(router.add_server("alpha".into())).await.unwrap();
        call!(router.add_server("beta".into())).await.unwrap();
        call!(router.open_connection("conn-1".into(), "alpha".into()))
            .await
            .unwrap();

        (router, transfers)
    }

    #[tokio::test]
    async fn transfer_moves_the_connection() {
        let (router, transfers) = two_server_fleet().await;

        call!(transfers.transfer("conn-1".into(), "beta".into(), 3))
            .await
            .unwrap();

        assert_eq!(
            ConnectionState::On("beta".into()),
            call!(router.lookup("conn-1".into())).await.unwrap()
        );
    }

    #[tokio::test]
    async fn failed_attempts_are_retried_until_the_target_accepts() {
        let (router, transfers) = two_server_fleet().await;
        call!(router.set_refusing("beta".into(), true)).await.unwrap();

        call!(transfers.transfer("conn-1".into(), "beta".into(), 5))
            .await
            .unwrap();
        assert_eq!(
            ConnectionState::Parked,
            call!(router.lookup("conn-1".into())).await.unwrap()
        );

        call!(router.set_refusing("beta".into(), false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            ConnectionState::On("beta".into()),
            call!(router.lookup("conn-1".into())).await.unwrap()
        );
    }

    #[tokio::test]
    async fn gives_up_once_the_retry_budget_is_exhausted() {
        let (router, transfers) = two_server_fleet().await;
        call!(router.set_refusing("beta".into(), true)).await.unwrap();

        call!(transfers.transfer("conn-1".into(), "beta".into(), 2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Budget ran out with the target still refusing; nothing moved.
        assert_eq!(
            ConnectionState::Parked,
            call!(router.lookup("conn-1".into())).await.unwrap()
        );
    }

    #[tokio::test]
    async fn stale_retries_are_dropped_after_the_connection_leaves() {
        let (router, transfers) = two_server_fleet().await;
        call!(router.set_refusing("beta".into(), true)).await.unwrap();

        call!(transfers.transfer("conn-1".into(), "beta".into(), 5))
            .await
            .unwrap();
        call!(router.close_connection("conn-1".into())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            ConnectionState::Unknown,
            call!(router.lookup("conn-1".into())).await.unwrap()
        );
    }
}
