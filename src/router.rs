mod memory;

use act_zero::{Actor, ActorResult, Addr};
use async_trait::async_trait;
use std::collections::HashMap;

use crate::{config, AppConfig};
use act_zero::runtimes::tokio::spawn_actor;
use act_zero::upcast;
pub use memory::InMemoryRouter;

/// Where a connection currently sits, as far as the router knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The router has never heard of this connection, or it left for good.
    Unknown,
    /// Known but currently detached from any server (mid-transfer).
    Parked,
    On(String),
}

/// Narrow interface to the front-door router. The proxying machinery itself
/// lives outside this crate; the core only needs membership, connection
/// locations and the ability to move a connection.
#[async_trait]
pub trait Router: Actor {
    /// Servers currently in rotation for new connections.
    async fn server_names(&mut self) -> ActorResult<Vec<String>>;

    /// Connection counts keyed by server, including servers already pulled
    /// out of rotation that still hold connections.
    async fn connection_counts(&mut self) -> ActorResult<HashMap<String, usize>>;

    async fn connections_on(&mut self, server: String) -> ActorResult<Vec<String>>;

    async fn lookup(&mut self, connection: String) -> ActorResult<ConnectionState>;

    /// Attaches a connection to `server`. `false` means the attempt failed
    /// (server unknown, out of rotation or refusing connections).
    async fn establish(&mut self, connection: String, server: String) -> ActorResult<bool>;

    /// Detaches a connection from whatever server it is on.
    async fn disconnect(&mut self, connection: String) -> ActorResult<()>;

    /// Pulls a server out of rotation without touching the connections still
    /// on it. `false` when the server was not in rotation.
    async fn unregister_server(&mut self, server: String) -> ActorResult<bool>;

    async fn set_observer(&mut self, observer: Addr<dyn FleetEventObserver>) -> ActorResult<()>;
}

/// Callbacks the router layer raises towards the core. Delivered on the
/// router's own schedule; receivers must tolerate any interleaving.
#[async_trait]
pub trait FleetEventObserver: Actor {
    async fn observe_server_register(&mut self, server: String);
    async fn observe_server_unregister(&mut self, server: String);
    async fn observe_player_connect(&mut self, connection: String, server: String);
    async fn observe_player_disconnect(&mut self, connection: String, server: String);
}

pub fn build_from_config(config: AppConfig) -> anyhow::Result<Addr<dyn Router>> {
    Ok(match &config.router {
        config::RouterConfig::Memory => upcast!(spawn_actor(InMemoryRouter::new())),
    })
}
