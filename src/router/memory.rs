use crate::actor;
use crate::router::{ConnectionState, FleetEventObserver, Router};
use act_zero::{send, Actor, ActorError, ActorResult, Addr, Produces};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Router implementation backed by plain maps. Carries the full collaborator
/// surface so the standalone mode and the test suite can drive membership,
/// connections and transfer failures without a real proxy in front.
pub struct InMemoryRouter {
    routable: BTreeSet<String>,
    refusing: BTreeSet<String>,
    connections: BTreeMap<String, Option<String>>,
    observer: Option<Addr<dyn FleetEventObserver>>,
}

impl Default for InMemoryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRouter {
    pub fn new() -> Self {
        Self {
            routable: BTreeSet::new(),
            refusing: BTreeSet::new(),
            connections: BTreeMap::new(),
            observer: None,
        }
    }

    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&Addr<dyn FleetEventObserver>),
    {
        if let Some(observer) = &self.observer {
            f(observer);
        }
    }
}

#[async_trait]
impl Actor for InMemoryRouter {
    async fn started(&mut self, _addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started InMemoryRouter");

        Produces::ok(())
    }

    async fn error(&mut self, error: ActorError) -> bool {
        actor::handle_error(error)
    }
}

impl InMemoryRouter {
    pub async fn add_server(&mut self, server: String) -> ActorResult<()> {
        if self.routable.insert(server.clone()) {
            info!("Server {} joined the fleet", server);
            self.notify(|o| send!(o.observe_server_register(server.clone())));
        }

        Produces::ok(())
    }

    pub async fn remove_server(&mut self, server: String) -> ActorResult<()> {
        self.routable.remove(&server);

        // Connections that were still attached end up parked.
        let mut parked = Vec::new();
        for (connection, location) in self.connections.iter_mut() {
            if location.as_deref() == Some(server.as_str()) {
                *location = None;
                parked.push(connection.clone());
            }
        }

        for connection in parked {
            let server = server.clone();
            self.notify(|o| send!(o.observe_player_disconnect(connection, server)));
        }

        info!("Server {} left the fleet", server);
        self.notify(|o| send!(o.observe_server_unregister(server.clone())));

        Produces::ok(())
    }

    pub async fn open_connection(&mut self, connection: String, server: String) -> ActorResult<()> {
        self.connections
            .insert(connection.clone(), Some(server.clone()));
        self.notify(|o| send!(o.observe_player_connect(connection, server)));

        Produces::ok(())
    }

    pub async fn close_connection(&mut self, connection: String) -> ActorResult<()> {
        if let Some(Some(server)) = self.connections.remove(&connection) {
            self.notify(|o| send!(o.observe_player_disconnect(connection, server)));
        }

        Produces::ok(())
    }

    /// Makes `server` refuse establish attempts, for transfer-failure tests.
    pub async fn set_refusing(&mut self, server: String, refusing: bool) -> ActorResult<()> {
        if refusing {
            self.refusing.insert(server);
        } else {
            self.refusing.remove(&server);
        }

        Produces::ok(())
    }
}

#[async_trait]
impl Router for InMemoryRouter {
    async fn server_names(&mut self) -> ActorResult<Vec<String>> {
        Produces::ok(self.routable.iter().cloned().collect())
    }

    async fn connection_counts(&mut self) -> ActorResult<HashMap<String, usize>> {
        let mut counts: HashMap<String, usize> = self
            .routable
            .iter()
            .map(|name| (name.clone(), 0))
            .collect();

        for location in self.connections.values().flatten() {
            *counts.entry(location.clone()).or_insert(0) += 1;
        }

        Produces::ok(counts)
    }

    async fn connections_on(&mut self, server: String) -> ActorResult<Vec<String>> {
        Produces::ok(
            self.connections
                .iter()
                .filter(|(_, location)| location.as_deref() == Some(server.as_str()))
                .map(|(connection, _)| connection.clone())
                .collect(),
        )
    }

    async fn lookup(&mut self, connection: String) -> ActorResult<ConnectionState> {
        Produces::ok(match self.connections.get(&connection) {
            None => ConnectionState::Unknown,
            Some(None) => ConnectionState::Parked,
            Some(Some(server)) => ConnectionState::On(server.clone()),
        })
    }

    async fn establish(&mut self, connection: String, server: String) -> ActorResult<bool> {
        if !self.routable.contains(&server) || self.refusing.contains(&server) {
            warn!(
                "Refusing to establish {} on {}: not accepting connections",
                connection, server
            );
            return Produces::ok(false);
        }

        let established = match self.connections.get_mut(&connection) {
            None => {
                warn!(
                    "Refusing to establish unknown connection {} on {}",
                    connection, server
                );
                false
            }
            Some(location) => {
                debug!("Establishing {} on {}", connection, server);
                *location = Some(server.clone());
                true
            }
        };

        if established {
            self.notify(|o| send!(o.observe_player_connect(connection, server)));
        }

        Produces::ok(established)
    }

    async fn disconnect(&mut self, connection: String) -> ActorResult<()> {
        let left = self
            .connections
            .get_mut(&connection)
            .and_then(|location| location.take());

        if let Some(server) = left {
            debug!("Disconnected {} from {}", connection, server);
            self.notify(|o| send!(o.observe_player_disconnect(connection, server)));
        }

        Produces::ok(())
    }

    async fn unregister_server(&mut self, server: String) -> ActorResult<bool> {
        let removed = self.routable.remove(&server);
        if removed {
            info!("Server {} pulled out of rotation", server);
            self.notify(|o| send!(o.observe_server_unregister(server.clone())));
        }

        Produces::ok(removed)
    }

    async fn set_observer(&mut self, observer: Addr<dyn FleetEventObserver>) -> ActorResult<()> {
        self.observer = Some(observer);

        Produces::ok(())
    }
}
