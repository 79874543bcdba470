use crate::connection::{Connection, ConnectionId, ConnectionListener, ConnectionManager};
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// ConnectionRegistry is the set of live connections the transport layer has established. The
/// transport calls `add_connection()` once a connection is authenticated and
/// `remove_connection()` once it is closed; the registry fans those changes out to listeners.
pub struct ConnectionRegistry {
    logger: slog::Logger,
    connections: RwLock<HashMap<ConnectionId, Arc<dyn Connection>>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
}

impl ConnectionRegistry {
    pub fn new(logger: slog::Logger) -> Self {
        ConnectionRegistry {
            logger: logger.new(slog::o!("component" => "ConnectionRegistry")),
            connections: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Returns false if a connection with the same id was already registered.
    pub fn add_connection(&self, connection: Arc<dyn Connection>) -> bool {
        {
            let mut connections = self.connections.write().expect("ConnectionRegistry lock poison");
            if connections.contains_key(&connection.id()) {
                return false;
            }
            connections.insert(connection.id(), connection.clone());
        }

        slog::info!(
            self.logger,
            "Connection added: {:?} to member {:?} at {:?}",
            connection.id(),
            connection.remote_member_id(),
            connection.remote_address()
        );
        for listener in self.listeners_snapshot() {
            listener.connection_added(&connection);
        }
        true
    }

    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<Arc<dyn Connection>> {
        let removed = self
            .connections
            .write()
            .expect("ConnectionRegistry lock poison")
            .remove(&connection_id)?;

        slog::info!(self.logger, "Connection removed: {:?}", connection_id);
        for listener in self.listeners_snapshot() {
            listener.connection_removed(&removed);
        }
        Some(removed)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("ConnectionRegistry lock poison").len()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners.lock().expect("ConnectionRegistry listeners poison").clone()
    }

    fn find(&self, predicate: impl Fn(&Arc<dyn Connection>) -> bool) -> Option<Arc<dyn Connection>> {
        self.connections
            .read()
            .expect("ConnectionRegistry lock poison")
            .values()
            .find(|c| predicate(c))
            .cloned()
    }
}

impl ConnectionManager for ConnectionRegistry {
    fn get_connection(&self, member_id: &Uuid) -> Option<Arc<dyn Connection>> {
        self.find(|c| c.remote_member_id().as_ref() == Some(member_id))
    }

    fn get_connection_by_address(&self, address: &SocketAddr) -> Option<Arc<dyn Connection>> {
        self.find(|c| c.remote_address().as_ref() == Some(address))
    }

    fn get_any_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connections
            .read()
            .expect("ConnectionRegistry lock poison")
            .values()
            .filter(|c| c.is_alive())
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    fn active_connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .read()
            .expect("ConnectionRegistry lock poison")
            .values()
            .cloned()
            .collect()
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners
            .lock()
            .expect("ConnectionRegistry listeners poison")
            .push(listener);
    }
}
