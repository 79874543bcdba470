//! Narrow view of the transport layer. The engine never opens sockets itself; whoever owns the
//! sockets implements `Connection` and publishes live connections through a `ConnectionRegistry`.
mod registry;

pub use registry::ConnectionRegistry;

use crate::message::ClientMessage;
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Process-unique identity of a physical connection.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    /// Allocates a fresh id for a new physical connection.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection#{}", self.0)
    }
}

pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Enqueue the message for writing. `false` means the connection can't accept it.
    fn send(&self, message: ClientMessage) -> bool;

    fn is_alive(&self) -> bool;

    fn close(&self, reason: &str, cause: Option<&(dyn Error + 'static)>);

    fn remote_member_id(&self) -> Option<Uuid>;

    fn remote_address(&self) -> Option<SocketAddr>;
}

pub trait ConnectionManager: Send + Sync {
    fn get_connection(&self, member_id: &Uuid) -> Option<Arc<dyn Connection>>;

    fn get_connection_by_address(&self, address: &SocketAddr) -> Option<Arc<dyn Connection>>;

    /// Any live connection, the manager decides which.
    fn get_any_connection(&self) -> Option<Arc<dyn Connection>>;

    fn active_connections(&self) -> Vec<Arc<dyn Connection>>;

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>);
}

/// Notified synchronously on every connection lifecycle change. Implementations must not block;
/// hand long running work off to a task or queue.
pub trait ConnectionListener: Send + Sync {
    fn connection_added(&self, connection: &Arc<dyn Connection>);

    fn connection_removed(&self, connection: &Arc<dyn Connection>);
}
