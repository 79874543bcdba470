use crate::connection::{Connection, ConnectionId};
use crate::listener::EventHandler;
use crate::message::{decode_listener_registration_id, ClientMessage, CodecError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// ListenerMessageCodec builds the per-connection subscribe and unsubscribe requests for one kind
/// of listener, and reads the server-assigned registration id from a subscribe response.
pub trait ListenerMessageCodec: Send + Sync {
    fn encode_add_request(&self) -> ClientMessage;

    fn decode_add_response(&self, response: &ClientMessage) -> Result<Uuid, CodecError> {
        decode_listener_registration_id(response.payload())
    }

    /// `None` when the subscription can't be removed server side (it dies with the connection).
    fn encode_remove_request(&self, server_registration_id: Uuid) -> Option<ClientMessage>;
}

/// The physical subscription of a listener on one connection.
#[derive(Clone)]
pub struct EventRegistration {
    pub server_registration_id: Uuid,
    /// Events for this subscription carry this correlation id.
    pub correlation_id: i64,
    pub connection: Arc<dyn Connection>,
}

impl fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistration")
            .field("server_registration_id", &self.server_registration_id)
            .field("correlation_id", &self.correlation_id)
            .field("connection", &self.connection.id())
            .finish()
    }
}

/// A logical subscription and its physical registrations, one per connection.
pub(crate) struct ListenerRegistration {
    pub(crate) codec: Arc<dyn ListenerMessageCodec>,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) connection_registrations: HashMap<ConnectionId, EventRegistration>,
}

impl ListenerRegistration {
    pub(crate) fn new(codec: Arc<dyn ListenerMessageCodec>, handler: Arc<dyn EventHandler>) -> Self {
        ListenerRegistration {
            codec,
            handler,
            connection_registrations: HashMap::new(),
        }
    }
}
