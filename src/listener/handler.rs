use crate::message::ClientMessage;
use dashmap::DashMap;
use std::error::Error;
use std::sync::Arc;

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// EventHandler consumes the events of one subscription. Errors and panics are logged by the
/// dispatcher and never stop delivery of later events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ClientMessage) -> HandlerResult;
}

/// Correlation id to event handler, for every subscription installed on a live connection.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: DashMap<i64, Arc<dyn EventHandler>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        EventHandlerRegistry {
            handlers: DashMap::new(),
        }
    }

    pub fn add(&self, correlation_id: i64, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(correlation_id, handler);
    }

    pub fn remove(&self, correlation_id: i64) -> Option<Arc<dyn EventHandler>> {
        self.handlers.remove(&correlation_id).map(|(_, handler)| handler)
    }

    pub fn get(&self, correlation_id: i64) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&correlation_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
