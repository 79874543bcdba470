use crate::connection::{Connection, ConnectionListener, ConnectionManager};
use crate::invocation::{InvocationError, InvocationService};
use crate::listener::actor::{self, ActorClient, ConnectionEvent, ConnectionEventSender};
use crate::listener::dispatch::StripedExecutor;
use crate::listener::{EventHandler, EventHandlerRegistry, EventRegistration, ListenerMessageCodec};
use crate::message::ClientMessage;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListenerError {
    #[error("Listener registration failed: {0}")]
    Registration(InvocationError),
    #[error("Listener service has shut down")]
    ActorExited,
    #[error("Cancelled by the caller")]
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct ListenerServiceConfig {
    pub event_worker_count: usize,
    pub queue_capacity: usize,
}

/// ListenerService keeps server side event subscriptions installed on every live connection and
/// hands incoming events to their handlers.
pub struct ListenerService {
    logger: slog::Logger,
    actor_client: ActorClient,
    event_handlers: Arc<EventHandlerRegistry>,
    executor: StripedExecutor,
    shutdown: CancellationToken,
}

impl ListenerService {
    /// Must be called from within a tokio runtime. Subscribes to the connection manager's
    /// lifecycle notifications.
    pub fn new(
        logger: slog::Logger,
        config: ListenerServiceConfig,
        invocation_service: Arc<InvocationService>,
        event_handlers: Arc<EventHandlerRegistry>,
        connection_manager: Arc<dyn ConnectionManager>,
    ) -> Self {
        let logger = logger.new(slog::o!("component" => "ListenerService"));
        let shutdown = CancellationToken::new();

        let (actor_client, connection_events, actor) = actor::create(
            logger.clone(),
            config.queue_capacity,
            invocation_service,
            event_handlers.clone(),
            connection_manager.clone(),
            shutdown.clone(),
        );
        tokio::spawn(actor.run_event_loop());
        connection_manager.add_connection_listener(Arc::new(ConnectionEventForwarder { connection_events }));

        ListenerService {
            executor: StripedExecutor::new(logger.clone(), config.event_worker_count),
            logger,
            actor_client,
            event_handlers,
            shutdown,
        }
    }

    /// Installs the subscription on every live connection and on every connection added later.
    ///
    /// Cancellation only stops the wait: the registration may still complete in the background,
    /// and can then only be removed by an id the caller never saw.
    pub async fn register_listener(
        &self,
        codec: Arc<dyn ListenerMessageCodec>,
        handler: Arc<dyn EventHandler>,
        cancel: &CancellationToken,
    ) -> Result<Uuid, ListenerError> {
        cancellable(self.actor_client.register(codec, handler), cancel).await
    }

    /// Returns false if the listener is unknown, or if some live connection didn't confirm the
    /// removal; call again to retry the remaining connections.
    pub async fn deregister_listener(
        &self,
        user_registration_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<bool, ListenerError> {
        cancellable(self.actor_client.deregister(user_registration_id), cancel).await
    }

    /// The physical registrations currently backing a listener.
    pub async fn connection_registrations(
        &self,
        user_registration_id: Uuid,
    ) -> Result<Vec<EventRegistration>, ListenerError> {
        self.actor_client.connection_registrations(user_registration_id).await
    }

    /// `handle_event()` routes an event message to the handler of the subscription it belongs to.
    pub fn handle_event(&self, event: ClientMessage) {
        match self.event_handlers.get(event.correlation_id()) {
            Some(handler) => self.executor.execute(handler, event),
            None => slog::debug!(
                self.logger,
                "No handler for event type {:#x} with correlation id {}. Dropping it.",
                event.message_type(),
                event.correlation_id()
            ),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.executor.shutdown();
    }
}

async fn cancellable<T>(
    operation: impl Future<Output = Result<T, ListenerError>>,
    cancel: &CancellationToken,
) -> Result<T, ListenerError> {
    tokio::select! {
        result = operation => result,
        _ = cancel.cancelled() => Err(ListenerError::Cancelled),
    }
}

struct ConnectionEventForwarder {
    connection_events: ConnectionEventSender,
}

impl ConnectionListener for ConnectionEventForwarder {
    fn connection_added(&self, connection: &Arc<dyn Connection>) {
        self.connection_events.send(ConnectionEvent::Added(connection.clone()));
    }

    fn connection_removed(&self, connection: &Arc<dyn Connection>) {
        self.connection_events.send(ConnectionEvent::Removed(connection.clone()));
    }
}
