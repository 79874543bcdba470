use crate::connection::{Connection, ConnectionManager};
use crate::invocation::{InvocationError, InvocationService, InvocationTarget};
use crate::listener::registration::ListenerRegistration;
use crate::listener::{EventHandler, EventHandlerRegistry, EventRegistration, ListenerError, ListenerMessageCodec};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) fn create(
    logger: slog::Logger,
    queue_capacity: usize,
    invocation_service: Arc<InvocationService>,
    event_handlers: Arc<EventHandlerRegistry>,
    connection_manager: Arc<dyn ConnectionManager>,
    shutdown: CancellationToken,
) -> (ActorClient, ConnectionEventSender, ListenerActor) {
    let (request_tx, request_rx) = mpsc::channel(queue_capacity);
    let (connection_tx, connection_rx) = mpsc::unbounded_channel();

    let actor = ListenerActor {
        logger: logger.new(slog::o!("component" => "ListenerActor")),
        requests: request_rx,
        connection_events: connection_rx,
        shutdown,
        invocation_service,
        event_handlers,
        connection_manager,
        registrations: HashMap::new(),
    };

    (
        ActorClient { sender: request_tx },
        ConnectionEventSender { sender: connection_tx },
        actor,
    )
}

enum Request {
    Register(
        Arc<dyn ListenerMessageCodec>,
        Arc<dyn EventHandler>,
        Callback<Uuid, ListenerError>,
    ),
    Deregister(Uuid, Callback<bool, ListenerError>),
    ConnectionRegistrations(Uuid, Callback<Vec<EventRegistration>, ListenerError>),
}

#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Added(Arc<dyn Connection>),
    Removed(Arc<dyn Connection>),
}

struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Request>,
}

impl ActorClient {
    pub(crate) async fn register(
        &self,
        codec: Arc<dyn ListenerMessageCodec>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Uuid, ListenerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Register(codec, handler, Callback(tx))).await?;
        rx.await.map_err(|_| ListenerError::ActorExited)?
    }

    pub(crate) async fn deregister(&self, user_registration_id: Uuid) -> Result<bool, ListenerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Deregister(user_registration_id, Callback(tx))).await?;
        rx.await.map_err(|_| ListenerError::ActorExited)?
    }

    pub(crate) async fn connection_registrations(
        &self,
        user_registration_id: Uuid,
    ) -> Result<Vec<EventRegistration>, ListenerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::ConnectionRegistrations(user_registration_id, Callback(tx)))
            .await?;
        rx.await.map_err(|_| ListenerError::ActorExited)?
    }

    async fn send(&self, request: Request) -> Result<(), ListenerError> {
        self.sender.send(request).await.map_err(|_| ListenerError::ActorExited)
    }
}

/// Connection lifecycle notifications arrive synchronously on the transport's thread; this just
/// queues them for the actor.
#[derive(Clone)]
pub(crate) struct ConnectionEventSender {
    sender: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionEventSender {
    pub(crate) fn send(&self, event: ConnectionEvent) {
        // Actor gone means the client shut down.
        let _ = self.sender.send(event);
    }
}

/// ListenerActor owns every listener registration. Registration, deregistration and connection
/// topology changes are handled one at a time, so a subscription can't be installed twice on the
/// same connection or leak on a connection that is going away.
pub(crate) struct ListenerActor {
    logger: slog::Logger,
    requests: mpsc::Receiver<Request>,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    shutdown: CancellationToken,
    invocation_service: Arc<InvocationService>,
    event_handlers: Arc<EventHandlerRegistry>,
    connection_manager: Arc<dyn ConnectionManager>,
    registrations: HashMap<Uuid, ListenerRegistration>,
}

impl ListenerActor {
    pub(crate) async fn run_event_loop(mut self) {
        loop {
            // Connection changes go first: a registration request must see the newest topology.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.connection_events.recv() => self.handle_connection_event(event).await,
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
            }
        }
        slog::info!(self.logger, "Listener actor exiting");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Register(codec, handler, callback) => {
                let result = self.register(codec, handler).await;
                callback.send(result);
            }
            Request::Deregister(user_registration_id, callback) => {
                let result = self.deregister(user_registration_id).await;
                callback.send(Ok(result));
            }
            Request::ConnectionRegistrations(user_registration_id, callback) => {
                let registrations = self
                    .registrations
                    .get(&user_registration_id)
                    .map(|r| r.connection_registrations.values().cloned().collect())
                    .unwrap_or_default();
                callback.send(Ok(registrations));
            }
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Added(connection) => self.connection_added(connection).await,
            ConnectionEvent::Removed(connection) => self.connection_removed(connection),
        }
    }

    async fn register(
        &mut self,
        codec: Arc<dyn ListenerMessageCodec>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Uuid, ListenerError> {
        let user_registration_id = Uuid::new_v4();
        let mut registration = ListenerRegistration::new(codec, handler);

        for connection in self.connection_manager.active_connections() {
            match self.register_on_connection(&registration, &connection).await {
                Ok(event_registration) => {
                    registration
                        .connection_registrations
                        .insert(connection.id(), event_registration);
                }
                Err(e) if !connection.is_alive() => {
                    slog::debug!(
                        self.logger,
                        "Ignoring listener registration failure on closed {:?}: {}",
                        connection.id(),
                        e
                    );
                }
                Err(e) => {
                    slog::warn!(
                        self.logger,
                        "Listener registration failed on {:?}: {}. Rolling back.",
                        connection.id(),
                        e
                    );
                    self.roll_back(registration);
                    return Err(ListenerError::Registration(e));
                }
            }
        }

        slog::debug!(
            self.logger,
            "Registered listener {} on {} connections",
            user_registration_id,
            registration.connection_registrations.len()
        );
        self.registrations.insert(user_registration_id, registration);
        Ok(user_registration_id)
    }

    /// Returns true once every connection that is still alive confirmed the removal. Otherwise the
    /// unconfirmed registrations are kept so a later call can try again.
    async fn deregister(&mut self, user_registration_id: Uuid) -> bool {
        let mut registration = match self.registrations.remove(&user_registration_id) {
            Some(registration) => registration,
            None => return false,
        };

        let mut successful = true;
        let event_registrations: Vec<EventRegistration> =
            registration.connection_registrations.values().cloned().collect();
        for event_registration in event_registrations {
            let connection = event_registration.connection.clone();
            let removed = match registration.codec.encode_remove_request(event_registration.server_registration_id) {
                Some(request) => self
                    .invocation_service
                    .invoke(request, InvocationTarget::Connection(connection.clone()))
                    .get()
                    .await
                    .map(|_| ()),
                None => Ok(()),
            };

            match removed {
                Err(e) if connection.is_alive() => {
                    slog::warn!(
                        self.logger,
                        "Deregistration of listener {} failed on {:?}: {}",
                        user_registration_id,
                        connection.id(),
                        e
                    );
                    successful = false;
                }
                _ => {
                    self.event_handlers.remove(event_registration.correlation_id);
                    registration.connection_registrations.remove(&connection.id());
                }
            }
        }

        if !successful {
            self.registrations.insert(user_registration_id, registration);
        }
        successful
    }

    async fn connection_added(&mut self, connection: Arc<dyn Connection>) {
        let user_registration_ids: Vec<Uuid> = self.registrations.keys().cloned().collect();
        for user_registration_id in user_registration_ids {
            let result = match self.registrations.get(&user_registration_id) {
                Some(registration) if !registration.connection_registrations.contains_key(&connection.id()) => {
                    self.register_on_connection(registration, &connection).await
                }
                _ => continue,
            };

            match result {
                Ok(event_registration) => {
                    if let Some(registration) = self.registrations.get_mut(&user_registration_id) {
                        registration
                            .connection_registrations
                            .insert(connection.id(), event_registration);
                    }
                }
                Err(e) => {
                    slog::warn!(
                        self.logger,
                        "Failed to register listener {} on new {:?}: {}",
                        user_registration_id,
                        connection.id(),
                        e
                    );
                }
            }
        }
    }

    fn connection_removed(&mut self, connection: Arc<dyn Connection>) {
        for registration in self.registrations.values_mut() {
            if let Some(event_registration) = registration.connection_registrations.remove(&connection.id()) {
                self.event_handlers.remove(event_registration.correlation_id);
            }
        }
    }

    async fn register_on_connection(
        &self,
        registration: &ListenerRegistration,
        connection: &Arc<dyn Connection>,
    ) -> Result<EventRegistration, InvocationError> {
        let response = self
            .invocation_service
            .invoke_with_handler(
                registration.codec.encode_add_request(),
                InvocationTarget::Connection(connection.clone()),
                Some(registration.handler.clone()),
            )
            .get()
            .await?;

        let server_registration_id = match registration.codec.decode_add_response(&response) {
            Ok(id) => id,
            Err(e) => {
                self.event_handlers.remove(response.correlation_id());
                return Err(e.into());
            }
        };

        Ok(EventRegistration {
            server_registration_id,
            correlation_id: response.correlation_id(),
            connection: connection.clone(),
        })
    }

    /// Best effort: handlers are dropped right away, server side removals are not awaited.
    fn roll_back(&self, registration: ListenerRegistration) {
        for event_registration in registration.connection_registrations.values() {
            self.event_handlers.remove(event_registration.correlation_id);
            if let Some(request) = registration
                .codec
                .encode_remove_request(event_registration.server_registration_id)
            {
                let _ = self.invocation_service.invoke(
                    request,
                    InvocationTarget::Connection(event_registration.connection.clone()),
                );
            }
        }
    }
}
