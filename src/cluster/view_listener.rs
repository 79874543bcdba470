use crate::cluster::{ClusterService, PartitionRefreshRequests};
use crate::connection::{Connection, ConnectionId, ConnectionListener, ConnectionManager};
use crate::invocation::{InvocationService, InvocationTarget};
use crate::listener::{EventHandler, EventHandlerRegistry, HandlerResult};
use crate::message::{
    decode_members_view, decode_partitions_view, ClientMessage, CLUSTER_VIEW_LISTENER_REQUEST, MEMBERS_VIEW_EVENT,
    PARTITIONS_VIEW_EVENT, PARTITIONS_VIEW_FETCH_REQUEST,
};
use crate::partition::PartitionService;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// ClusterViewListener keeps exactly one cluster view subscription alive. Member list and
/// partition table pushes received through it feed the cluster and partition services.
pub struct ClusterViewListener {
    shutdown: CancellationToken,
}

enum TopologyEvent {
    Added(Arc<dyn Connection>),
    Removed(Arc<dyn Connection>),
}

struct TopologyForwarder {
    sender: mpsc::UnboundedSender<TopologyEvent>,
}

impl ConnectionListener for TopologyForwarder {
    fn connection_added(&self, connection: &Arc<dyn Connection>) {
        let _ = self.sender.send(TopologyEvent::Added(connection.clone()));
    }

    fn connection_removed(&self, connection: &Arc<dyn Connection>) {
        let _ = self.sender.send(TopologyEvent::Removed(connection.clone()));
    }
}

impl ClusterViewListener {
    /// Must be called from within a tokio runtime. While no subscription is in place, a new one is
    /// attempted every `resubscribe_pause`.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        logger: slog::Logger,
        cluster_service: Arc<ClusterService>,
        partition_service: Arc<PartitionService>,
        invocation_service: Arc<InvocationService>,
        event_handlers: Arc<EventHandlerRegistry>,
        connection_manager: Arc<dyn ConnectionManager>,
        refresh_requests: PartitionRefreshRequests,
        resubscribe_pause: Duration,
    ) -> Self {
        let (sender, topology_events) = mpsc::unbounded_channel();
        connection_manager.add_connection_listener(Arc::new(TopologyForwarder { sender }));
        let shutdown = CancellationToken::new();

        let task = ClusterViewTask {
            logger: logger.new(slog::o!("component" => "ClusterViewListener")),
            cluster_service,
            partition_service,
            invocation_service,
            event_handlers,
            connection_manager,
            topology_events,
            refresh_requests,
            resubscribe_pause,
            shutdown: shutdown.clone(),
            subscription: None,
        };
        tokio::spawn(task.run());

        ClusterViewListener { shutdown }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// The live cluster view subscription. Events for it carry `correlation_id`.
struct Subscription {
    connection: Arc<dyn Connection>,
    correlation_id: i64,
}

struct ClusterViewTask {
    logger: slog::Logger,
    cluster_service: Arc<ClusterService>,
    partition_service: Arc<PartitionService>,
    invocation_service: Arc<InvocationService>,
    event_handlers: Arc<EventHandlerRegistry>,
    connection_manager: Arc<dyn ConnectionManager>,
    topology_events: mpsc::UnboundedReceiver<TopologyEvent>,
    refresh_requests: PartitionRefreshRequests,
    resubscribe_pause: Duration,
    shutdown: CancellationToken,
    subscription: Option<Subscription>,
}

impl ClusterViewTask {
    async fn run(mut self) {
        self.subscribe_to_any().await;

        loop {
            let unsubscribed = self.subscription.is_none();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.topology_events.recv() => self.handle_topology_event(event).await,
                Some(()) = self.refresh_requests.next() => self.fetch_partition_view(),
                _ = tokio::time::sleep(self.resubscribe_pause), if unsubscribed => self.subscribe_to_any().await,
            }
        }

        self.unsubscribe();
    }

    async fn handle_topology_event(&mut self, event: TopologyEvent) {
        match event {
            TopologyEvent::Added(connection) => {
                let has_live_subscription = matches!(&self.subscription, Some(s) if s.connection.is_alive());
                if !has_live_subscription {
                    self.subscribe(connection).await;
                }
            }
            TopologyEvent::Removed(connection) => {
                let was_source = matches!(&self.subscription, Some(s) if s.connection.id() == connection.id());
                if !was_source {
                    return;
                }
                self.unsubscribe();
                self.subscribe_to_any().await;
            }
        }
    }

    async fn subscribe_to_any(&mut self) {
        match self.connection_manager.get_any_connection() {
            Some(connection) => self.subscribe(connection).await,
            None => slog::debug!(self.logger, "No connection to receive cluster view from"),
        }
    }

    async fn subscribe(&mut self, connection: Arc<dyn Connection>) {
        self.unsubscribe();
        // The new source may be behind the old one, its first view must still be taken.
        self.cluster_service.clear_member_list_version();

        let handler = Arc::new(ClusterViewEventHandler {
            logger: self.logger.clone(),
            cluster_service: self.cluster_service.clone(),
            partition_service: self.partition_service.clone(),
            source: connection.id(),
        });
        let request = ClientMessage::new_request(CLUSTER_VIEW_LISTENER_REQUEST, Bytes::new());
        let response = self.invocation_service.invoke_with_handler(
            request,
            InvocationTarget::Connection(connection.clone()),
            Some(handler),
        );
        let result = tokio::select! {
            result = response.get() => result,
            _ = self.shutdown.cancelled() => return,
        };

        match result {
            Ok(response) => {
                slog::info!(self.logger, "Receiving cluster view from {:?}", connection.id());
                self.subscription = Some(Subscription {
                    connection,
                    correlation_id: response.correlation_id(),
                });
            }
            Err(e) => slog::warn!(
                self.logger,
                "Failed to subscribe to cluster view on {:?}: {}. Retrying in {:?}.",
                connection.id(),
                e,
                self.resubscribe_pause
            ),
        }
    }

    /// Drops the current subscription's event handler. Nothing is sent, the subscription dies with
    /// its connection.
    fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.event_handlers.remove(subscription.correlation_id);
        }
    }

    fn fetch_partition_view(&self) {
        let connection = match &self.subscription {
            Some(subscription) => subscription.connection.clone(),
            None => return,
        };
        let logger = self.logger.clone();
        let partition_service = self.partition_service.clone();
        let request = ClientMessage::new_request(PARTITIONS_VIEW_FETCH_REQUEST, Bytes::new());
        let response = self
            .invocation_service
            .invoke(request, InvocationTarget::Connection(connection.clone()));

        tokio::spawn(async move {
            let applied = match response.get().await {
                Ok(response) => decode_partitions_view(response.payload())
                    .map_err(|e| e.to_string())
                    .and_then(|view| {
                        partition_service
                            .apply_partition_view(connection.id(), view.version, &view.partitions)
                            .map_err(|e| e.to_string())
                    }),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = applied {
                slog::warn!(logger, "Partition table refresh from {:?} failed: {}", connection.id(), e);
            }
        });
    }
}

struct ClusterViewEventHandler {
    logger: slog::Logger,
    cluster_service: Arc<ClusterService>,
    partition_service: Arc<PartitionService>,
    source: ConnectionId,
}

impl EventHandler for ClusterViewEventHandler {
    fn handle(&self, event: &ClientMessage) -> HandlerResult {
        match event.message_type() {
            MEMBERS_VIEW_EVENT => {
                let view = decode_members_view(event.payload())?;
                self.cluster_service.apply_members_view(view.version, view.members);
            }
            PARTITIONS_VIEW_EVENT => {
                let view = decode_partitions_view(event.payload())?;
                self.partition_service
                    .apply_partition_view(self.source, view.version, &view.partitions)?;
            }
            other => slog::debug!(self.logger, "Ignoring cluster view event type {:#x}", other),
        }
        Ok(())
    }
}
