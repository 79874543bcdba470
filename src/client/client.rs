use crate::cluster::{ClusterError, ClusterService, ClusterViewListener};
use crate::connection::{Connection, ConnectionRegistry};
use crate::invocation::{InvocationFuture, InvocationService, InvocationTarget, ReaperHandle};
use crate::listener::ListenerService;
use crate::message::ClientMessage;
use crate::partition::PartitionService;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// GridClient is the running coordination engine of one client instance.
pub struct GridClient {
    logger: slog::Logger,
    initial_member_list_timeout: Duration,
    connection_registry: Arc<ConnectionRegistry>,
    partition_service: Arc<PartitionService>,
    cluster_service: Arc<ClusterService>,
    invocation_service: Arc<InvocationService>,
    listener_service: ListenerService,
    cluster_view_listener: ClusterViewListener,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl GridClient {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        logger: slog::Logger,
        initial_member_list_timeout: Duration,
        connection_registry: Arc<ConnectionRegistry>,
        partition_service: Arc<PartitionService>,
        cluster_service: Arc<ClusterService>,
        invocation_service: Arc<InvocationService>,
        listener_service: ListenerService,
        cluster_view_listener: ClusterViewListener,
        reaper: ReaperHandle,
    ) -> Self {
        GridClient {
            logger: logger.new(slog::o!("component" => "GridClient")),
            initial_member_list_timeout,
            connection_registry,
            partition_service,
            cluster_service,
            invocation_service,
            listener_service,
            cluster_view_listener,
            reaper: Mutex::new(Some(reaper)),
        }
    }

    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.connection_registry
    }

    pub fn partition_service(&self) -> &Arc<PartitionService> {
        &self.partition_service
    }

    pub fn cluster_service(&self) -> &Arc<ClusterService> {
        &self.cluster_service
    }

    pub fn invocation_service(&self) -> &Arc<InvocationService> {
        &self.invocation_service
    }

    pub fn listener_service(&self) -> &ListenerService {
        &self.listener_service
    }

    pub fn invoke(&self, request: ClientMessage, target: InvocationTarget) -> InvocationFuture {
        self.invocation_service.invoke(request, target)
    }

    /// Invokes on the member owning `key`'s partition.
    pub fn invoke_on_key_owner(&self, request: ClientMessage, key: &[u8]) -> InvocationFuture {
        let partition_id = self.partition_service.partition_id(key);
        self.invocation_service
            .invoke(request, InvocationTarget::Partition(partition_id))
    }

    /// `handle_inbound()` is the receive path: the transport calls it for every message read from
    /// `connection`.
    pub fn handle_inbound(&self, connection: &Arc<dyn Connection>, message: ClientMessage) {
        if message.is_event() {
            self.listener_service.handle_event(message);
        } else if message.is_backup_ack() {
            slog::debug!(
                self.logger,
                "Ignoring backup ack for correlation id {} from {:?}",
                message.correlation_id(),
                connection.id()
            );
        } else {
            self.invocation_service.handle_response(message);
        }
    }

    /// Waits until the first member list arrived from the cluster.
    pub async fn wait_initial_member_list(&self, cancel: &CancellationToken) -> Result<(), ClusterError> {
        self.cluster_service
            .wait_initial_member_list_fetched(self.initial_member_list_timeout, cancel)
            .await
    }

    /// Fails every pending invocation and stops all background tasks. Connections are left to
    /// the transport.
    pub fn shutdown(&self) {
        slog::info!(self.logger, "Shutting down client");
        self.reaper.lock().expect("GridClient reaper lock poison").take();
        self.cluster_view_listener.shutdown();
        self.invocation_service.shutdown();
        self.listener_service.shutdown();
    }
}
