use crate::client::options::ClientOptionsValidated;
use crate::client::{ClientOptions, GridClient};
use crate::cluster::{partition_refresh_channel, ClusterService, ClusterViewListener};
use crate::connection::{ConnectionManager, ConnectionRegistry};
use crate::invocation::{
    InvocationConfig, InvocationService, ReaperHandle, SmartTargetResolver, TargetResolver, UnisocketTargetResolver,
};
use crate::listener::{EventHandlerRegistry, ListenerService, ListenerServiceConfig};
use crate::partition::PartitionService;
use crate::time::RealClock;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct GridClientConfig {
    pub logger: slog::Logger,
    pub options: ClientOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
}

/// `try_create_client()` wires the coordination services together. The transport layer then
/// publishes its connections through `GridClient::connection_registry()` and feeds every inbound
/// message to `GridClient::handle_inbound()`.
pub async fn try_create_client(config: GridClientConfig) -> Result<GridClient, ClientCreationError> {
    let root_logger = config.logger;

    let options = ClientOptionsValidated::try_from(config.options)
        .map_err(|e| ClientCreationError::IllegalClientOptions(e.to_string()))?;

    let connection_registry = Arc::new(ConnectionRegistry::new(root_logger.clone()));
    let connection_manager: Arc<dyn ConnectionManager> = connection_registry.clone();
    let partition_service = Arc::new(PartitionService::new(root_logger.clone()));

    let (refresh_trigger, refresh_requests) = partition_refresh_channel();
    let cluster_service = Arc::new(ClusterService::new(
        root_logger.clone(),
        connection_manager.clone(),
        refresh_trigger,
    ));

    let resolver: Box<dyn TargetResolver> = if options.smart_routing {
        Box::new(SmartTargetResolver::new(
            connection_manager.clone(),
            partition_service.clone(),
        ))
    } else {
        Box::new(UnisocketTargetResolver::new(connection_manager.clone()))
    };
    let event_handlers = Arc::new(EventHandlerRegistry::new());
    let invocation_service = InvocationService::new(
        root_logger.clone(),
        InvocationConfig {
            invocation_timeout: options.invocation_timeout,
            retry_pause: options.invocation_retry_pause,
            redo_operation: options.redo_operation,
        },
        RealClock::shared(),
        resolver,
        event_handlers.clone(),
    );
    let reaper = ReaperHandle::spawn_background_task(options.reaper_interval, Arc::downgrade(&invocation_service));

    let listener_service = ListenerService::new(
        root_logger.clone(),
        ListenerServiceConfig {
            event_worker_count: options.event_worker_count,
            queue_capacity: options.listener_queue_capacity,
        },
        invocation_service.clone(),
        event_handlers.clone(),
        connection_manager.clone(),
    );

    let cluster_view_listener = ClusterViewListener::start(
        root_logger.clone(),
        cluster_service.clone(),
        partition_service.clone(),
        invocation_service.clone(),
        event_handlers,
        connection_manager,
        refresh_requests,
        options.invocation_retry_pause,
    );

    slog::info!(root_logger, "Client created"; "smart_routing" => options.smart_routing);

    Ok(GridClient::new(
        root_logger,
        options.initial_member_list_timeout,
        connection_registry,
        partition_service,
        cluster_service,
        invocation_service,
        listener_service,
        cluster_view_listener,
        reaper,
    ))
}
