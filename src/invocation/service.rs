use crate::invocation::invocation::Invocation;
use crate::invocation::retry::{retry_delay, should_retry};
use crate::invocation::{InvocationError, InvocationFuture, InvocationTarget, TargetResolver};
use crate::listener::{EventHandler, EventHandlerRegistry};
use crate::message::{ClientMessage, ServerError};
use crate::time::Clock;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

#[derive(Clone, Debug)]
pub struct InvocationConfig {
    pub invocation_timeout: Duration,
    /// Upper bound of the exponential backoff between slow retries.
    pub retry_pause: Duration,
    /// Retry requests not marked retryable after their target disconnected.
    pub redo_operation: bool,
}

/// InvocationService sends requests, matches responses to them by correlation id and drives
/// retries until an invocation completes, fails permanently or times out.
///
/// Methods that may schedule a retry take `self: &Arc<Self>`, the retry task keeps the service
/// alive until it runs.
pub struct InvocationService {
    logger: slog::Logger,
    config: InvocationConfig,
    clock: Arc<dyn Clock>,
    resolver: Box<dyn TargetResolver>,
    event_handlers: Arc<EventHandlerRegistry>,
    pending: DashMap<i64, Arc<Invocation>>,
    next_correlation_id: AtomicI64,
    active: AtomicBool,
}

impl InvocationService {
    pub fn new(
        logger: slog::Logger,
        config: InvocationConfig,
        clock: Arc<dyn Clock>,
        resolver: Box<dyn TargetResolver>,
        event_handlers: Arc<EventHandlerRegistry>,
    ) -> Arc<Self> {
        Arc::new(InvocationService {
            logger: logger.new(slog::o!("component" => "InvocationService")),
            config,
            clock,
            resolver,
            event_handlers,
            pending: DashMap::new(),
            next_correlation_id: AtomicI64::new(1),
            active: AtomicBool::new(true),
        })
    }

    pub fn invoke(self: &Arc<Self>, request: ClientMessage, target: InvocationTarget) -> InvocationFuture {
        self.invoke_with_handler(request, target, None)
    }

    /// Like `invoke()`, and routes events carrying the request's correlation id to `handler` for
    /// as long as the invocation's connection lives. Used to install event subscriptions.
    pub fn invoke_with_handler(
        self: &Arc<Self>,
        request: ClientMessage,
        target: InvocationTarget,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> InvocationFuture {
        let invocation = Arc::new(Invocation::new(request, target, handler, self.clock.now()));
        let future = invocation.future();
        self.send(invocation);
        future
    }

    /// `handle_response()` completes the invocation a response belongs to. Error responses go
    /// through the retry policy before the caller sees them.
    pub fn handle_response(self: &Arc<Self>, response: ClientMessage) {
        let correlation_id = response.correlation_id();
        let invocation = match self.pending.remove(&correlation_id) {
            Some((_, invocation)) => invocation,
            None => {
                slog::warn!(
                    self.logger,
                    "No pending invocation for response with correlation id {}, message type {:#x}. Dropping it.",
                    correlation_id,
                    response.message_type()
                );
                return;
            }
        };

        if !response.is_error() {
            invocation.complete(Ok(response));
            return;
        }

        let error = match ServerError::decode(response.payload()) {
            Ok(server_error) => InvocationError::Server(server_error),
            Err(codec_error) => InvocationError::Codec(codec_error),
        };
        self.handle_failure(invocation, error);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fails every pending invocation with `ClientNotActive`. Nothing is sent or retried after.
    pub fn shutdown(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let correlation_ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        slog::info!(
            self.logger,
            "Shutting down. Failing {} pending invocations.",
            correlation_ids.len()
        );
        for correlation_id in correlation_ids {
            if let Some((_, invocation)) = self.pending.remove(&correlation_id) {
                self.discard_event_handler(&invocation);
                invocation.complete(Err(InvocationError::ClientNotActive));
            }
        }
    }

    /// Fails invocations whose connection died after the request was handed to it.
    pub(crate) fn reap_dead_connection_invocations(self: &Arc<Self>) {
        let dead: Vec<i64> = self
            .pending
            .iter()
            .filter(|entry| matches!(entry.value().sent_connection(), Some(c) if !c.is_alive()))
            .map(|entry| *entry.key())
            .collect();

        for correlation_id in dead {
            if let Some((_, invocation)) = self.pending.remove(&correlation_id) {
                let connection_id = invocation.sent_connection().map(|c| c.id());
                slog::debug!(
                    self.logger,
                    "Reaping invocation {:?}, its connection {:?} is closed",
                    invocation,
                    connection_id
                );
                self.handle_failure(
                    invocation,
                    InvocationError::TargetDisconnected(format!("{:?} closed", connection_id)),
                );
            }
        }
    }

    fn next_correlation_id(&self) -> i64 {
        self.next_correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(self: &Arc<Self>, invocation: Arc<Invocation>) {
        if !self.is_active() {
            invocation.complete(Err(InvocationError::ClientNotActive));
            return;
        }

        let connection = match self.resolver.resolve(invocation.target()) {
            Some(connection) => connection,
            None => {
                self.handle_failure(invocation, InvocationError::NoConnectionAvailable);
                return;
            }
        };

        let correlation_id = self.next_correlation_id();
        let message = invocation.prepare_send(correlation_id, connection.clone());

        match self.pending.entry(correlation_id) {
            Entry::Occupied(_) => {
                slog::error!(self.logger, "Correlation id {} is already pending", correlation_id);
                invocation.complete(Err(InvocationError::DuplicateCorrelationId(correlation_id)));
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(invocation.clone());
            }
        }
        if let Some(handler) = invocation.event_handler() {
            self.event_handlers.add(correlation_id, handler.clone());
        }

        // Lost the race with shutdown(), which may have drained the table before our insert.
        if !self.is_active() {
            if self.pending.remove(&correlation_id).is_some() {
                self.discard_event_handler(&invocation);
                invocation.complete(Err(InvocationError::ClientNotActive));
            }
            return;
        }

        if !connection.send(message) {
            if self.pending.remove(&correlation_id).is_none() {
                // Already completed by a response or the reaper.
                return;
            }
            let error = if connection.is_alive() {
                InvocationError::Io(format!("{:?} rejected the request", connection.id()))
            } else {
                InvocationError::TargetDisconnected(format!("{:?} is closed", connection.id()))
            };
            self.handle_failure(invocation, error);
        }
    }

    /// Every failed attempt ends up here, after the invocation left the pending table.
    fn handle_failure(self: &Arc<Self>, invocation: Arc<Invocation>, error: InvocationError) {
        self.discard_event_handler(&invocation);

        if !self.is_active() {
            invocation.complete(Err(InvocationError::ClientNotActive));
            return;
        }

        let elapsed = self.clock.now().saturating_duration_since(invocation.start_time());
        if elapsed >= self.config.invocation_timeout {
            slog::debug!(
                self.logger,
                "Invocation {:?} timed out after {:?}. Last failure: {}",
                invocation,
                elapsed,
                error
            );
            invocation.complete(Err(InvocationError::Timeout {
                elapsed,
                cause: Box::new(error),
            }));
            return;
        }

        let retryable = should_retry(
            &error,
            invocation.target().is_connection_bound(),
            invocation.is_request_retryable(),
            self.config.redo_operation,
        );
        if !retryable {
            slog::debug!(self.logger, "Invocation {:?} failed: {}", invocation, error);
            invocation.complete(Err(error));
            return;
        }

        self.schedule_retry(invocation, error);
    }

    fn schedule_retry(self: &Arc<Self>, invocation: Arc<Invocation>, cause: InvocationError) {
        let retry_count = invocation.increment_retry_count();
        let delay = retry_delay(retry_count, self.config.retry_pause);
        slog::debug!(
            self.logger,
            "Retrying invocation {:?} after {:?}. Cause: {}",
            invocation,
            delay.unwrap_or_default(),
            cause
        );

        let service = self.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                service.clock.sleep(delay).await;
            }
            service.send(invocation);
        });
    }

    fn discard_event_handler(&self, invocation: &Invocation) {
        if invocation.event_handler().is_some() {
            self.event_handlers.remove(invocation.correlation_id());
        }
    }
}
