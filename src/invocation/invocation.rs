use crate::connection::Connection;
use crate::invocation::InvocationError;
use crate::listener::EventHandler;
use crate::message::ClientMessage;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Where an invocation should be sent.
#[derive(Clone)]
pub enum InvocationTarget {
    /// Pinned to one connection. Never moved to another connection on retry.
    Connection(Arc<dyn Connection>),
    Member(Uuid),
    Partition(i32),
    /// Any connection the connection manager picks.
    Any,
}

impl InvocationTarget {
    pub fn is_connection_bound(&self) -> bool {
        matches!(self, InvocationTarget::Connection(_))
    }
}

impl fmt::Debug for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationTarget::Connection(connection) => write!(f, "Connection({:?})", connection.id()),
            InvocationTarget::Member(member_id) => write!(f, "Member({})", member_id),
            InvocationTarget::Partition(partition_id) => write!(f, "Partition({})", partition_id),
            InvocationTarget::Any => write!(f, "Any"),
        }
    }
}

type InvocationResult = Result<ClientMessage, InvocationError>;

/// Invocation is one outstanding request. It is shared between the pending table, the retry path
/// and the reaper; the result slot is written at most once.
pub(crate) struct Invocation {
    request: Mutex<ClientMessage>,
    target: InvocationTarget,
    event_handler: Option<Arc<dyn EventHandler>>,
    correlation_id: AtomicI64,
    retry_count: AtomicU32,
    start_time: Instant,
    sent_connection: Mutex<Option<Arc<dyn Connection>>>,
    result: watch::Sender<Option<InvocationResult>>,
}

impl Invocation {
    pub(crate) fn new(
        mut request: ClientMessage,
        target: InvocationTarget,
        event_handler: Option<Arc<dyn EventHandler>>,
        start_time: Instant,
    ) -> Self {
        if let InvocationTarget::Partition(partition_id) = target {
            request.set_partition_id(partition_id);
        }
        let (result, _) = watch::channel(None);

        Invocation {
            request: Mutex::new(request),
            target,
            event_handler,
            correlation_id: AtomicI64::new(0),
            retry_count: AtomicU32::new(0),
            start_time,
            sent_connection: Mutex::new(None),
            result,
        }
    }

    pub(crate) fn target(&self) -> &InvocationTarget {
        &self.target
    }

    pub(crate) fn event_handler(&self) -> Option<&Arc<dyn EventHandler>> {
        self.event_handler.as_ref()
    }

    /// Correlation id of the latest send attempt, 0 before the first one.
    pub(crate) fn correlation_id(&self) -> i64 {
        self.correlation_id.load(Ordering::Acquire)
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment_retry_count(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn start_time(&self) -> Instant {
        self.start_time
    }

    pub(crate) fn is_request_retryable(&self) -> bool {
        self.request.lock().expect("Invocation request lock poison").is_retryable()
    }

    pub(crate) fn sent_connection(&self) -> Option<Arc<dyn Connection>> {
        self.sent_connection
            .lock()
            .expect("Invocation connection lock poison")
            .clone()
    }

    /// Stamps a fresh correlation id and target connection on the request and returns the
    /// message to put on the wire.
    pub(crate) fn prepare_send(&self, correlation_id: i64, connection: Arc<dyn Connection>) -> ClientMessage {
        self.correlation_id.store(correlation_id, Ordering::Release);
        *self.sent_connection.lock().expect("Invocation connection lock poison") = Some(connection);

        let mut request = self.request.lock().expect("Invocation request lock poison");
        request.set_correlation_id(correlation_id);
        request.clone()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// Returns false if the invocation was already completed.
    pub(crate) fn complete(&self, result: InvocationResult) -> bool {
        self.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    pub(crate) fn future(&self) -> InvocationFuture {
        InvocationFuture {
            result: self.result.subscribe(),
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("correlation_id", &self.correlation_id())
            .field("target", &self.target)
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

/// InvocationFuture observes the result of an invocation. Clones observe the same result.
///
/// Dropping or cancelling a future never cancels the invocation itself; a late response is still
/// consumed by the invocation service.
#[derive(Clone)]
pub struct InvocationFuture {
    result: watch::Receiver<Option<InvocationResult>>,
}

impl InvocationFuture {
    pub async fn get(&self) -> Result<ClientMessage, InvocationError> {
        let mut result = self.result.clone();
        loop {
            if let Some(outcome) = result.borrow_and_update().as_ref() {
                return outcome.clone();
            }
            if result.changed().await.is_err() {
                // Invocation dropped without a result, only happens when the client is torn down.
                return result.borrow().clone().unwrap_or(Err(InvocationError::ClientNotActive));
            }
        }
    }

    pub async fn get_cancellable(&self, cancel: &CancellationToken) -> Result<ClientMessage, InvocationError> {
        tokio::select! {
            outcome = self.get() => outcome,
            _ = cancel.cancelled() => Err(InvocationError::Cancelled),
        }
    }

    /// The result, if the invocation already completed.
    pub fn try_get(&self) -> Option<Result<ClientMessage, InvocationError>> {
        self.result.borrow().clone()
    }
}
