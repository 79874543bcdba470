use crate::invocation::InvocationError;
use tokio::time::Duration;

/// Retries below this count are resubmitted without any delay.
pub const FAST_RETRY_COUNT: u32 = 5;

/// `should_retry()` decides if a failed attempt may be sent again. The overall invocation timeout
/// is checked separately and wins over this.
pub(crate) fn should_retry(
    error: &InvocationError,
    connection_bound: bool,
    request_retryable: bool,
    redo_operation: bool,
) -> bool {
    if connection_bound && is_connection_loss(error) {
        return false;
    }
    if error.is_connectivity() || error.is_server_retryable() {
        return true;
    }
    if error.is_target_disconnected() {
        return request_retryable || redo_operation;
    }

    false
}

fn is_connection_loss(error: &InvocationError) -> bool {
    match error {
        InvocationError::Io(_) | InvocationError::NoConnectionAvailable => true,
        InvocationError::TargetDisconnected(_) => true,
        _ => error.is_target_disconnected(),
    }
}

/// Delay before the retry numbered `retry_count` (1 for the first retry). `None` means resubmit
/// immediately.
pub(crate) fn retry_delay(retry_count: u32, max_pause: Duration) -> Option<Duration> {
    if retry_count < FAST_RETRY_COUNT {
        return None;
    }

    let exponent = (retry_count - FAST_RETRY_COUNT).min(63);
    let backoff = Duration::from_millis(1u64 << exponent);
    Some(backoff.min(max_pause))
}
