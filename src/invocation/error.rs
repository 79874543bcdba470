use crate::message::{CodecError, ServerError, ServerErrorCode};
use tokio::time::Duration;

/// InvocationError is `Clone` because a single invocation result can be observed by any number of
/// waiters.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InvocationError {
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("No connection available to send the request")]
    NoConnectionAvailable,
    #[error("Target disconnected: {0}")]
    TargetDisconnected(String),
    #[error("Server error: {0}")]
    Server(ServerError),
    #[error("Client is not active")]
    ClientNotActive,
    #[error("Invocation timed out after {elapsed:?}. Last failure: {cause}")]
    Timeout {
        elapsed: Duration,
        cause: Box<InvocationError>,
    },
    #[error("Invocation was cancelled by the caller")]
    Cancelled,
    #[error("Correlation id {0} is already in use")]
    DuplicateCorrelationId(i64),
    #[error("Failed to decode response: {0}")]
    Codec(#[from] CodecError),
}

impl InvocationError {
    /// The request may never have reached a healthy member.
    pub fn is_connectivity(&self) -> bool {
        match self {
            InvocationError::Io(_) | InvocationError::NoConnectionAvailable => true,
            InvocationError::Server(error) => {
                matches!(error.code, ServerErrorCode::Io | ServerErrorCode::InstanceNotActive)
            }
            _ => false,
        }
    }

    /// The request may or may not have been executed before its target went away.
    pub fn is_target_disconnected(&self) -> bool {
        match self {
            InvocationError::TargetDisconnected(_) => true,
            InvocationError::Server(error) => matches!(
                error.code,
                ServerErrorCode::TargetDisconnected | ServerErrorCode::TargetNotMember
            ),
            _ => false,
        }
    }

    pub fn is_server_retryable(&self) -> bool {
        matches!(self, InvocationError::Server(error) if error.retryable)
    }
}
