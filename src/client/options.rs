use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Total time an invocation may take across all its retries.
    pub invocation_timeout: Option<Duration>,
    /// Upper bound of the backoff between slow retries.
    pub invocation_retry_pause: Option<Duration>,
    /// Retry operations not marked retryable when their target disconnects. May execute such
    /// operations twice.
    pub redo_operation: Option<bool>,
    /// Route requests to the member owning the data instead of any member.
    pub smart_routing: Option<bool>,
    pub event_worker_count: Option<usize>,
    pub reaper_interval: Option<Duration>,
    pub initial_member_list_timeout: Option<Duration>,
    pub listener_queue_capacity: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct ClientOptionsValidated {
    pub invocation_timeout: Duration,
    pub invocation_retry_pause: Duration,
    pub redo_operation: bool,
    pub smart_routing: bool,
    pub event_worker_count: usize,
    pub reaper_interval: Duration,
    pub initial_member_list_timeout: Duration,
    pub listener_queue_capacity: usize,
}

impl ClientOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.invocation_timeout == Duration::from_secs(0) {
            return Err("Invocation timeout must be positive");
        }
        if self.invocation_retry_pause == Duration::from_secs(0) {
            return Err("Invocation retry pause must be positive");
        }
        if self.event_worker_count == 0 {
            return Err("Event worker count must be positive");
        }
        if self.reaper_interval == Duration::from_secs(0) {
            return Err("Reaper interval must be positive");
        }
        if self.reaper_interval >= self.invocation_timeout {
            return Err("Reaper interval must be less than the invocation timeout");
        }
        if self.initial_member_list_timeout == Duration::from_secs(0) {
            return Err("Initial member list timeout must be positive");
        }
        if self.listener_queue_capacity == 0 {
            return Err("Listener queue capacity must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ClientOptions> for ClientOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClientOptions) -> Result<Self, Self::Error> {
        let values = ClientOptionsValidated {
            invocation_timeout: options.invocation_timeout.unwrap_or(Duration::from_secs(120)),
            invocation_retry_pause: options.invocation_retry_pause.unwrap_or(Duration::from_secs(1)),
            redo_operation: options.redo_operation.unwrap_or(false),
            smart_routing: options.smart_routing.unwrap_or(true),
            event_worker_count: options.event_worker_count.unwrap_or(5),
            reaper_interval: options.reaper_interval.unwrap_or(Duration::from_millis(100)),
            initial_member_list_timeout: options
                .initial_member_list_timeout
                .unwrap_or(Duration::from_secs(120)),
            listener_queue_capacity: options.listener_queue_capacity.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClientOptionsValidated::try_from(ClientOptions::default()).unwrap();

        assert_eq!(options.invocation_timeout, Duration::from_secs(120));
        assert_eq!(options.invocation_retry_pause, Duration::from_secs(1));
        assert!(!options.redo_operation);
        assert!(options.smart_routing);
        assert_eq!(options.event_worker_count, 5);
        assert_eq!(options.reaper_interval, Duration::from_millis(100));
        assert_eq!(options.listener_queue_capacity, 64);
    }

    #[test]
    fn rejects_illegal_values() {
        let zero_workers = ClientOptions {
            event_worker_count: Some(0),
            ..Default::default()
        };
        assert!(ClientOptionsValidated::try_from(zero_workers).is_err());

        let slow_reaper = ClientOptions {
            invocation_timeout: Some(Duration::from_secs(1)),
            reaper_interval: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        assert!(ClientOptionsValidated::try_from(slow_reaper).is_err());

        let no_timeout = ClientOptions {
            invocation_timeout: Some(Duration::from_secs(0)),
            ..Default::default()
        };
        assert!(ClientOptionsValidated::try_from(no_timeout).is_err());
    }
}
