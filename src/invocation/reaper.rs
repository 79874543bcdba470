use crate::invocation::InvocationService;
use std::sync::Weak;
use tokio::time::{self, Duration};

/// Keeps the reaper task alive. Dropping the handle stops the task at its next tick.
pub struct ReaperHandle {
    _stopper: stop_signal::Stopper,
}

impl ReaperHandle {
    pub fn spawn_background_task(interval: Duration, invocation_service: Weak<InvocationService>) -> Self {
        let (stopper, stop_check) = stop_signal::new();
        tokio::task::spawn(Self::reaper_task(stop_check, interval, invocation_service));

        ReaperHandle { _stopper: stopper }
    }

    async fn reaper_task(
        stop_check: stop_signal::StopCheck,
        interval: Duration,
        invocation_service: Weak<InvocationService>,
    ) {
        let mut interval = time::interval(interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if stop_check.should_stop() {
                return;
            }
            match invocation_service.upgrade() {
                Some(service) if service.is_active() => service.reap_dead_connection_invocations(),
                _ => return,
            }
        }
    }
}

mod stop_signal {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub(super) struct Stopper {
        stop_signal: Arc<AtomicBool>,
    }

    pub(super) struct StopCheck {
        stop_signal: Arc<AtomicBool>,
    }

    impl Drop for Stopper {
        fn drop(&mut self) {
            self.stop_signal.store(true, Ordering::Release);
        }
    }

    impl StopCheck {
        pub(super) fn should_stop(&self) -> bool {
            self.stop_signal.load(Ordering::Acquire)
        }
    }

    pub(super) fn new() -> (Stopper, StopCheck) {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_check = StopCheck {
            stop_signal: stop_signal.clone(),
        };

        (Stopper { stop_signal }, stop_check)
    }
}
