use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Clock is the source of "now" for invocation deadlines and retry backoff. Invocations only ever
/// hold an `Arc<dyn Clock>`, so tests can swap in a mocked clock and drive time by hand.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep_until(&self, deadline: Instant);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone, Default)]
pub struct RealClock;

impl RealClock {
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(RealClock)
    }
}

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

// TODO:3 export mocks behind a test-util feature flag so downstream crates can drive invocation
//        deadlines too.
#[allow(dead_code)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

#[allow(dead_code)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut current_time = self.current_time.clone();
        loop {
            if *current_time.borrow() >= deadline {
                return;
            }

            if current_time.changed().await.is_err() {
                // Controller dropped, time will never move again.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[allow(dead_code)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

#[allow(dead_code)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.current_time.borrow()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.time_of_instantiation
    }

    /// Advancing by large steps can cause surprising behavior in `sleep_until()` usage. The only
    /// promise of mock `sleep_until` is that it returns when `now` is at or past the deadline, so
    /// advance in increments smaller than the granularity you want to observe.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let new_now = *self.current_time.borrow() + duration;
        self.current_time.send_replace(new_now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Of course we test our test utility! How else will we know it works.
    #[tokio::test]
    async fn mock_clock() {
        let tick_duration = Duration::from_millis(500);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (mock_clock, mut controller) = mocked_clock();
        let test_start_time = controller.current_time();

        tokio::spawn(async move {
            let mut next_wake = test_start_time;
            loop {
                next_wake += tick_duration;
                mock_clock.sleep_until(next_wake).await;
                if tx.send(()).is_err() {
                    return;
                }
            }
        });

        // Half-tick offset to avoid off-by-1.
        controller.advance(tick_duration / 2);
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(tick_duration);
        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(tick_duration * 3);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("Expected timeout");

        assert_eq!(controller.elapsed_time(), tick_duration * 9 / 2);
    }

    #[tokio::test]
    async fn mock_clock_sleep_is_relative_to_mocked_now() {
        let (mock_clock, mut controller) = mocked_clock();
        let sleeper = tokio::spawn(async move {
            mock_clock.sleep(Duration::from_secs(10)).await;
        });

        controller.advance(Duration::from_secs(9));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sleeper.is_finished());

        controller.advance(Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleeper should wake")
            .unwrap();
    }
}
