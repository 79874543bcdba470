use crate::listener::EventHandler;
use crate::message::ClientMessage;
use crate::partition::hash_to_index;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

struct EventTask {
    handler: Arc<dyn EventHandler>,
    event: ClientMessage,
}

/// StripedExecutor runs event handlers on a fixed set of workers. Events with the same partition
/// id always land on the same worker, so they are handled in arrival order.
pub(crate) struct StripedExecutor {
    logger: slog::Logger,
    workers: RwLock<Vec<mpsc::UnboundedSender<EventTask>>>,
}

impl StripedExecutor {
    pub(crate) fn new(logger: slog::Logger, worker_count: usize) -> Self {
        let logger = logger.new(slog::o!("component" => "EventExecutor"));
        let workers = (0..worker_count)
            .map(|stripe| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(logger.new(slog::o!("stripe" => stripe)), rx));
                tx
            })
            .collect();

        StripedExecutor {
            logger,
            workers: RwLock::new(workers),
        }
    }

    pub(crate) fn execute(&self, handler: Arc<dyn EventHandler>, event: ClientMessage) {
        let workers = self.workers.read().expect("StripedExecutor lock poison");
        if workers.is_empty() {
            slog::debug!(
                self.logger,
                "Executor is shut down. Dropping event with correlation id {}",
                event.correlation_id()
            );
            return;
        }

        let stripe = hash_to_index(event.partition_id(), workers.len() as i32) as usize;
        if workers[stripe].send(EventTask { handler, event }).is_err() {
            slog::error!(self.logger, "Event worker {} exited unexpectedly", stripe);
        }
    }

    /// Workers finish the events already queued, then exit.
    pub(crate) fn shutdown(&self) {
        self.workers.write().expect("StripedExecutor lock poison").clear();
    }
}

async fn run_worker(logger: slog::Logger, mut tasks: mpsc::UnboundedReceiver<EventTask>) {
    while let Some(task) = tasks.recv().await {
        let event = &task.event;
        match panic::catch_unwind(AssertUnwindSafe(|| task.handler.handle(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => slog::error!(
                logger,
                "Event handler failed for event type {:#x} (correlation id {}): {}",
                event.message_type(),
                event.correlation_id(),
                e
            ),
            Err(_) => slog::error!(
                logger,
                "Event handler panicked for event type {:#x} (correlation id {})",
                event.message_type(),
                event.correlation_id()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::HandlerResult;
    use crate::test_utils::{test_logger, TestUtilReceiver};
    use bytes::Bytes;
    use std::time::Duration;

    struct RecordingHandler {
        tx: mpsc::UnboundedSender<(i32, i64)>,
    }

    impl EventHandler for RecordingHandler {
        fn handle(&self, event: &ClientMessage) -> HandlerResult {
            if event.correlation_id() < 0 {
                panic!("negative ids are poison");
            }
            if event.correlation_id() == 0 {
                return Err("zero is not a valid event".into());
            }
            let _ = self.tx.send((event.partition_id(), event.correlation_id()));
            Ok(())
        }
    }

    fn event(partition_id: i32, sequence: i64) -> ClientMessage {
        ClientMessage::new_event(sequence, 0x0010_0002, partition_id, Bytes::new())
    }

    #[tokio::test]
    async fn per_partition_order_is_preserved() {
        let executor = StripedExecutor::new(test_logger(), 4);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observed = TestUtilReceiver::new(rx);
        let handler: Arc<dyn EventHandler> = Arc::new(RecordingHandler { tx });

        for sequence in 1..=50 {
            for partition_id in 0..3 {
                executor.execute(handler.clone(), event(partition_id, sequence));
            }
        }

        let mut last_seen = vec![0i64; 3];
        for _ in 0..150 {
            let (partition_id, sequence) = observed.recv().await;
            let last = &mut last_seen[partition_id as usize];
            assert_eq!(*last + 1, sequence, "partition {} out of order", partition_id);
            *last = sequence;
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_kill_worker() {
        let executor = StripedExecutor::new(test_logger(), 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observed = TestUtilReceiver::new(rx);
        let handler: Arc<dyn EventHandler> = Arc::new(RecordingHandler { tx });

        executor.execute(handler.clone(), event(-1, -5));
        executor.execute(handler.clone(), event(-1, 0));
        executor.execute(handler.clone(), event(-1, 7));

        assert_eq!(observed.recv().await, (-1, 7));
    }

    #[tokio::test]
    async fn shutdown_drops_new_events() {
        let executor = StripedExecutor::new(test_logger(), 2);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observed = TestUtilReceiver::new(rx);
        let handler: Arc<dyn EventHandler> = Arc::new(RecordingHandler { tx });

        executor.shutdown();
        executor.execute(handler.clone(), event(1, 1));

        observed.recv_assert_timeout(Duration::from_millis(30)).await;
    }
}
