use crate::connection::{Connection, ConnectionId};
use crate::message::ClientMessage;
use std::error::Error;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub(crate) struct TestUtilReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Debug> TestUtilReceiver<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        TestUtilReceiver { rx }
    }

    pub(crate) async fn recv(&mut self) -> T {
        self.recv_with_sanity_timeout().await.expect("Expected value")
    }

    async fn recv_with_sanity_timeout(&mut self) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
    }

    pub(crate) async fn recv_assert_timeout(&mut self, timeout: Duration) {
        if let Ok(value) = tokio::time::timeout(timeout, self.rx.recv()).await {
            panic!("Expected timeout, received {:?}", value);
        }
    }
}

/// FakeConnection records every message sent through it so tests can play the server side.
#[derive(Debug)]
pub(crate) struct FakeConnection {
    id: ConnectionId,
    member_id: Option<Uuid>,
    address: SocketAddr,
    alive: AtomicBool,
    accept_sends: AtomicBool,
    close_reasons: Mutex<Vec<String>>,
    sent: mpsc::UnboundedSender<ClientMessage>,
}

impl FakeConnection {
    pub(crate) fn new(member_id: Option<Uuid>, port: u16) -> (Arc<Self>, TestUtilReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = FakeConnection {
            id: ConnectionId::next(),
            member_id,
            address: SocketAddr::from(([127, 0, 0, 1], port)),
            alive: AtomicBool::new(true),
            accept_sends: AtomicBool::new(true),
            close_reasons: Mutex::new(Vec::new()),
            sent: tx,
        };

        (Arc::new(connection), TestUtilReceiver::new(rx))
    }

    pub(crate) fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn reject_sends(&self) {
        self.accept_sends.store(false, Ordering::Release);
    }

    pub(crate) fn close_reasons(&self) -> Vec<String> {
        self.close_reasons.lock().unwrap().clone()
    }
}

impl Connection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: ClientMessage) -> bool {
        if !self.is_alive() || !self.accept_sends.load(Ordering::Acquire) {
            return false;
        }
        self.sent.send(message).is_ok()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn close(&self, reason: &str, _cause: Option<&(dyn Error + 'static)>) {
        self.kill();
        self.close_reasons.lock().unwrap().push(reason.to_string());
    }

    fn remote_member_id(&self) -> Option<Uuid> {
        self.member_id
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.address)
    }
}
