use crate::cluster::events::{
    InitialMembershipEvent, MembershipEvent, MembershipEventType, MembershipListener, PartitionRefreshTrigger,
};
use crate::cluster::member::{Member, MemberInfo, MemberListSnapshot};
use crate::connection::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ClusterError {
    #[error("Timed out after {0:?} waiting for the initial member list")]
    InitialMemberListTimeout(Duration),
    #[error("Cancelled while waiting for the initial member list")]
    Cancelled,
    #[error("Cluster service has shut down")]
    ShutDown,
}

struct RegisteredListener {
    listener: Arc<dyn MembershipListener>,
    wants_initial_membership: bool,
}

enum Delivery {
    Init(Arc<dyn MembershipListener>, InitialMembershipEvent),
    Event(Arc<dyn MembershipListener>, MembershipEvent),
}

/// ClusterService tracks the versioned member list and turns member list changes into ordered
/// membership events.
///
/// Snapshots are replaced, never mutated. Every writer (and listener registration) goes through
/// `view_lock`, and the callbacks it produces are queued while holding it, so each listener sees
/// one consistent history: an initial view first, then the changes after that view. The queue is
/// drained by a dispatcher task, so listener code itself never runs under the lock.
pub struct ClusterService {
    logger: slog::Logger,
    connection_manager: Arc<dyn ConnectionManager>,
    partition_refresh: PartitionRefreshTrigger,
    snapshot: RwLock<Arc<MemberListSnapshot>>,
    view_lock: Mutex<HashMap<Uuid, RegisteredListener>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    initial_list_fetched: watch::Sender<bool>,
}

impl ClusterService {
    /// Must be called from within a tokio runtime, it spawns the membership event dispatcher.
    pub fn new(
        logger: slog::Logger,
        connection_manager: Arc<dyn ConnectionManager>,
        partition_refresh: PartitionRefreshTrigger,
    ) -> Self {
        let logger = logger.new(slog::o!("component" => "ClusterService"));
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(logger.clone(), deliveries_rx));
        let (initial_list_fetched, _) = watch::channel(false);

        ClusterService {
            logger,
            connection_manager,
            partition_refresh,
            snapshot: RwLock::new(Arc::new(MemberListSnapshot::unsynchronized())),
            view_lock: Mutex::new(HashMap::new()),
            deliveries: deliveries_tx,
            initial_list_fetched,
        }
    }

    pub fn member_list_snapshot(&self) -> Arc<MemberListSnapshot> {
        self.snapshot.read().expect("ClusterService snapshot lock poison").clone()
    }

    pub fn members(&self) -> Vec<Member> {
        self.member_list_snapshot().members().to_vec()
    }

    pub fn member(&self, id: &Uuid) -> Option<Member> {
        self.member_list_snapshot().member(id).cloned()
    }

    pub fn member_list_version(&self) -> i32 {
        self.member_list_snapshot().version()
    }

    /// Registers a listener. If `wants_initial_membership` is set and a member list is already
    /// known, the listener's `init()` is queued before any later change.
    pub fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>, wants_initial_membership: bool) -> Uuid {
        let registration_id = Uuid::new_v4();
        let mut listeners = self.view_lock.lock().expect("ClusterService view lock poison");

        if wants_initial_membership {
            let snapshot = self.member_list_snapshot();
            // Before the first view the listener gets init() from apply_initial_state() instead.
            if snapshot.is_synchronized() {
                self.deliver(Delivery::Init(
                    listener.clone(),
                    InitialMembershipEvent {
                        members: snapshot.members().to_vec(),
                    },
                ));
            }
        }

        listeners.insert(
            registration_id,
            RegisteredListener {
                listener,
                wants_initial_membership,
            },
        );
        registration_id
    }

    pub fn remove_membership_listener(&self, registration_id: &Uuid) -> bool {
        self.view_lock
            .lock()
            .expect("ClusterService view lock poison")
            .remove(registration_id)
            .is_some()
    }

    /// `apply_members_view()` handles a members view pushed by the cluster.
    ///
    /// The first view only produces `init()` callbacks. Later views are applied if their version
    /// is newer than the current one, and produce Removed events followed by Added events.
    pub fn apply_members_view(&self, version: i32, member_infos: Vec<MemberInfo>) {
        let current = self.member_list_snapshot();
        if current.is_synchronized() && version <= current.version() {
            slog::debug!(
                self.logger,
                "Ignoring members view version {}, current version is {}",
                version,
                current.version()
            );
            return;
        }

        let new_snapshot = Arc::new(MemberListSnapshot::new(
            version,
            member_infos.into_iter().map(Member::from).collect(),
        ));

        let listeners = self.view_lock.lock().expect("ClusterService view lock poison");
        let previous = self.member_list_snapshot();

        if !previous.is_synchronized() {
            self.apply_initial_state(&listeners, new_snapshot);
            return;
        }

        // Re-check, another view may have been applied since the unlocked check.
        if version <= previous.version() {
            return;
        }

        self.store_snapshot(new_snapshot.clone());
        let (removed, added) = diff_members(&previous, &new_snapshot);
        let current_members = new_snapshot.members().to_vec();
        for member in removed.iter() {
            self.deliver_to_all(&listeners, MembershipEventType::Removed, member, &current_members);
        }
        for member in added.iter() {
            self.deliver_to_all(&listeners, MembershipEventType::Added, member, &current_members);
        }
        drop(listeners);

        if removed.is_empty() && added.is_empty() {
            return;
        }
        slog::info!(self.logger, "{}", new_snapshot);

        for member in removed.iter() {
            if let Some(connection) = self.connection_manager.get_connection(&member.id()) {
                connection.close(
                    "The client has closed the connection to this member, after receiving a member left event from the cluster.",
                    None,
                );
            }
        }
        self.partition_refresh.request_refresh();
    }

    /// Resets the version to 0, keeping the members, so the next view is accepted regardless of
    /// its version. Does nothing before the first view.
    pub fn clear_member_list_version(&self) {
        let _listeners = self.view_lock.lock().expect("ClusterService view lock poison");
        let current = self.member_list_snapshot();
        if current.is_synchronized() {
            slog::debug!(self.logger, "Resetting member list version to 0");
            self.store_snapshot(Arc::new(current.with_version(0)));
        }
    }

    /// Waits until the first members view has been applied.
    pub async fn wait_initial_member_list_fetched(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ClusterError> {
        let mut fetched = self.initial_list_fetched.subscribe();
        let wait = async {
            loop {
                if *fetched.borrow() {
                    return Ok(());
                }
                if fetched.changed().await.is_err() {
                    return Err(ClusterError::ShutDown);
                }
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, wait) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ClusterError::InitialMemberListTimeout(timeout)),
            },
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
        }
    }

    fn apply_initial_state(&self, listeners: &HashMap<Uuid, RegisteredListener>, snapshot: Arc<MemberListSnapshot>) {
        self.store_snapshot(snapshot.clone());
        slog::info!(self.logger, "{}", snapshot);

        let event = InitialMembershipEvent {
            members: snapshot.members().to_vec(),
        };
        for registered in listeners.values().filter(|r| r.wants_initial_membership) {
            self.deliver(Delivery::Init(registered.listener.clone(), event.clone()));
        }
        self.initial_list_fetched.send_replace(true);
    }

    fn store_snapshot(&self, snapshot: Arc<MemberListSnapshot>) {
        *self.snapshot.write().expect("ClusterService snapshot lock poison") = snapshot;
    }

    fn deliver_to_all(
        &self,
        listeners: &HashMap<Uuid, RegisteredListener>,
        event_type: MembershipEventType,
        member: &Member,
        current_members: &[Member],
    ) {
        for registered in listeners.values() {
            self.deliver(Delivery::Event(
                registered.listener.clone(),
                MembershipEvent {
                    member: member.clone(),
                    event_type,
                    members: current_members.to_vec(),
                },
            ));
        }
    }

    fn deliver(&self, delivery: Delivery) {
        if self.deliveries.send(delivery).is_err() {
            slog::warn!(self.logger, "Membership event dispatcher has exited. Dropping event.");
        }
    }
}

/// Members that left (in previous order) and members that joined (in new order).
fn diff_members(previous: &MemberListSnapshot, current: &MemberListSnapshot) -> (Vec<Member>, Vec<Member>) {
    let current_ids: HashSet<Uuid> = current.members().iter().map(|m| m.id()).collect();
    let removed = previous
        .members()
        .iter()
        .filter(|m| !current_ids.contains(&m.id()))
        .cloned()
        .collect();
    let added = current
        .members()
        .iter()
        .filter(|m| !previous.contains(&m.id()))
        .cloned()
        .collect();

    (removed, added)
}

async fn run_dispatcher(logger: slog::Logger, mut deliveries: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = deliveries.recv().await {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match &delivery {
            Delivery::Init(listener, event) => listener.init(event),
            Delivery::Event(listener, event) => match event.event_type {
                MembershipEventType::Added => listener.member_added(event),
                MembershipEventType::Removed => listener.member_removed(event),
            },
        }));
        if result.is_err() {
            slog::error!(logger, "Membership listener panicked. Continuing with the next event.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::events::partition_refresh_channel;
    use crate::connection::{Connection, ConnectionRegistry};
    use crate::test_utils::{test_logger, FakeConnection, TestUtilReceiver};
    use std::net::SocketAddr;

    #[derive(Debug, Clone, PartialEq)]
    enum Observed {
        Init(Vec<Uuid>),
        Added(Uuid),
        Removed(Uuid),
    }

    struct ChannelListener {
        tx: mpsc::UnboundedSender<Observed>,
    }

    impl ChannelListener {
        fn new() -> (Arc<Self>, TestUtilReceiver<Observed>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(ChannelListener { tx }), TestUtilReceiver::new(rx))
        }
    }

    impl MembershipListener for ChannelListener {
        fn init(&self, event: &InitialMembershipEvent) {
            let _ = self.tx.send(Observed::Init(event.members.iter().map(|m| m.id()).collect()));
        }

        fn member_added(&self, event: &MembershipEvent) {
            let _ = self.tx.send(Observed::Added(event.member.id()));
        }

        fn member_removed(&self, event: &MembershipEvent) {
            let _ = self.tx.send(Observed::Removed(event.member.id()));
        }
    }

    struct PanickingListener;

    impl MembershipListener for PanickingListener {
        fn member_added(&self, _event: &MembershipEvent) {
            panic!("listener bug");
        }

        fn member_removed(&self, _event: &MembershipEvent) {}
    }

    fn member_info(id: Uuid, port: u16) -> MemberInfo {
        MemberInfo {
            id,
            address: SocketAddr::from(([10, 0, 0, 1], port)),
            attributes: HashMap::new(),
            lite_member: false,
        }
    }

    fn new_cluster_service() -> (ClusterService, Arc<ConnectionRegistry>, crate::cluster::PartitionRefreshRequests) {
        let registry = Arc::new(ConnectionRegistry::new(test_logger()));
        let (trigger, requests) = partition_refresh_channel();
        let service = ClusterService::new(test_logger(), registry.clone(), trigger);
        (service, registry, requests)
    }

    const QUIET: Duration = Duration::from_millis(30);

    #[tokio::test]
    async fn membership_scenario() {
        let (service, _registry, mut refresh_requests) = new_cluster_service();
        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener, true);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        // First view: only init, no added/removed.
        service.apply_members_view(1, vec![member_info(a, 5701)]);
        assert_eq!(observed.recv().await, Observed::Init(vec![a]));
        observed.recv_assert_timeout(QUIET).await;

        service.apply_members_view(2, vec![member_info(a, 5701), member_info(b, 5702)]);
        assert_eq!(observed.recv().await, Observed::Added(b));
        observed.recv_assert_timeout(QUIET).await;
        refresh_requests.next().await.expect("refresh requested");

        // Same version again is a duplicate.
        service.apply_members_view(2, vec![member_info(a, 5701)]);
        observed.recv_assert_timeout(QUIET).await;
        assert_eq!(service.members().len(), 2);

        service.apply_members_view(3, vec![member_info(a, 5701)]);
        assert_eq!(observed.recv().await, Observed::Removed(b));
        observed.recv_assert_timeout(QUIET).await;
        assert_eq!(service.member_list_version(), 3);
    }

    #[tokio::test]
    async fn removed_events_precede_added_events() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener, false);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

        service.apply_members_view(1, vec![member_info(ids[0], 5701), member_info(ids[1], 5702)]);
        service.apply_members_view(2, vec![member_info(ids[2], 5703), member_info(ids[3], 5704)]);

        let events = vec![
            observed.recv().await,
            observed.recv().await,
            observed.recv().await,
            observed.recv().await,
        ];
        assert_eq!(
            events,
            vec![
                Observed::Removed(ids[0]),
                Observed::Removed(ids[1]),
                Observed::Added(ids[2]),
                Observed::Added(ids[3]),
            ]
        );
    }

    #[tokio::test]
    async fn late_listener_gets_initial_view_before_changes() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        service.apply_members_view(1, vec![member_info(a, 5701)]);

        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener, true);
        service.apply_members_view(2, vec![member_info(a, 5701), member_info(b, 5702)]);

        assert_eq!(observed.recv().await, Observed::Init(vec![a]));
        assert_eq!(observed.recv().await, Observed::Added(b));
    }

    #[tokio::test]
    async fn late_listener_gets_initial_view_of_empty_cluster() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        service.apply_members_view(1, vec![]);

        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener.clone(), true);

        assert_eq!(observed.recv().await, Observed::Init(vec![]));
        observed.recv_assert_timeout(QUIET).await;
    }

    #[tokio::test]
    async fn removed_listener_observes_nothing() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let (listener, mut observed) = ChannelListener::new();
        let registration_id = service.add_membership_listener(listener.clone(), true);

        assert!(service.remove_membership_listener(&registration_id));
        assert!(!service.remove_membership_listener(&registration_id));

        service.apply_members_view(1, vec![member_info(Uuid::new_v4(), 5701)]);
        observed.recv_assert_timeout(QUIET).await;
    }

    #[tokio::test]
    async fn member_left_closes_its_connection() {
        let (service, registry, _refresh_requests) = new_cluster_service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (connection_b, _) = FakeConnection::new(Some(b), 5702);
        registry.add_connection(connection_b.clone());

        service.apply_members_view(1, vec![member_info(a, 5701), member_info(b, 5702)]);
        service.apply_members_view(2, vec![member_info(a, 5701)]);

        assert!(!connection_b.is_alive());
        assert_eq!(connection_b.close_reasons().len(), 1);
        assert!(registry.get_connection(&b).is_some(), "registry removal is the transport's job");
    }

    #[tokio::test]
    async fn cleared_version_accepts_older_view() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener, false);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        service.apply_members_view(10, vec![member_info(a, 5701)]);
        service.clear_member_list_version();
        assert_eq!(service.member_list_version(), 0);
        assert_eq!(service.members().len(), 1, "members survive a version reset");

        service.apply_members_view(2, vec![member_info(a, 5701), member_info(b, 5702)]);
        assert_eq!(observed.recv().await, Observed::Added(b));
        assert_eq!(service.member_list_version(), 2);
    }

    #[tokio::test]
    async fn clear_before_first_view_keeps_unsynchronized() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        service.clear_member_list_version();
        assert!(!service.member_list_snapshot().is_synchronized());
    }

    #[tokio::test]
    async fn initial_member_list_gate() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let cancel = CancellationToken::new();

        let result = service
            .wait_initial_member_list_fetched(Duration::from_millis(20), &cancel)
            .await;
        assert_eq!(result, Err(ClusterError::InitialMemberListTimeout(Duration::from_millis(20))));

        service.apply_members_view(1, vec![member_info(Uuid::new_v4(), 5701)]);
        service
            .wait_initial_member_list_fetched(Duration::from_millis(20), &cancel)
            .await
            .expect("gate open after first view");
    }

    #[tokio::test]
    async fn initial_member_list_wait_is_cancellable() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service
            .wait_initial_member_list_fetched(Duration::from_secs(60), &cancel)
            .await;
        assert_eq!(result, Err(ClusterError::Cancelled));
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_dispatch() {
        let (service, _registry, _refresh_requests) = new_cluster_service();
        service.add_membership_listener(Arc::new(PanickingListener), false);
        let (listener, mut observed) = ChannelListener::new();
        service.add_membership_listener(listener, false);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        service.apply_members_view(1, vec![member_info(a, 5701)]);
        service.apply_members_view(2, vec![member_info(a, 5701), member_info(b, 5702)]);
        service.apply_members_view(3, vec![member_info(a, 5701), member_info(b, 5702), member_info(c, 5703)]);

        assert_eq!(observed.recv().await, Observed::Added(b));
        assert_eq!(observed.recv().await, Observed::Added(c));
    }
}
