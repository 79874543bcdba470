use crate::cluster::Member;
use tokio::sync::mpsc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MembershipEventType {
    Added,
    Removed,
}

/// A member joined or left. `members` is the member list after the change.
#[derive(Clone, Debug)]
pub struct MembershipEvent {
    pub member: Member,
    pub event_type: MembershipEventType,
    pub members: Vec<Member>,
}

/// The member list at the moment a listener starts observing the cluster.
#[derive(Clone, Debug)]
pub struct InitialMembershipEvent {
    pub members: Vec<Member>,
}

/// MembershipListener callbacks run on a dedicated dispatcher task, one at a time, in the order
/// the cluster service produced them. They never run while the cluster service holds a lock.
pub trait MembershipListener: Send + Sync {
    /// Only called for listeners registered with `wants_initial_membership`.
    fn init(&self, _event: &InitialMembershipEvent) {}

    fn member_added(&self, event: &MembershipEvent);

    fn member_removed(&self, event: &MembershipEvent);
}

/// Handle the cluster service uses to ask for fresh partition ownership after a membership change.
#[derive(Clone)]
pub struct PartitionRefreshTrigger {
    sender: mpsc::UnboundedSender<()>,
}

impl PartitionRefreshTrigger {
    pub fn request_refresh(&self) {
        // Receiver gone means the client is shutting down, nothing left to refresh.
        let _ = self.sender.send(());
    }
}

pub struct PartitionRefreshRequests {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl PartitionRefreshRequests {
    /// Waits for the next refresh request. Requests that piled up meanwhile are coalesced.
    pub async fn next(&mut self) -> Option<()> {
        self.receiver.recv().await?;
        while self.receiver.try_recv().is_ok() {}
        Some(())
    }
}

pub fn partition_refresh_channel() -> (PartitionRefreshTrigger, PartitionRefreshRequests) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (PartitionRefreshTrigger { sender }, PartitionRefreshRequests { receiver })
}
