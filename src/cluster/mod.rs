mod events;
mod member;
mod service;
mod view_listener;

pub use events::partition_refresh_channel;
pub use events::InitialMembershipEvent;
pub use events::MembershipEvent;
pub use events::MembershipEventType;
pub use events::MembershipListener;
pub use events::PartitionRefreshRequests;
pub use events::PartitionRefreshTrigger;
pub use member::Member;
pub use member::MemberInfo;
pub use member::MemberListSnapshot;
pub use service::ClusterError;
pub use service::ClusterService;
pub use view_listener::ClusterViewListener;
