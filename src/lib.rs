mod client;
mod cluster;
mod connection;
mod invocation;
mod listener;
mod message;
mod partition;
mod time;

#[cfg(test)]
mod test_utils;

// Root mods hold no code, only `mod` and `pub use` statements. No `mod` is `pub`; types are
// exported one `use` at a time.

pub use client::try_create_client;
pub use client::ClientCreationError;
pub use client::ClientOptions;
pub use client::GridClient;
pub use client::GridClientConfig;

pub use cluster::InitialMembershipEvent;
pub use cluster::Member;
pub use cluster::MemberInfo;
pub use cluster::MemberListSnapshot;
pub use cluster::MembershipEvent;
pub use cluster::MembershipEventType;
pub use cluster::MembershipListener;
pub use cluster::ClusterError;
pub use cluster::ClusterService;

pub use connection::Connection;
pub use connection::ConnectionId;
pub use connection::ConnectionListener;
pub use connection::ConnectionManager;
pub use connection::ConnectionRegistry;

pub use invocation::InvocationError;
pub use invocation::InvocationFuture;
pub use invocation::InvocationService;
pub use invocation::InvocationTarget;
pub use invocation::FAST_RETRY_COUNT;

pub use listener::EventHandler;
pub use listener::EventRegistration;
pub use listener::HandlerResult;
pub use listener::ListenerError;
pub use listener::ListenerMessageCodec;
pub use listener::ListenerService;

pub use message::decode_listener_registration_id;
pub use message::decode_members_view;
pub use message::decode_partitions_view;
pub use message::encode_listener_registration_id;
pub use message::encode_members_view;
pub use message::encode_partitions_view;
pub use message::ClientMessage;
pub use message::CodecError;
pub use message::MembersView;
pub use message::MessageFlags;
pub use message::PartitionsView;
pub use message::ServerError;
pub use message::ServerErrorCode;
pub use message::CLUSTER_VIEW_LISTENER_REQUEST;
pub use message::CLUSTER_VIEW_LISTENER_RESPONSE;
pub use message::ERROR_MESSAGE_TYPE;
pub use message::MEMBERS_VIEW_EVENT;
pub use message::NO_PARTITION;
pub use message::PARTITIONS_VIEW_EVENT;
pub use message::PARTITIONS_VIEW_FETCH_REQUEST;
pub use message::PARTITIONS_VIEW_FETCH_RESPONSE;

pub use partition::PartitionError;
pub use partition::PartitionService;
pub use partition::PartitionTable;

pub use time::Clock;
pub use time::RealClock;
