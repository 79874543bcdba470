//! The client message envelope. Only the header fields the coordination engine needs are
//! interpreted here; the payload is an opaque blob owned by the per-operation codecs.
mod codec;

pub use codec::decode_listener_registration_id;
pub use codec::decode_members_view;
pub use codec::decode_partitions_view;
pub use codec::encode_listener_registration_id;
pub use codec::encode_members_view;
pub use codec::encode_partitions_view;
pub use codec::CodecError;
pub use codec::MembersView;
pub use codec::PartitionsView;
pub use codec::ServerError;
pub use codec::ServerErrorCode;

use bytes::Bytes;
use std::fmt;

/// Partition id value for messages with no partition affinity.
pub const NO_PARTITION: i32 = -1;

// -- Message types the engine itself produces or consumes --

/// Responses with this message type carry an encoded `ServerError` instead of a result.
pub const ERROR_MESSAGE_TYPE: i32 = 0x0000_0000;
pub const CLUSTER_VIEW_LISTENER_REQUEST: i32 = 0x0003_0000;
pub const CLUSTER_VIEW_LISTENER_RESPONSE: i32 = 0x0003_0001;
pub const MEMBERS_VIEW_EVENT: i32 = 0x0003_0002;
pub const PARTITIONS_VIEW_EVENT: i32 = 0x0003_0003;
pub const PARTITIONS_VIEW_FETCH_REQUEST: i32 = 0x0003_0100;
pub const PARTITIONS_VIEW_FETCH_RESPONSE: i32 = 0x0003_0101;

/// Header flags of a client message.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MessageFlags(u16);

impl MessageFlags {
    pub const BEGIN_FRAGMENT: MessageFlags = MessageFlags(1 << 15);
    pub const END_FRAGMENT: MessageFlags = MessageFlags(1 << 14);
    pub const UNFRAGMENTED: MessageFlags = MessageFlags((1 << 15) | (1 << 14));
    pub const IS_EVENT: MessageFlags = MessageFlags(1 << 9);
    pub const IS_BACKUP_ACK: MessageFlags = MessageFlags(1 << 8);
    /// The operation kind is inherently safe to execute more than once.
    pub const IS_RETRYABLE: MessageFlags = MessageFlags(1 << 7);

    pub const fn empty() -> Self {
        MessageFlags(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        MessageFlags(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MessageFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: MessageFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        MessageFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// ClientMessage is one request, response or event. Cloning is cheap, the payload is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientMessage {
    correlation_id: i64,
    message_type: i32,
    partition_id: i32,
    flags: MessageFlags,
    payload: Bytes,
}

impl ClientMessage {
    /// `new_request()` creates an unfragmented request with no partition affinity. Correlation id
    /// is assigned by the invocation service when the message is sent.
    pub fn new_request(message_type: i32, payload: Bytes) -> Self {
        ClientMessage {
            correlation_id: 0,
            message_type,
            partition_id: NO_PARTITION,
            flags: MessageFlags::UNFRAGMENTED,
            payload,
        }
    }

    pub fn new_response(correlation_id: i64, message_type: i32, payload: Bytes) -> Self {
        ClientMessage {
            correlation_id,
            message_type,
            partition_id: NO_PARTITION,
            flags: MessageFlags::UNFRAGMENTED,
            payload,
        }
    }

    pub fn new_event(correlation_id: i64, message_type: i32, partition_id: i32, payload: Bytes) -> Self {
        ClientMessage {
            correlation_id,
            message_type,
            partition_id,
            flags: MessageFlags::UNFRAGMENTED | MessageFlags::IS_EVENT,
            payload,
        }
    }

    pub fn new_error_response(correlation_id: i64, error: &ServerError) -> Self {
        Self::new_response(correlation_id, ERROR_MESSAGE_TYPE, error.encode())
    }

    /// Marks the request as safe to retry after its target disconnects.
    pub fn retryable(mut self) -> Self {
        self.flags.insert(MessageFlags::IS_RETRYABLE);
        self
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.correlation_id = correlation_id;
    }

    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.partition_id = partition_id;
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: MessageFlags) {
        self.flags = flags;
    }

    pub fn is_event(&self) -> bool {
        self.flags.contains(MessageFlags::IS_EVENT)
    }

    pub fn is_backup_ack(&self) -> bool {
        self.flags.contains(MessageFlags::IS_BACKUP_ACK)
    }

    pub fn is_retryable(&self) -> bool {
        self.flags.contains(MessageFlags::IS_RETRYABLE)
    }

    pub fn is_error(&self) -> bool {
        self.message_type == ERROR_MESSAGE_TYPE
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_defaults() {
        let request = ClientMessage::new_request(0x0101, Bytes::from_static(b"abc"));

        assert_eq!(request.partition_id(), NO_PARTITION);
        assert_eq!(request.correlation_id(), 0);
        assert!(request.flags().contains(MessageFlags::BEGIN_FRAGMENT));
        assert!(request.flags().contains(MessageFlags::END_FRAGMENT));
        assert!(!request.is_event());
        assert!(!request.is_retryable());
        assert!(request.retryable().is_retryable());
    }

    #[test]
    fn event_flag() {
        let event = ClientMessage::new_event(7, MEMBERS_VIEW_EVENT, 3, Bytes::new());

        assert!(event.is_event());
        assert!(!event.is_backup_ack());
        assert_eq!(event.partition_id(), 3);
        assert_eq!(event.correlation_id(), 7);
    }

    #[test]
    fn flags_insert_remove() {
        let mut flags = MessageFlags::empty();
        flags.insert(MessageFlags::IS_BACKUP_ACK);
        assert!(flags.contains(MessageFlags::IS_BACKUP_ACK));
        assert!(!flags.contains(MessageFlags::UNFRAGMENTED));

        flags.insert(MessageFlags::BEGIN_FRAGMENT);
        assert!(!flags.contains(MessageFlags::UNFRAGMENTED));

        flags.remove(MessageFlags::IS_BACKUP_ACK);
        assert_eq!(flags, MessageFlags::BEGIN_FRAGMENT);
    }

    #[test]
    fn error_response_is_error() {
        let error = ServerError::new(ServerErrorCode::Retryable, "try again");
        let response = ClientMessage::new_error_response(12, &error);

        assert!(response.is_error());
        assert_eq!(response.correlation_id(), 12);
        assert_eq!(ServerError::decode(response.payload()).unwrap(), error);
    }
}
