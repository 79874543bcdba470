use crate::cluster::MemberInfo;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

// Payload layouts understood by the engine. Everything is little endian.
//
// string:          u32 length, utf-8 bytes
// uuid:            16 bytes
// server error:    i32 code, u8 retryable, string message
// registration id: uuid
// members view:    i32 version, u32 count, count * (uuid, string address, u8 lite, u32 n, n * (string, string))
// partitions view: i32 version, u32 count, count * (uuid, u32 n, n * i32)

// Smallest encoded size of one repeated entry. Counts read from the wire are checked against
// them before anything is allocated.
const MIN_MEMBER_LEN: usize = 16 + 4 + 1 + 4;
const MIN_ATTRIBUTE_LEN: usize = 4 + 4;
const MIN_PARTITION_OWNER_LEN: usize = 16 + 4;
const PARTITION_ID_LEN: usize = 4;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Payload truncated while reading {0}")]
    Truncated(&'static str),
    #[error("Payload contains invalid utf-8")]
    InvalidUtf8,
    #[error("Invalid member address '{0}'")]
    InvalidAddress(String),
}

/// Error code reported by the server in an error response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServerErrorCode {
    Io,
    InstanceNotActive,
    TargetDisconnected,
    TargetNotMember,
    Retryable,
    Other(i32),
}

impl ServerErrorCode {
    fn as_i32(&self) -> i32 {
        match self {
            ServerErrorCode::Io => 1,
            ServerErrorCode::InstanceNotActive => 2,
            ServerErrorCode::TargetDisconnected => 3,
            ServerErrorCode::TargetNotMember => 4,
            ServerErrorCode::Retryable => 5,
            ServerErrorCode::Other(code) => *code,
        }
    }

    fn from_i32(code: i32) -> Self {
        match code {
            1 => ServerErrorCode::Io,
            2 => ServerErrorCode::InstanceNotActive,
            3 => ServerErrorCode::TargetDisconnected,
            4 => ServerErrorCode::TargetNotMember,
            5 => ServerErrorCode::Retryable,
            other => ServerErrorCode::Other(other),
        }
    }
}

/// ServerError is the decoded payload of an error response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: String,
    /// Server explicitly flagged the failed operation as safe to retry.
    pub retryable: bool,
}

impl ServerError {
    pub fn new(code: ServerErrorCode, message: impl Into<String>) -> Self {
        ServerError {
            code,
            message: message.into(),
            retryable: code == ServerErrorCode::Retryable,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9 + self.message.len());
        buf.put_i32_le(self.code.as_i32());
        buf.put_u8(self.retryable as u8);
        put_str(&mut buf, &self.message);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, CodecError> {
        let mut buf = payload.clone();
        let code = get_i32(&mut buf, "error code")?;
        let retryable = get_u8(&mut buf, "error retryable flag")? != 0;
        let message = get_str(&mut buf)?;

        Ok(ServerError {
            code: ServerErrorCode::from_i32(code),
            message,
            retryable,
        })
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MembersView {
    pub version: i32,
    pub members: Vec<MemberInfo>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionsView {
    pub version: i32,
    pub partitions: HashMap<Uuid, Vec<i32>>,
}

pub fn encode_members_view(version: i32, members: &[MemberInfo]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(version);
    buf.put_u32_le(members.len() as u32);
    for member in members {
        put_uuid(&mut buf, &member.id);
        put_str(&mut buf, &member.address.to_string());
        buf.put_u8(member.lite_member as u8);
        buf.put_u32_le(member.attributes.len() as u32);
        for (key, value) in member.attributes.iter() {
            put_str(&mut buf, key);
            put_str(&mut buf, value);
        }
    }
    buf.freeze()
}

pub fn decode_members_view(payload: &Bytes) -> Result<MembersView, CodecError> {
    let mut buf = payload.clone();
    let version = get_i32(&mut buf, "members view version")?;
    let count = get_count(&mut buf, "member count", MIN_MEMBER_LEN)?;

    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let id = get_uuid(&mut buf)?;
        let raw_address = get_str(&mut buf)?;
        let address: SocketAddr = raw_address
            .parse()
            .map_err(|_| CodecError::InvalidAddress(raw_address.clone()))?;
        let lite_member = get_u8(&mut buf, "lite member flag")? != 0;
        let attribute_count = get_count(&mut buf, "attribute count", MIN_ATTRIBUTE_LEN)?;
        let mut attributes = HashMap::with_capacity(attribute_count);
        for _ in 0..attribute_count {
            let key = get_str(&mut buf)?;
            let value = get_str(&mut buf)?;
            attributes.insert(key, value);
        }

        members.push(MemberInfo {
            id,
            address,
            attributes,
            lite_member,
        });
    }

    Ok(MembersView { version, members })
}

pub fn encode_partitions_view(version: i32, partitions: &HashMap<Uuid, Vec<i32>>) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(version);
    buf.put_u32_le(partitions.len() as u32);
    for (owner, partition_ids) in partitions.iter() {
        put_uuid(&mut buf, owner);
        buf.put_u32_le(partition_ids.len() as u32);
        for partition_id in partition_ids {
            buf.put_i32_le(*partition_id);
        }
    }
    buf.freeze()
}

pub fn decode_partitions_view(payload: &Bytes) -> Result<PartitionsView, CodecError> {
    let mut buf = payload.clone();
    let version = get_i32(&mut buf, "partitions view version")?;
    let count = get_count(&mut buf, "partition owner count", MIN_PARTITION_OWNER_LEN)?;

    let mut partitions = HashMap::with_capacity(count);
    for _ in 0..count {
        let owner = get_uuid(&mut buf)?;
        let n = get_count(&mut buf, "partition id count", PARTITION_ID_LEN)?;
        let mut partition_ids = Vec::with_capacity(n);
        for _ in 0..n {
            partition_ids.push(get_i32(&mut buf, "partition id")?);
        }
        partitions.insert(owner, partition_ids);
    }

    Ok(PartitionsView { version, partitions })
}

pub fn encode_listener_registration_id(registration_id: Uuid) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    put_uuid(&mut buf, &registration_id);
    buf.freeze()
}

pub fn decode_listener_registration_id(payload: &Bytes) -> Result<Uuid, CodecError> {
    let mut buf = payload.clone();
    get_uuid(&mut buf)
}

// ------- Primitives --------

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_uuid(buf: &mut BytesMut, id: &Uuid) {
    buf.put_slice(id.as_bytes());
}

fn get_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u8())
}

fn get_i32(buf: &mut Bytes, what: &'static str) -> Result<i32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_i32_le())
}

fn get_u32(buf: &mut Bytes, what: &'static str) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u32_le())
}

/// Reads an entry count, rejecting it if the rest of the payload can't hold that many entries.
fn get_count(buf: &mut Bytes, what: &'static str, min_entry_len: usize) -> Result<usize, CodecError> {
    let count = get_u32(buf, what)? as usize;
    match count.checked_mul(min_entry_len) {
        Some(needed) if needed <= buf.remaining() => Ok(count),
        _ => Err(CodecError::Truncated(what)),
    }
}

fn get_uuid(buf: &mut Bytes) -> Result<Uuid, CodecError> {
    if buf.remaining() < 16 {
        return Err(CodecError::Truncated("uuid"));
    }
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

fn get_str(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = get_u32(buf, "string length")? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated("string"));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}
