use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// MemberInfo is a member as described by a members-view event.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberInfo {
    pub id: Uuid,
    pub address: SocketAddr,
    pub attributes: HashMap<String, String>,
    pub lite_member: bool,
}

/// Member is a cluster member as known by the client. Identity is the member id; the address may
/// change across reconnects (NAT, cloud) without the member becoming a different member.
#[derive(Clone)]
pub struct Member {
    id: Uuid,
    address: SocketAddr,
    attributes: Arc<HashMap<String, String>>,
    lite_member: bool,
}

impl Member {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn is_lite_member(&self) -> bool {
        self.lite_member
    }
}

impl From<MemberInfo> for Member {
    fn from(info: MemberInfo) -> Self {
        Member {
            id: info.id,
            address: info.address,
            attributes: Arc::new(info.attributes),
            lite_member: info.lite_member,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member [{}] - {}", self.address, self.id)?;
        if self.lite_member {
            write!(f, " lite")?;
        }
        Ok(())
    }
}

/// Version of the snapshot before any members view has been received.
pub(crate) const UNSYNCHRONIZED_VERSION: i32 = -1;

/// MemberListSnapshot is an immutable, versioned member list. Members keep the order in which
/// the cluster reported them.
#[derive(Clone, Debug)]
pub struct MemberListSnapshot {
    version: i32,
    members: Vec<Member>,
    index: HashMap<Uuid, usize>,
}

impl MemberListSnapshot {
    pub(crate) fn unsynchronized() -> Self {
        MemberListSnapshot {
            version: UNSYNCHRONIZED_VERSION,
            members: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn new(version: i32, members: Vec<Member>) -> Self {
        let index = members.iter().enumerate().map(|(i, m)| (m.id(), i)).collect();
        MemberListSnapshot { version, members, index }
    }

    pub(crate) fn with_version(&self, version: i32) -> Self {
        MemberListSnapshot {
            version,
            members: self.members.clone(),
            index: self.index.clone(),
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn is_synchronized(&self) -> bool {
        self.version != UNSYNCHRONIZED_VERSION
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, id: &Uuid) -> Option<&Member> {
        self.index.get(id).map(|i| &self.members[*i])
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }
}

impl fmt::Display for MemberListSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Members [{}] {{", self.members.len())?;
        for member in self.members.iter() {
            writeln!(f, "\t{:?}", member)?;
        }
        write!(f, "}}")
    }
}
