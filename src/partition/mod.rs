mod hash;
mod service;

pub use service::PartitionError;
pub use service::PartitionService;
pub use service::PartitionTable;

pub(crate) use hash::hash_to_index;
