use crate::connection::ConnectionId;
use crate::partition::hash::{hash_to_index, partition_hash};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PartitionError {
    #[error("Partition count mismatch: client knows {expected} partitions, table from cluster has {actual}")]
    PartitionCountMismatch { expected: i32, actual: i32 },
}

/// PartitionTable is an immutable snapshot of partition ownership, tagged with the connection
/// it was received from.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    connection: Option<ConnectionId>,
    version: i32,
    partitions: HashMap<i32, Uuid>,
}

impl PartitionTable {
    fn empty() -> Self {
        PartitionTable {
            connection: None,
            version: -1,
            partitions: HashMap::new(),
        }
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn owner(&self, partition_id: i32) -> Option<Uuid> {
        self.partitions.get(&partition_id).copied()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// A table is only trusted from a stable source: a different connection always wins, the
    /// same connection must move the version strictly forward.
    fn should_be_replaced_by(&self, source: ConnectionId, version: i32, entries: &HashMap<Uuid, Vec<i32>>) -> bool {
        if entries.values().all(|ids| ids.is_empty()) {
            return false;
        }
        if self.connection != Some(source) {
            return true;
        }
        version > self.version
    }
}

/// PartitionService maps routing keys to partitions and partitions to their owning member.
pub struct PartitionService {
    logger: slog::Logger,
    table: RwLock<Arc<PartitionTable>>,
    // Learned once, survives `reset()`.
    partition_count: AtomicI32,
}

impl PartitionService {
    pub fn new(logger: slog::Logger) -> Self {
        PartitionService {
            logger: logger.new(slog::o!("component" => "PartitionService")),
            table: RwLock::new(Arc::new(PartitionTable::empty())),
            partition_count: AtomicI32::new(0),
        }
    }

    /// `partition_id()` returns the partition owning `key`, or 0 while the partition count is
    /// still unknown.
    pub fn partition_id(&self, key: &[u8]) -> i32 {
        let count = self.partition_count();
        if count == 0 {
            return 0;
        }
        hash_to_index(partition_hash(key), count)
    }

    /// `None` tells the caller to route to any member.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.partition_table().owner(partition_id)
    }

    pub fn partition_count(&self) -> i32 {
        self.partition_count.load(Ordering::Acquire)
    }

    pub fn partition_table(&self) -> Arc<PartitionTable> {
        self.table.read().expect("PartitionService table lock poison").clone()
    }

    /// Sets the partition count if unknown. Returns false if a different count is already known.
    pub fn check_and_set_partition_count(&self, count: i32) -> bool {
        match self
            .partition_count
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == count,
        }
    }

    /// `apply_partition_view()` replaces the table if the update passes the staleness rules.
    /// Returns whether the update was applied; rejected updates are silent no-ops.
    pub fn apply_partition_view(
        &self,
        source: ConnectionId,
        version: i32,
        entries: &HashMap<Uuid, Vec<i32>>,
    ) -> Result<bool, PartitionError> {
        if !self.partition_table().should_be_replaced_by(source, version, entries) {
            slog::debug!(
                self.logger,
                "Ignoring partition view version {} from {:?}",
                version,
                source
            );
            return Ok(false);
        }

        let mut partitions = HashMap::new();
        for (owner, partition_ids) in entries.iter() {
            for partition_id in partition_ids {
                partitions.insert(*partition_id, *owner);
            }
        }

        let mut guard = self.table.write().expect("PartitionService table lock poison");
        // Another writer may have won the race between the first check and taking the lock.
        if !guard.should_be_replaced_by(source, version, entries) {
            return Ok(false);
        }

        let actual = partitions.len() as i32;
        if !self.check_and_set_partition_count(actual) {
            let expected = self.partition_count();
            slog::crit!(
                self.logger,
                "Received partition table with {} partitions, but the client knows {}. Refusing to apply it.",
                actual,
                expected
            );
            return Err(PartitionError::PartitionCountMismatch { expected, actual });
        }

        *guard = Arc::new(PartitionTable {
            connection: Some(source),
            version,
            partitions,
        });
        drop(guard);

        slog::debug!(
            self.logger,
            "Applied partition table version {} from {:?}",
            version,
            source
        );
        Ok(true)
    }

    /// Forgets partition ownership (e.g. after losing every connection) but keeps the count.
    pub fn reset(&self) {
        *self.table.write().expect("PartitionService table lock poison") = Arc::new(PartitionTable::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_logger;

    fn view(owners: &[(Uuid, Vec<i32>)]) -> HashMap<Uuid, Vec<i32>> {
        owners.iter().cloned().collect()
    }

    #[test]
    fn unknown_count_routes_to_partition_zero() {
        let service = PartitionService::new(test_logger());
        assert_eq!(service.partition_id(b"some-key"), 0);
        assert_eq!(service.partition_owner(0), None);
    }

    #[test]
    fn learns_count_from_first_table() {
        let service = PartitionService::new(test_logger());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let connection = ConnectionId::new(1);

        let applied = service
            .apply_partition_view(connection, 1, &view(&[(a, vec![0, 1, 2]), (b, vec![3, 4])]))
            .unwrap();

        assert!(applied);
        assert_eq!(service.partition_count(), 5);
        assert_eq!(service.partition_owner(0), Some(a));
        assert_eq!(service.partition_owner(4), Some(b));
        assert_eq!(service.partition_owner(5), None);

        let partition_id = service.partition_id(b"some-key");
        assert!(partition_id >= 0 && partition_id < 5);
        assert_eq!(partition_id, service.partition_id(b"some-key"));
    }

    #[test]
    fn same_connection_requires_increasing_version() {
        let service = PartitionService::new(test_logger());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let connection = ConnectionId::new(1);

        assert!(service.apply_partition_view(connection, 5, &view(&[(a, vec![0, 1])])).unwrap());
        assert!(!service.apply_partition_view(connection, 5, &view(&[(b, vec![0, 1])])).unwrap());
        assert!(!service.apply_partition_view(connection, 4, &view(&[(b, vec![0, 1])])).unwrap());
        assert_eq!(service.partition_table().version(), 5);
        assert_eq!(service.partition_owner(0), Some(a));

        assert!(service.apply_partition_view(connection, 6, &view(&[(b, vec![0, 1])])).unwrap());
        assert_eq!(service.partition_owner(0), Some(b));
    }

    #[test]
    fn new_connection_wins_regardless_of_version() {
        let service = PartitionService::new(test_logger());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(service
            .apply_partition_view(ConnectionId::new(1), 10, &view(&[(a, vec![0, 1])]))
            .unwrap());
        assert!(service
            .apply_partition_view(ConnectionId::new(2), 3, &view(&[(b, vec![0, 1])]))
            .unwrap());

        let table = service.partition_table();
        assert_eq!(table.version(), 3);
        assert_eq!(table.connection(), Some(ConnectionId::new(2)));
        assert_eq!(table.owner(1), Some(b));
    }

    #[test]
    fn empty_view_is_ignored() {
        let service = PartitionService::new(test_logger());
        assert!(!service
            .apply_partition_view(ConnectionId::new(1), 1, &HashMap::new())
            .unwrap());
        assert!(!service
            .apply_partition_view(ConnectionId::new(1), 1, &view(&[(Uuid::new_v4(), vec![])]))
            .unwrap());
        assert!(service.partition_table().is_empty());
        assert_eq!(service.partition_count(), 0);
    }

    #[test]
    fn partition_count_mismatch_is_reported_and_not_applied() {
        let service = PartitionService::new(test_logger());
        let a = Uuid::new_v4();
        service
            .apply_partition_view(ConnectionId::new(1), 1, &view(&[(a, vec![0, 1, 2])]))
            .unwrap();

        let result = service.apply_partition_view(ConnectionId::new(2), 2, &view(&[(a, vec![0, 1])]));

        assert_eq!(
            result,
            Err(PartitionError::PartitionCountMismatch { expected: 3, actual: 2 })
        );
        assert_eq!(service.partition_table().version(), 1);
        assert_eq!(service.partition_count(), 3);
    }

    #[test]
    fn reset_keeps_partition_count() {
        let service = PartitionService::new(test_logger());
        service
            .apply_partition_view(ConnectionId::new(1), 1, &view(&[(Uuid::new_v4(), vec![0, 1])]))
            .unwrap();

        service.reset();

        assert!(service.partition_table().is_empty());
        assert_eq!(service.partition_count(), 2);
        assert!(service.check_and_set_partition_count(2));
        assert!(!service.check_and_set_partition_count(3));
    }
}
