use crate::connection::{Connection, ConnectionManager};
use crate::invocation::InvocationTarget;
use crate::partition::PartitionService;
use std::sync::Arc;

/// TargetResolver picks the connection an invocation attempt goes out on. `None` sends the
/// attempt down the failure path as `NoConnectionAvailable`.
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, target: &InvocationTarget) -> Option<Arc<dyn Connection>>;
}

/// Routes each request straight to the member owning its data.
pub struct SmartTargetResolver {
    connection_manager: Arc<dyn ConnectionManager>,
    partition_service: Arc<PartitionService>,
}

impl SmartTargetResolver {
    pub fn new(connection_manager: Arc<dyn ConnectionManager>, partition_service: Arc<PartitionService>) -> Self {
        SmartTargetResolver {
            connection_manager,
            partition_service,
        }
    }
}

impl TargetResolver for SmartTargetResolver {
    fn resolve(&self, target: &InvocationTarget) -> Option<Arc<dyn Connection>> {
        match target {
            InvocationTarget::Connection(connection) => Some(connection.clone()),
            InvocationTarget::Member(member_id) => self.connection_manager.get_connection(member_id),
            InvocationTarget::Partition(partition_id) => self
                .partition_service
                .partition_owner(*partition_id)
                .and_then(|owner| self.connection_manager.get_connection(&owner))
                .or_else(|| self.connection_manager.get_any_connection()),
            InvocationTarget::Any => self.connection_manager.get_any_connection(),
        }
    }
}

/// Sends everything over whichever connection is available and lets members forward requests.
pub struct UnisocketTargetResolver {
    connection_manager: Arc<dyn ConnectionManager>,
}

impl UnisocketTargetResolver {
    pub fn new(connection_manager: Arc<dyn ConnectionManager>) -> Self {
        UnisocketTargetResolver { connection_manager }
    }
}

impl TargetResolver for UnisocketTargetResolver {
    fn resolve(&self, target: &InvocationTarget) -> Option<Arc<dyn Connection>> {
        match target {
            InvocationTarget::Connection(connection) => Some(connection.clone()),
            _ => self.connection_manager.get_any_connection(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ConnectionRegistry};
    use crate::test_utils::{test_logger, FakeConnection};
    use std::collections::HashMap;
    use uuid::Uuid;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        partition_service: Arc<PartitionService>,
        owner: Uuid,
        owner_connection: Arc<FakeConnection>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new(test_logger()));
        let partition_service = Arc::new(PartitionService::new(test_logger()));
        let owner = Uuid::new_v4();
        let (owner_connection, _) = FakeConnection::new(Some(owner), 5701);
        registry.add_connection(owner_connection.clone());

        let mut view = HashMap::new();
        view.insert(owner, vec![0, 1]);
        view.insert(Uuid::new_v4(), vec![2, 3]);
        partition_service
            .apply_partition_view(ConnectionId::new(99), 1, &view)
            .unwrap();

        Fixture {
            registry,
            partition_service,
            owner,
            owner_connection,
        }
    }

    #[test]
    fn smart_resolver_routes_by_owner() {
        let f = fixture();
        let resolver = SmartTargetResolver::new(f.registry.clone(), f.partition_service.clone());

        let resolved = resolver.resolve(&InvocationTarget::Partition(1)).unwrap();
        assert_eq!(resolved.id(), f.owner_connection.id());

        let resolved = resolver.resolve(&InvocationTarget::Member(f.owner)).unwrap();
        assert_eq!(resolved.id(), f.owner_connection.id());

        assert!(resolver.resolve(&InvocationTarget::Member(Uuid::new_v4())).is_none());
    }

    #[test]
    fn smart_resolver_falls_back_to_any_connection() {
        let f = fixture();
        let resolver = SmartTargetResolver::new(f.registry.clone(), f.partition_service.clone());

        // Partition 2 is owned by a member we have no connection to.
        let resolved = resolver.resolve(&InvocationTarget::Partition(2)).unwrap();
        assert_eq!(resolved.id(), f.owner_connection.id());

        // Partition unknown to the table.
        let resolved = resolver.resolve(&InvocationTarget::Partition(40)).unwrap();
        assert_eq!(resolved.id(), f.owner_connection.id());
    }

    #[test]
    fn bound_target_is_used_even_if_dead() {
        let f = fixture();
        let (other, _) = FakeConnection::new(None, 5799);
        other.kill();
        let bound = InvocationTarget::Connection(other.clone());

        let smart = SmartTargetResolver::new(f.registry.clone(), f.partition_service.clone());
        let unisocket = UnisocketTargetResolver::new(f.registry.clone());

        assert_eq!(smart.resolve(&bound).unwrap().id(), other.id());
        assert_eq!(unisocket.resolve(&bound).unwrap().id(), other.id());
    }

    #[test]
    fn unisocket_resolver_ignores_ownership() {
        let f = fixture();
        f.owner_connection.kill();
        let (only_live, _) = FakeConnection::new(None, 5702);
        f.registry.add_connection(only_live.clone());

        let resolver = UnisocketTargetResolver::new(f.registry.clone());

        for target in vec![
            InvocationTarget::Partition(0),
            InvocationTarget::Member(f.owner),
            InvocationTarget::Any,
        ] {
            assert_eq!(resolver.resolve(&target).unwrap().id(), only_live.id());
        }
    }
}
