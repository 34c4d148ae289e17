use crate::{DatabaseAdapter, Error};
use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use usm::DatabaseType;

lazy_static! {
    static ref REGISTRY: RwLock<BTreeMap<DatabaseType, Arc<dyn DatabaseAdapter>>> =
        RwLock::new(BTreeMap::new());
}

/// Register a backend's adapter. Called once per backend during process
/// startup; re-registering a type replaces the prior factory.
pub fn register(adapter: Arc<dyn DatabaseAdapter>) {
    let database_type = adapter.database_type();
    let mut registry = REGISTRY.write().expect("registry lock is never poisoned");
    if registry.insert(database_type, adapter).is_some() {
        tracing::warn!(db = %database_type, "replaced an already-registered adapter");
    }
}

/// Look up the adapter for a backend type. This is the single authority
/// for adapter construction.
pub fn lookup(database_type: DatabaseType) -> Result<Arc<dyn DatabaseAdapter>, Error> {
    REGISTRY
        .read()
        .expect("registry lock is never poisoned")
        .get(&database_type)
        .cloned()
        .ok_or_else(|| Error::NotFound {
            kind: "adapter",
            name: database_type.to_string(),
        })
}

pub fn registered_types() -> Vec<DatabaseType> {
    REGISTRY
        .read()
        .expect("registry lock is never poisoned")
        .keys()
        .copied()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Capability, Connection, ConnectionConfig, Decrypter, InstanceConfig, InstanceConnection,
    };

    struct FakeAdapter;

    #[async_trait::async_trait]
    impl DatabaseAdapter for FakeAdapter {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }

        fn capabilities(&self) -> &'static Capability {
            &crate::capability::SQLITE
        }

        async fn connect(
            &self,
            _config: ConnectionConfig,
            _decrypter: &dyn Decrypter,
        ) -> Result<Connection, Error> {
            Err(Error::NotConnected)
        }

        async fn connect_instance(
            &self,
            _config: InstanceConfig,
            _decrypter: &dyn Decrypter,
        ) -> Result<InstanceConnection, Error> {
            Err(Error::NotConnected)
        }
    }

    #[test]
    fn register_then_lookup() {
        register(Arc::new(FakeAdapter));
        let adapter = lookup(DatabaseType::Sqlite).unwrap();
        assert_eq!(adapter.database_type(), DatabaseType::Sqlite);
        assert!(registered_types().contains(&DatabaseType::Sqlite));

        assert!(matches!(
            lookup(DatabaseType::MySql),
            Err(Error::NotFound { .. })
        ));
    }
}
