mod bind;
mod connect;
mod data;
mod decode;
mod instance;
mod metadata;
mod replication;
mod schema;

use adapter::{
    Capability, ConnState, Connection, ConnectionConfig, DatabaseAdapter, Decrypter, Error,
    InstanceConfig, InstanceConnection, Lifecycle,
};
use sqlx::PgPool;
use std::sync::Arc;
use usm::DatabaseType;

/// Schemas that belong to the engine, never to the user.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

/// The PostgreSQL driver adapter: schema discovery over the catalogs, DML
/// over a bounded sqlx pool, and change capture through a wal2json
/// logical replication slot.
pub struct PostgresAdapter;

/// Register the adapter with the process-wide registry.
pub fn register() {
    adapter::register(Arc::new(PostgresAdapter));
}

#[async_trait::async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn capabilities(&self) -> &'static Capability {
        &adapter::capability::POSTGRES
    }

    async fn connect(
        &self,
        config: ConnectionConfig,
        decrypter: &dyn Decrypter,
    ) -> Result<Connection, Error> {
        connect::connect(config, decrypter).await
    }

    async fn connect_instance(
        &self,
        config: InstanceConfig,
        decrypter: &dyn Decrypter,
    ) -> Result<InstanceConnection, Error> {
        connect::connect_instance(config, decrypter).await
    }
}

/// The shared handle behind every operator facet of one connection.
#[derive(Clone)]
pub(crate) struct Handle {
    pub pool: PgPool,
    pub state: Arc<ConnState>,
    pub database_name: String,
}

impl Handle {
    pub fn ensure_connected(&self) -> Result<(), Error> {
        self.state.ensure_connected()
    }
}

#[async_trait::async_trait]
impl Lifecycle for Handle {
    async fn ping(&self) -> Result<(), Error> {
        use sqlx::Connection as _;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::from_sqlx(DatabaseType::Postgres, "ping", e))?;
        conn.ping()
            .await
            .map_err(|e| Error::from_sqlx(DatabaseType::Postgres, "ping", e))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
