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
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlPool};
use sqlx::query::Query;
use sqlx::MySql;
use std::sync::Arc;
use usm::DatabaseType;

/// Databases that belong to the engine, never to the user.
const SYSTEM_DATABASES: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];

/// The MySQL driver adapter. Change capture falls back to timestamp
/// polling: without a binlog client the adapter can observe positions but
/// not tail the log, and the capability advertises the degraded mechanism.
pub struct MySqlAdapter;

/// Register the adapter with the process-wide registry.
pub fn register() {
    adapter::register(Arc::new(MySqlAdapter));
}

#[async_trait::async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn capabilities(&self) -> &'static Capability {
        &adapter::capability::MYSQL
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

#[derive(Clone)]
pub(crate) struct Handle {
    pub pool: MySqlPool,
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
            .map_err(|e| Error::from_sqlx(DatabaseType::MySql, "ping", e))?;
        conn.ping()
            .await
            .map_err(|e| Error::from_sqlx(DatabaseType::MySql, "ping", e))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn err(operation: &'static str, e: sqlx::Error) -> Error {
    Error::from_sqlx(DatabaseType::MySql, operation, e)
}

/// MySQL coerces string parameters server-side, so binding by JSON class
/// is sufficient.
pub(crate) fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() || n.is_u64() => query.bind(n.as_i64().unwrap_or(i64::MAX)),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => query.bind(s.clone()),
        structured => query.bind(structured.clone()),
    }
}

pub(crate) async fn execute(
    handle: &Handle,
    operation: &'static str,
    sql: &str,
    params: &[Value],
) -> Result<u64, Error> {
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    let result = query
        .execute(&handle.pool)
        .await
        .map_err(|e| err(operation, e))?;
    Ok(result.rows_affected())
}

pub(crate) async fn fetch_all(
    handle: &Handle,
    operation: &'static str,
    sql: &str,
    params: &[Value],
) -> Result<Vec<sqlx::mysql::MySqlRow>, Error> {
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    query
        .fetch_all(&handle.pool)
        .await
        .map_err(|e| err(operation, e))
}
