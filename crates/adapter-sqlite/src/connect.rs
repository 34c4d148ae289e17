use crate::{data::SqliteData, instance::SqliteInstance, metadata::SqliteMetadata, replication::SqliteReplication, schema::SqliteSchema, Handle};
use adapter::{
    ConnState, Connection, ConnectionConfig, Decrypter, Error, InstanceConfig, InstanceConnection,
    Lifecycle, PoolSettings,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

/// Open a database-scope connection. The config's database name is the
/// file path; host, port, and credentials do not apply to an embedded
/// engine and are ignored.
pub async fn connect(
    config: ConnectionConfig,
    decrypter: &dyn Decrypter,
) -> Result<Connection, Error> {
    // Decryption still runs so a bad credential config fails loudly here
    // rather than differently per backend.
    decrypter
        .decrypt_password(&config.tenant_id, &config.password)
        .map_err(|e| Error::Configuration(format!("failed to decrypt password: {e}")))?;

    let pool = build_pool(&config.database_name, &config.pool).await?;
    let handle = Handle {
        pool,
        state: ConnState::new(),
        database_path: config.database_name.clone(),
    };
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(handle.clone());
    lifecycle.ping().await?;

    tracing::info!(path = %config.database_name, "opened sqlite database");
    Ok(Connection::new(
        config,
        handle.state.clone(),
        Arc::new(SqliteSchema::new(handle.clone())),
        Arc::new(SqliteData::new(handle.clone())),
        Arc::new(SqliteReplication),
        Arc::new(SqliteMetadata::new(handle)),
        lifecycle,
    ))
}

pub async fn connect_instance(
    config: InstanceConfig,
    decrypter: &dyn Decrypter,
) -> Result<InstanceConnection, Error> {
    decrypter
        .decrypt_password(&config.tenant_id, &config.password)
        .map_err(|e| Error::Configuration(format!("failed to decrypt password: {e}")))?;

    let path = config
        .database_name
        .clone()
        .ok_or_else(|| Error::Configuration("sqlite requires a database path".to_string()))?;
    let pool = build_pool(&path, &config.pool).await?;
    let handle = Handle {
        pool,
        state: ConnState::new(),
        database_path: path,
    };
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(handle.clone());
    lifecycle.ping().await?;

    Ok(InstanceConnection::new(
        config,
        handle.state.clone(),
        Arc::new(SqliteInstance::new(handle.clone())),
        Arc::new(SqliteMetadata::new(handle)),
        lifecycle,
    ))
}

async fn build_pool(path: &str, settings: &PoolSettings) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
        .map_err(|e| Error::Configuration(format!("invalid sqlite path '{path}': {e}")))?
        .create_if_missing(true);

    // A memory database exists per connection: the pool must hold exactly
    // one connection and never recycle it, or the database vanishes.
    let pool_options = if path.contains(":memory:") {
        SqlitePoolOptions::new().max_connections(1).min_connections(1)
    } else {
        SqlitePoolOptions::new()
            .max_connections(settings.max_open)
            .min_connections(settings.max_idle)
            .max_lifetime(settings.max_lifetime)
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(|e| Error::Connection {
            host: path.to_string(),
            port: 0,
            source: e.into(),
        })
}
