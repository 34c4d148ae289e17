use crate::{data::PgData, instance::PgInstance, metadata::PgMetadata, replication::PgReplication, schema::PgSchema, Handle};
use adapter::{
    ConnState, Connection, ConnectionConfig, Decrypter, Error, InstanceConfig, InstanceConnection,
    Lifecycle, PoolSettings,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::sync::Arc;

/// Open a database-scope connection: decrypt credentials, build the pool
/// within the configured bounds, and verify it with a ping.
pub async fn connect(
    config: ConnectionConfig,
    decrypter: &dyn Decrypter,
) -> Result<Connection, Error> {
    let password = decrypter
        .decrypt_password(&config.tenant_id, &config.password)
        .map_err(|e| Error::Configuration(format!("failed to decrypt password: {e}")))?;

    let options = connect_options(
        &config.host,
        config.port,
        &config.username,
        &password,
        Some(&config.database_name),
        config.ssl,
        config.ssl_mode.as_deref(),
        config.ssl_root_cert.as_deref(),
    )?;
    let pool = build_pool(options, &config.pool, &config.host, config.port).await?;

    let handle = Handle {
        pool,
        state: ConnState::new(),
        database_name: config.database_name.clone(),
    };
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(handle.clone());
    lifecycle.ping().await?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database_name,
        "connected to postgres"
    );
    Ok(Connection::new(
        config,
        handle.state.clone(),
        Arc::new(PgSchema::new(handle.clone())),
        Arc::new(PgData::new(handle.clone())),
        Arc::new(PgReplication::new(handle.clone())),
        Arc::new(PgMetadata::new(handle)),
        lifecycle,
    ))
}

/// Open a server-scope connection against the maintenance database.
pub async fn connect_instance(
    config: InstanceConfig,
    decrypter: &dyn Decrypter,
) -> Result<InstanceConnection, Error> {
    let password = decrypter
        .decrypt_password(&config.tenant_id, &config.password)
        .map_err(|e| Error::Configuration(format!("failed to decrypt password: {e}")))?;

    let database = config.database_name.clone();
    let options = connect_options(
        &config.host,
        config.port,
        &config.username,
        &password,
        Some(database.as_deref().unwrap_or("postgres")),
        config.ssl,
        config.ssl_mode.as_deref(),
        config.ssl_root_cert.as_deref(),
    )?;
    let pool = build_pool(options, &config.pool, &config.host, config.port).await?;

    let handle = Handle {
        pool,
        state: ConnState::new(),
        database_name: database.unwrap_or_else(|| "postgres".to_string()),
    };
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(handle.clone());
    lifecycle.ping().await?;

    Ok(InstanceConnection::new(
        config,
        handle.state.clone(),
        Arc::new(PgInstance::new(handle.clone())),
        Arc::new(PgMetadata::new(handle)),
        lifecycle,
    ))
}

#[allow(clippy::too_many_arguments)]
fn connect_options(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    database: Option<&str>,
    ssl: bool,
    ssl_mode: Option<&str>,
    ssl_root_cert: Option<&str>,
) -> Result<PgConnectOptions, Error> {
    let mut options = PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(username)
        .password(password);
    if let Some(database) = database {
        options = options.database(database);
    }

    let mode = match (ssl, ssl_mode) {
        (_, Some(mode)) => parse_ssl_mode(mode)?,
        (true, None) => PgSslMode::Require,
        (false, None) => PgSslMode::Prefer,
    };
    options = options.ssl_mode(mode);
    if let Some(root_cert) = ssl_root_cert {
        options = options.ssl_root_cert(root_cert);
    }
    Ok(options)
}

fn parse_ssl_mode(mode: &str) -> Result<PgSslMode, Error> {
    match mode {
        "disable" => Ok(PgSslMode::Disable),
        "allow" => Ok(PgSslMode::Allow),
        "prefer" => Ok(PgSslMode::Prefer),
        "require" => Ok(PgSslMode::Require),
        "verify-ca" => Ok(PgSslMode::VerifyCa),
        "verify-full" => Ok(PgSslMode::VerifyFull),
        other => Err(Error::Configuration(format!(
            "unrecognized sslMode '{other}'"
        ))),
    }
}

async fn build_pool(
    options: PgConnectOptions,
    settings: &PoolSettings,
    host: &str,
    port: u16,
) -> Result<PgPool, Error> {
    PgPoolOptions::new()
        .max_connections(settings.max_open)
        .min_connections(settings.max_idle)
        .max_lifetime(settings.max_lifetime)
        .connect_with(options)
        .await
        .map_err(|e| Error::Connection {
            host: host.to_string(),
            port,
            source: e.into(),
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ssl_modes_parse() {
        assert!(matches!(parse_ssl_mode("require"), Ok(PgSslMode::Require)));
        assert!(matches!(
            parse_ssl_mode("verify-full"),
            Ok(PgSslMode::VerifyFull)
        ));
        assert!(parse_ssl_mode("mostly-secure").is_err());
    }
}
