use crate::{data::MySqlData, instance::MySqlInstance, metadata::MySqlMetadata, replication::MySqlReplication, schema::MySqlSchema, Handle};
use adapter::{
    ConnState, Connection, ConnectionConfig, Decrypter, Error, InstanceConfig, InstanceConnection,
    Lifecycle, PoolSettings,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use std::sync::Arc;

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
        "connected to mysql"
    );
    Ok(Connection::new(
        config,
        handle.state.clone(),
        Arc::new(MySqlSchema::new(handle.clone())),
        Arc::new(MySqlData::new(handle.clone())),
        Arc::new(MySqlReplication::new(handle.clone())),
        Arc::new(MySqlMetadata::new(handle)),
        lifecycle,
    ))
}

pub async fn connect_instance(
    config: InstanceConfig,
    decrypter: &dyn Decrypter,
) -> Result<InstanceConnection, Error> {
    let password = decrypter
        .decrypt_password(&config.tenant_id, &config.password)
        .map_err(|e| Error::Configuration(format!("failed to decrypt password: {e}")))?;

    let options = connect_options(
        &config.host,
        config.port,
        &config.username,
        &password,
        config.database_name.as_deref(),
        config.ssl,
        config.ssl_mode.as_deref(),
        config.ssl_root_cert.as_deref(),
    )?;
    let pool = build_pool(options, &config.pool, &config.host, config.port).await?;

    let handle = Handle {
        pool,
        state: ConnState::new(),
        database_name: config.database_name.clone().unwrap_or_default(),
    };
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(handle.clone());
    lifecycle.ping().await?;

    Ok(InstanceConnection::new(
        config,
        handle.state.clone(),
        Arc::new(MySqlInstance::new(handle.clone())),
        Arc::new(MySqlMetadata::new(handle)),
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
) -> Result<MySqlConnectOptions, Error> {
    let mut options = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .username(username)
        .password(password);
    if let Some(database) = database {
        options = options.database(database);
    }

    let mode = match (ssl, ssl_mode) {
        (_, Some(mode)) => parse_ssl_mode(mode)?,
        (true, None) => MySqlSslMode::Required,
        (false, None) => MySqlSslMode::Preferred,
    };
    options = options.ssl_mode(mode);
    if let Some(root_cert) = ssl_root_cert {
        options = options.ssl_ca(root_cert);
    }
    Ok(options)
}

fn parse_ssl_mode(mode: &str) -> Result<MySqlSslMode, Error> {
    match mode {
        "disable" | "disabled" => Ok(MySqlSslMode::Disabled),
        "prefer" | "preferred" => Ok(MySqlSslMode::Preferred),
        "require" | "required" => Ok(MySqlSslMode::Required),
        "verify-ca" => Ok(MySqlSslMode::VerifyCa),
        "verify-full" | "verify-identity" => Ok(MySqlSslMode::VerifyIdentity),
        other => Err(Error::Configuration(format!(
            "unrecognized sslMode '{other}'"
        ))),
    }
}

async fn build_pool(
    options: MySqlConnectOptions,
    settings: &PoolSettings,
    host: &str,
    port: u16,
) -> Result<MySqlPool, Error> {
    MySqlPoolOptions::new()
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
        assert!(matches!(
            parse_ssl_mode("required"),
            Ok(MySqlSslMode::Required)
        ));
        assert!(matches!(
            parse_ssl_mode("verify-identity"),
            Ok(MySqlSslMode::VerifyIdentity)
        ));
        assert!(parse_ssl_mode("sometimes").is_err());
    }
}
