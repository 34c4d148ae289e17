use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use usm::DatabaseType;

/// Bounds applied to the native connection pool at construction time. The
/// pool itself is owned by the driver; these are only handed to it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PoolSettings {
    #[serde(default = "PoolSettings::default_max_open")]
    pub max_open: u32,
    #[serde(default = "PoolSettings::default_max_idle")]
    pub max_idle: u32,
    #[serde(
        default = "PoolSettings::default_max_lifetime",
        with = "humantime_serde"
    )]
    #[schemars(schema_with = "duration_schema")]
    pub max_lifetime: Duration,
}

impl PoolSettings {
    fn default_max_open() -> u32 {
        25
    }
    fn default_max_idle() -> u32 {
        5
    }
    fn default_max_lifetime() -> Duration {
        Duration::from_secs(300)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_open: Self::default_max_open(),
            max_idle: Self::default_max_idle(),
            max_lifetime: Self::default_max_lifetime(),
        }
    }
}

fn duration_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "string",
        "pattern": "^\\d+(s|m|h)$"
    }))
    .unwrap()
}

/// Everything needed to reach one database. Accepted configs are immutable;
/// `password` stays ciphertext until the moment of connection.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub database_id: String,
    pub workspace_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,

    pub host: String,
    pub port: u16,
    pub database_name: String,

    pub username: String,
    pub password: String,

    #[serde(default)]
    pub ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_reject_unauthorized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_root_cert: Option<String>,

    #[schemars(with = "String")]
    pub database_vendor: DatabaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    #[serde(default)]
    pub pool: PoolSettings,
}

/// Reaches a server instance rather than one database inside it. The
/// optional `database_name` is the administrative database to attach to.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct InstanceConfig {
    pub instance_id: String,
    pub workspace_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,

    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,

    pub username: String,
    pub password: String,

    #[serde(default)]
    pub ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_reject_unauthorized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_root_cert: Option<String>,

    #[schemars(with = "String")]
    pub database_vendor: DatabaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    #[serde(default)]
    pub pool: PoolSettings,
}

/// Decrypts stored credentials. Supplied by the embedding process; invoked
/// once per connect.
pub trait Decrypter: Send + Sync {
    fn decrypt_password(&self, tenant_id: &str, ciphertext: &str) -> anyhow::Result<String>;
}

/// Pass-through for deployments that store plaintext credentials.
pub struct NoopDecrypter;

impl Decrypter for NoopDecrypter {
    fn decrypt_password(&self, _tenant_id: &str, ciphertext: &str) -> anyhow::Result<String> {
        Ok(ciphertext.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connection_config_parses_with_defaults() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "databaseId": "db-1",
            "workspaceId": "ws-1",
            "tenantId": "tn-1",
            "host": "db.internal",
            "port": 5432,
            "databaseName": "app",
            "username": "svc",
            "password": "ciphertext",
            "databaseVendor": "postgres",
        }))
        .unwrap();

        assert_eq!(config.database_vendor, DatabaseType::Postgres);
        assert_eq!(config.pool.max_open, 25);
        assert_eq!(config.pool.max_idle, 5);
        assert_eq!(config.pool.max_lifetime, Duration::from_secs(300));
        assert!(!config.ssl);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<ConnectionConfig, _> = serde_json::from_value(serde_json::json!({
            "databaseId": "db-1",
            "workspaceId": "ws-1",
            "tenantId": "tn-1",
            "host": "db.internal",
            "port": 5432,
            "databaseName": "app",
            "username": "svc",
            "password": "x",
            "databaseVendor": "postgres",
            "unexpected": true,
        }));
        assert!(result.is_err());
    }
}
