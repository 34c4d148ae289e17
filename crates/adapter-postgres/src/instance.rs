use crate::{bind, decode::decode_row, Handle};
use adapter::{Error, InstanceOps};
use dialect::{dialect_for, Dialect};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::DatabaseType;

pub struct PgInstance {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

impl PgInstance {
    pub fn new(handle: Handle) -> PgInstance {
        PgInstance {
            handle,
            dialect: dialect_for(DatabaseType::Postgres),
        }
    }
}

fn opt_str<'a>(options: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

fn opt_flag(options: &BTreeMap<String, Value>, key: &str) -> bool {
    match options.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

#[async_trait::async_trait]
impl InstanceOps for PgInstance {
    async fn collect_instance_metadata(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.handle.ensure_connected()?;
        let mut out = BTreeMap::new();
        let databases = self.list_databases().await?;
        out.insert("database_count".to_string(), Value::from(databases.len()));
        out.insert(
            "databases".to_string(),
            Value::Array(databases.into_iter().map(Value::String).collect()),
        );
        Ok(out)
    }

    async fn list_databases(&self) -> Result<Vec<String>, Error> {
        self.handle.ensure_connected()?;
        let rows = bind::fetch_all(
            &self.handle,
            "list_databases",
            "SELECT datname FROM pg_database WHERE NOT datistemplate ORDER BY datname",
            &[],
        )
        .await?;
        Ok(rows
            .iter()
            .map(decode_row)
            .filter_map(|row| {
                row.get("datname").and_then(Value::as_str).map(str::to_string)
            })
            .collect())
    }

    #[tracing::instrument(skip(self, options), fields(db = "postgres"))]
    async fn create_database(
        &self,
        name: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        self.handle.ensure_connected()?;

        // CREATE DATABASE has no IF NOT EXISTS; emulate it.
        if opt_flag(options, "if_not_exists") {
            let existing = bind::fetch_all(
                &self.handle,
                "create_database",
                "SELECT 1 AS present FROM pg_database WHERE datname = $1",
                &[Value::String(name.to_string())],
            )
            .await?;
            if !existing.is_empty() {
                return Ok(());
            }
        }

        let mut sql = format!("CREATE DATABASE {}", self.dialect.quote_identifier(name));
        if let Some(owner) = opt_str(options, "admin_user") {
            sql.push_str(&format!(" OWNER {}", self.dialect.quote_identifier(owner)));
        }
        if let Some(encoding) = opt_str(options, "character_set") {
            sql.push_str(&format!(
                " ENCODING {} TEMPLATE template0",
                self.dialect.quote_literal(encoding)
            ));
        }
        if let Some(collate) = opt_str(options, "collate") {
            sql.push_str(&format!(
                " LC_COLLATE {}",
                self.dialect.quote_literal(collate)
            ));
        }
        if let Some(tablespace) = opt_str(options, "default_tablespace") {
            sql.push_str(&format!(
                " TABLESPACE {}",
                self.dialect.quote_identifier(tablespace)
            ));
        }
        bind::execute(&self.handle, "create_database", &sql, &[]).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, options), fields(db = "postgres"))]
    async fn drop_database(
        &self,
        name: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        self.handle.ensure_connected()?;
        let mut sql = String::from("DROP DATABASE ");
        if opt_flag(options, "if_exists") {
            sql.push_str("IF EXISTS ");
        }
        sql.push_str(&self.dialect.quote_identifier(name));
        if opt_flag(options, "cascade") {
            // FORCE terminates remaining sessions before the drop.
            sql.push_str(" WITH (FORCE)");
        }
        bind::execute(&self.handle, "drop_database", &sql, &[]).await?;
        Ok(())
    }
}
