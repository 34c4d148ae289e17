use crate::{decode::decode_row, execute, fetch_all, Handle, SYSTEM_DATABASES};
use adapter::{Error, InstanceOps};
use dialect::{dialect_for, Dialect};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::DatabaseType;

pub struct MySqlInstance {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

impl MySqlInstance {
    pub fn new(handle: Handle) -> MySqlInstance {
        MySqlInstance {
            handle,
            dialect: dialect_for(DatabaseType::MySql),
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
impl InstanceOps for MySqlInstance {
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
        let rows = fetch_all(
            &self.handle,
            "list_databases",
            "SELECT schema_name FROM information_schema.schemata ORDER BY schema_name",
            &[],
        )
        .await?;
        Ok(rows
            .iter()
            .map(decode_row)
            .filter_map(|row| {
                row.get("schema_name")
                    .or_else(|| row.get("SCHEMA_NAME"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect())
    }

    #[tracing::instrument(skip(self, options), fields(db = "mysql"))]
    async fn create_database(
        &self,
        name: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        self.handle.ensure_connected()?;
        let mut sql = String::from("CREATE DATABASE ");
        if opt_flag(options, "if_not_exists") {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&self.dialect.quote_identifier(name));
        if let Some(charset) = opt_str(options, "character_set") {
            sql.push_str(&format!(" CHARACTER SET {charset}"));
        }
        if let Some(collate) = opt_str(options, "collate") {
            sql.push_str(&format!(" COLLATE {collate}"));
        }
        execute(&self.handle, "create_database", &sql, &[]).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, options), fields(db = "mysql"))]
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
        execute(&self.handle, "drop_database", &sql, &[]).await?;
        Ok(())
    }
}
