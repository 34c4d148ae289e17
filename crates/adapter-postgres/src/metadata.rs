use crate::{bind, decode::decode_row, schema::user_tables, Handle};
use adapter::{CommandEnvelope, Error, MetadataOps};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct PgMetadata {
    handle: Handle,
}

impl PgMetadata {
    pub fn new(handle: Handle) -> PgMetadata {
        PgMetadata { handle }
    }

    async fn scalar(&self, operation: &'static str, sql: &str) -> Result<Value, Error> {
        let rows = bind::fetch_all(&self.handle, operation, sql, &[]).await?;
        rows.first()
            .map(decode_row)
            .and_then(|row| row.values().next().cloned())
            .ok_or_else(|| Error::InvalidData(format!("{operation} returned no rows")))
    }
}

#[async_trait::async_trait]
impl MetadataOps for PgMetadata {
    async fn collect_database_metadata(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.handle.ensure_connected()?;
        let mut out = BTreeMap::new();
        out.insert(
            "database_name".to_string(),
            Value::String(self.handle.database_name.clone()),
        );
        out.insert("version".to_string(), Value::String(self.get_version().await?));
        out.insert(
            "unique_identifier".to_string(),
            Value::String(self.get_unique_identifier().await?),
        );
        out.insert(
            "size_bytes".to_string(),
            Value::from(self.get_database_size().await?),
        );
        out.insert(
            "table_count".to_string(),
            Value::from(self.get_table_count().await?),
        );
        Ok(out)
    }

    async fn get_version(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        match self.scalar("get_version", "SELECT version()").await? {
            Value::String(version) => Ok(version),
            other => Ok(other.to_string()),
        }
    }

    async fn get_unique_identifier(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        match self
            .scalar(
                "get_unique_identifier",
                "SELECT system_identifier::text FROM pg_control_system()",
            )
            .await?
        {
            Value::String(identifier) => Ok(identifier),
            other => Ok(other.to_string()),
        }
    }

    async fn get_database_size(&self) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        let size = self
            .scalar(
                "get_database_size",
                "SELECT pg_database_size(current_database())",
            )
            .await?;
        Ok(size.as_i64().unwrap_or(0).max(0) as u64)
    }

    async fn get_table_count(&self) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        Ok(user_tables(&self.handle).await?.len() as u64)
    }

    async fn execute_command(&self, command: &str) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        let rows = bind::fetch_all(&self.handle, "execute_command", command, &[]).await?;
        let rows = rows.iter().map(decode_row).collect();
        Ok(CommandEnvelope::from_rows(rows).to_json())
    }
}
