use crate::{decode::decode_row, fetch_all, Handle};
use adapter::{CommandEnvelope, Error, MetadataOps};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct MySqlMetadata {
    handle: Handle,
}

impl MySqlMetadata {
    pub fn new(handle: Handle) -> MySqlMetadata {
        MySqlMetadata { handle }
    }

    async fn scalar(&self, operation: &'static str, sql: &str) -> Result<Value, Error> {
        let rows = fetch_all(&self.handle, operation, sql, &[]).await?;
        rows.first()
            .map(decode_row)
            .and_then(|row| row.values().next().cloned())
            .ok_or_else(|| Error::InvalidData(format!("{operation} returned no rows")))
    }
}

#[async_trait::async_trait]
impl MetadataOps for MySqlMetadata {
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
        match self.scalar("get_version", "SELECT VERSION()").await? {
            Value::String(version) => Ok(version),
            other => Ok(other.to_string()),
        }
    }

    async fn get_unique_identifier(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        // server_uuid exists from 5.6; fall back to the numeric server id.
        match self.scalar("get_unique_identifier", "SELECT @@server_uuid").await {
            Ok(Value::String(uuid)) => Ok(uuid),
            Ok(other) => Ok(other.to_string()),
            Err(_) => match self.scalar("get_unique_identifier", "SELECT @@server_id").await? {
                Value::String(id) => Ok(id),
                other => Ok(other.to_string()),
            },
        }
    }

    async fn get_database_size(&self) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        let size = self
            .scalar(
                "get_database_size",
                "SELECT COALESCE(SUM(data_length + index_length), 0) \
                 FROM information_schema.tables WHERE table_schema = DATABASE()",
            )
            .await?;
        let size = match size {
            Value::Number(n) => n.as_i64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        };
        Ok(size.max(0) as u64)
    }

    async fn get_table_count(&self) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        Ok(crate::schema::user_tables(&self.handle).await?.len() as u64)
    }

    async fn execute_command(&self, command: &str) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        let rows = fetch_all(&self.handle, "execute_command", command, &[]).await?;
        let rows = rows.iter().map(decode_row).collect();
        Ok(CommandEnvelope::from_rows(rows).to_json())
    }
}
