use crate::{decode::decode_row, fetch_all, Handle};
use adapter::{CommandEnvelope, Error, MetadataOps};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct SqliteMetadata {
    handle: Handle,
}

impl SqliteMetadata {
    pub fn new(handle: Handle) -> SqliteMetadata {
        SqliteMetadata { handle }
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
impl MetadataOps for SqliteMetadata {
    async fn collect_database_metadata(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.handle.ensure_connected()?;
        let mut out = BTreeMap::new();
        out.insert(
            "database_path".to_string(),
            Value::String(self.handle.database_path.clone()),
        );
        out.insert("version".to_string(), Value::String(self.get_version().await?));
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
        match self.scalar("get_version", "SELECT sqlite_version()").await? {
            Value::String(version) => Ok(version),
            other => Ok(other.to_string()),
        }
    }

    /// An embedded database has no server identity; the file path is the
    /// stable identifier.
    async fn get_unique_identifier(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        Ok(self.handle.database_path.clone())
    }

    async fn get_database_size(&self) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        let pages = self
            .scalar("get_database_size", "PRAGMA page_count")
            .await?
            .as_i64()
            .unwrap_or(0);
        let page_size = self
            .scalar("get_database_size", "PRAGMA page_size")
            .await?
            .as_i64()
            .unwrap_or(0);
        Ok((pages.max(0) as u64) * (page_size.max(0) as u64))
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
