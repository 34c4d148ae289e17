use crate::{decode::decode_row, fetch_all, Handle};
use adapter::{Error, InstanceOps};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::DatabaseType;

/// Server-scope operations barely apply to an embedded engine: the
/// "instance" is the process, and databases are files. Listing reflects
/// attached databases; create and drop are filesystem concerns that this
/// adapter does not take on.
pub struct SqliteInstance {
    handle: Handle,
}

impl SqliteInstance {
    pub fn new(handle: Handle) -> SqliteInstance {
        SqliteInstance { handle }
    }
}

#[async_trait::async_trait]
impl InstanceOps for SqliteInstance {
    async fn collect_instance_metadata(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.handle.ensure_connected()?;
        let mut out = BTreeMap::new();
        out.insert(
            "database_path".to_string(),
            Value::String(self.handle.database_path.clone()),
        );
        let databases = self.list_databases().await?;
        out.insert(
            "databases".to_string(),
            Value::Array(databases.into_iter().map(Value::String).collect()),
        );
        Ok(out)
    }

    async fn list_databases(&self) -> Result<Vec<String>, Error> {
        self.handle.ensure_connected()?;
        let rows = fetch_all(&self.handle, "list_databases", "PRAGMA database_list", &[]).await?;
        Ok(rows
            .iter()
            .map(decode_row)
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn create_database(
        &self,
        _name: &str,
        _options: &BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        Err(Error::NotSupported {
            database_type: DatabaseType::Sqlite,
            operation: "create_database",
        })
    }

    async fn drop_database(
        &self,
        _name: &str,
        _options: &BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        Err(Error::NotSupported {
            database_type: DatabaseType::Sqlite,
            operation: "drop_database",
        })
    }
}
