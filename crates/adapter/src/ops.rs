use crate::{CdcMechanism, Error, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::{Table, UnifiedSchema};

/// Schema discovery and structure creation for one connected database.
#[async_trait::async_trait]
pub trait SchemaOps: Send + Sync {
    /// Read system catalogs into the unified model: schemas, tables with
    /// columns/constraints/indexes, user types, sequences, views,
    /// functions, triggers, extensions. System schemas are excluded.
    async fn discover_schema(&self) -> Result<UnifiedSchema, Error>;

    /// Materialize a unified model in this database. Runs in one
    /// transaction when the backend supports transactional DDL; otherwise
    /// best-effort, reporting what was created before the failure.
    /// Creation order: types, sequences, schemas, tables, indexes,
    /// non-PK constraints, views, functions, procedures, triggers.
    /// Foreign keys are always deferred to the post-table phase, so
    /// reference cycles between tables need no topological sort.
    async fn create_structure(&self, schema: &UnifiedSchema) -> Result<(), Error>;

    async fn list_tables(&self) -> Result<Vec<String>, Error>;

    async fn get_table_schema(&self, table: &str) -> Result<Table, Error>;
}

/// One page of a table stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPage {
    pub rows: Vec<Row>,
    /// True iff the page was full, i.e. a further page may exist.
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub batch_size: u32,
    /// Opaque continuation from the previous page; None starts over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Row and document access for one connected database.
#[async_trait::async_trait]
pub trait DataOps: Send + Sync {
    async fn fetch(&self, table: &str, limit: Option<u64>) -> Result<Vec<Row>, Error>;

    async fn fetch_with_columns(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<Vec<Row>, Error>;

    /// Insert rows. The column set is taken from the first row and every
    /// row must carry the same keys. Empty input inserts nothing and
    /// returns zero. Transactional where the backend supports it.
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, Error>;

    /// Per row: SET every non-`where_columns` field, filter by the
    /// `where_columns` values (`IS NULL` for null values).
    async fn update(
        &self,
        table: &str,
        rows: &[Row],
        where_columns: &[String],
    ) -> Result<u64, Error>;

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        unique_columns: &[String],
    ) -> Result<u64, Error>;

    /// Delete matching rows. Empty conditions are an error, never an
    /// unrestricted delete.
    async fn delete(&self, table: &str, conditions: &Row) -> Result<u64, Error>;

    async fn stream(&self, params: StreamParams) -> Result<StreamPage, Error>;

    /// Execute one parameterized statement, returning affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error>;

    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>, Error>;

    async fn execute_count_query(&self, sql: &str) -> Result<i64, Error>;

    /// Row count and whether it is exact rather than statistics-based.
    async fn get_row_count(
        &self,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<(i64, bool), Error>;

    /// Empty every table in the connected database, disabling referential
    /// checks where required and restoring them on all exit paths.
    async fn wipe(&self) -> Result<(), Error>;
}

/// A batch of raw change maps plus the position after the batch. Each raw
/// change carries its own position fields for checkpointing.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changes: Vec<Row>,
    pub next_position: Option<String>,
}

/// A live cursor over a backend's native change feed. Implementations own
/// whatever native resource backs it (replication slot, poll query) and
/// release it on `close`.
#[async_trait::async_trait]
pub trait ChangeStream: Send {
    fn mechanism(&self) -> CdcMechanism;

    /// Read changes after `from` (or from the start when None), up to
    /// `max`. Fetching must not consume: a batch is only discarded by a
    /// later `ack`.
    async fn fetch_changes(
        &mut self,
        from: Option<&str>,
        max: usize,
    ) -> Result<ChangeBatch, Error>;

    /// Discard the feed through `position`, after a successful apply.
    async fn ack(&mut self, position: &str) -> Result<(), Error>;

    async fn close(&mut self) -> Result<(), Error>;
}

/// Change-data-capture plumbing for one connected database.
#[async_trait::async_trait]
pub trait ReplicationOps: Send + Sync {
    fn mechanism(&self) -> CdcMechanism;

    /// The backend's current head position (WAL LSN, binlog file:offset,
    /// poll watermark).
    async fn current_position(&self) -> Result<String, Error>;

    /// Open a change stream for the named table (or the whole database
    /// when None).
    async fn open_change_stream(
        &self,
        source_id: &str,
        table: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>, Error>;
}

/// The backend-agnostic result shape of `execute_command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEnvelope {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub count: usize,
}

impl CommandEnvelope {
    pub fn from_rows(rows: Vec<Row>) -> CommandEnvelope {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        CommandEnvelope {
            columns,
            count: rows.len(),
            rows,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope of JSON values always serializes")
    }
}

/// Administrative metadata for one connected database.
#[async_trait::async_trait]
pub trait MetadataOps: Send + Sync {
    async fn collect_database_metadata(&self) -> Result<BTreeMap<String, Value>, Error>;

    async fn get_version(&self) -> Result<String, Error>;

    /// A stable identifier distinguishing this database instance.
    async fn get_unique_identifier(&self) -> Result<String, Error>;

    async fn get_database_size(&self) -> Result<u64, Error>;

    async fn get_table_count(&self) -> Result<u64, Error>;

    /// Run an arbitrary command, returning the JSON `CommandEnvelope`.
    async fn execute_command(&self, command: &str) -> Result<String, Error>;
}

/// Server-scope operations, available on instance connections.
#[async_trait::async_trait]
pub trait InstanceOps: Send + Sync {
    async fn collect_instance_metadata(&self) -> Result<BTreeMap<String, Value>, Error>;

    async fn list_databases(&self) -> Result<Vec<String>, Error>;

    /// Recognized option keys vary per backend: `if_not_exists`,
    /// `character_set`, `collate`, `admin_user`, `admin_password`, ...
    async fn create_database(
        &self,
        name: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<(), Error>;

    /// Recognized option keys: `if_exists`, `cascade`,
    /// `include_datafiles`, ...
    async fn drop_database(
        &self,
        name: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<(), Error>;
}

/// Liveness and teardown of the underlying pool.
#[async_trait::async_trait]
pub trait Lifecycle: Send + Sync {
    async fn ping(&self) -> Result<(), Error>;

    async fn close(&self);
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_envelope_shape() {
        let rows = vec![
            [("id".to_string(), json!(1)), ("name".to_string(), json!("a"))]
                .into_iter()
                .collect::<Row>(),
            [("id".to_string(), json!(2)), ("name".to_string(), json!(null))]
                .into_iter()
                .collect::<Row>(),
        ];
        let envelope = CommandEnvelope::from_rows(rows);
        let parsed: serde_json::Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(parsed["columns"], json!(["id", "name"]));
        assert_eq!(parsed["count"], json!(2));
        assert_eq!(parsed["rows"][1]["name"], json!(null));
    }

    #[test]
    fn empty_envelope() {
        let envelope = CommandEnvelope::from_rows(vec![]);
        assert_eq!(envelope.to_json(), r#"{"columns":[],"rows":[],"count":0}"#);
    }
}
