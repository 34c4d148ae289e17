use crate::event::{data_columns, CdcEvent, CdcOperation};
use adapter::{DataOps, Error};
use dialect::Dialect;
use std::collections::BTreeMap;
use std::sync::Arc;
use usm::DatabaseType;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Permit an UPDATE that resolved to zero WHERE conditions to run as
    /// `WHERE 1=1`. Off by default: the safe behavior is to fail rather
    /// than silently touch every row.
    pub permit_unfiltered_update: bool,
}

/// Turns normalized change events into DML against a target connection's
/// data facet. Serial per source; the inline call chain is the
/// back-pressure.
pub struct Applier {
    dialect: &'static dyn Dialect,
    data: Arc<dyn DataOps>,
    options: ApplyOptions,
}

impl Applier {
    pub fn new(
        database_type: DatabaseType,
        data: Arc<dyn DataOps>,
        options: ApplyOptions,
    ) -> Applier {
        Applier {
            dialect: dialect::dialect_for(database_type),
            data,
            options,
        }
    }

    /// Apply one event, returning affected rows. Errors name the
    /// operation and target table.
    pub async fn apply(&self, event: &CdcEvent) -> Result<u64, Error> {
        let affected = match event.operation {
            CdcOperation::Insert => self.apply_insert(event).await?,
            CdcOperation::Update => self.apply_update(event).await?,
            CdcOperation::Delete => self.apply_delete(event).await?,
            CdcOperation::Truncate => {
                let sql = self
                    .dialect
                    .emit_truncate(event.schema_name.as_deref(), &event.table_name);
                self.data.execute(&sql, &[]).await?
            }
        };
        tracing::debug!(
            op = %event.operation,
            table = %event.table_name,
            affected,
            "applied change event"
        );
        Ok(affected)
    }

    async fn apply_insert(&self, event: &CdcEvent) -> Result<u64, Error> {
        let data = match &event.data {
            Some(data) => data_columns(data, &event.metadata),
            None => return Ok(0),
        };
        if data.is_empty() {
            // Nothing but metadata fields; not an error.
            return Ok(0);
        }
        let columns: Vec<String> = data.keys().cloned().collect();
        let statement = dialect::build_insert(
            self.dialect,
            event.schema_name.as_deref(),
            &event.table_name,
            &columns,
            &[&data],
        );
        self.data.execute(&statement.sql, &statement.params).await
    }

    async fn apply_update(&self, event: &CdcEvent) -> Result<u64, Error> {
        let data = event
            .data
            .as_ref()
            .map(|data| data_columns(data, &event.metadata))
            .unwrap_or_default();
        if data.is_empty() {
            return Err(Error::InvalidData(format!(
                "UPDATE on '{}' carries no data columns",
                event.table_name
            )));
        }

        let old_data = event
            .old_data
            .as_ref()
            .map(|old| data_columns(old, &event.metadata));

        // With a before-image, assign only the columns that changed and
        // filter on the before-image. Without one, the after-image serves
        // as both. A before-image that filtered down to nothing still
        // governs the WHERE clause, which the policy below then judges.
        let (set, conditions) = match &old_data {
            Some(old) if !old.is_empty() => {
                let set: BTreeMap<_, _> = data
                    .iter()
                    .filter(|(column, value)| old.get(*column) != Some(value))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (set, old.clone())
            }
            Some(old) => (data.clone(), old.clone()),
            None => (data.clone(), data.clone()),
        };
        if set.is_empty() {
            // The before- and after-images agree; re-applying is a no-op.
            return Ok(0);
        }

        let mut statement = dialect::build_update(
            self.dialect,
            event.schema_name.as_deref(),
            &event.table_name,
            &set,
            &conditions,
        );
        if conditions.is_empty() {
            if !self.options.permit_unfiltered_update {
                return Err(Error::InvalidData(format!(
                    "UPDATE on '{}' resolved to no WHERE conditions",
                    event.table_name
                )));
            }
            tracing::warn!(
                table = %event.table_name,
                "applying UPDATE with no conditions as WHERE 1=1"
            );
            statement.sql.push_str(" WHERE 1=1");
        }
        self.data.execute(&statement.sql, &statement.params).await
    }

    async fn apply_delete(&self, event: &CdcEvent) -> Result<u64, Error> {
        let conditions = event
            .old_data
            .as_ref()
            .or(event.data.as_ref())
            .map(|payload| data_columns(payload, &event.metadata))
            .unwrap_or_default();
        if conditions.is_empty() {
            return Err(Error::InvalidData(format!(
                "DELETE on '{}' resolved to no WHERE conditions",
                event.table_name
            )));
        }
        let statement = dialect::build_delete(
            self.dialect,
            event.schema_name.as_deref(),
            &event.table_name,
            &conditions,
        );
        self.data.execute(&statement.sql, &statement.params).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::parse_event;
    use adapter::{Row, StreamPage, StreamParams};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records executed statements instead of touching a database.
    pub(crate) struct RecordingData {
        pub executed: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl RecordingData {
        pub(crate) fn new() -> Arc<RecordingData> {
            Arc::new(RecordingData {
                executed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl DataOps for RecordingData {
        async fn fetch(&self, _table: &str, _limit: Option<u64>) -> Result<Vec<Row>, Error> {
            Ok(vec![])
        }
        async fn fetch_with_columns(
            &self,
            _table: &str,
            _columns: &[String],
            _limit: Option<u64>,
        ) -> Result<Vec<Row>, Error> {
            Ok(vec![])
        }
        async fn insert(&self, _table: &str, _rows: &[Row]) -> Result<u64, Error> {
            Ok(0)
        }
        async fn update(
            &self,
            _table: &str,
            _rows: &[Row],
            _where_columns: &[String],
        ) -> Result<u64, Error> {
            Ok(0)
        }
        async fn upsert(
            &self,
            _table: &str,
            _rows: &[Row],
            _unique_columns: &[String],
        ) -> Result<u64, Error> {
            Ok(0)
        }
        async fn delete(&self, _table: &str, _conditions: &Row) -> Result<u64, Error> {
            Ok(0)
        }
        async fn stream(&self, _params: StreamParams) -> Result<StreamPage, Error> {
            Ok(StreamPage {
                rows: vec![],
                has_more: false,
                next_cursor: None,
            })
        }
        async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
            self.executed
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(1)
        }
        async fn execute_query(&self, _sql: &str) -> Result<Vec<Row>, Error> {
            Ok(vec![])
        }
        async fn execute_count_query(&self, _sql: &str) -> Result<i64, Error> {
            Ok(0)
        }
        async fn get_row_count(
            &self,
            _table: &str,
            _where_clause: Option<&str>,
        ) -> Result<(i64, bool), Error> {
            Ok((0, true))
        }
        async fn wipe(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn raw(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn applier(data: &Arc<RecordingData>) -> Applier {
        Applier::new(
            DatabaseType::Postgres,
            data.clone() as Arc<dyn DataOps>,
            ApplyOptions::default(),
        )
    }

    #[tokio::test]
    async fn update_with_old_data_sets_changed_columns_only() {
        let data = RecordingData::new();
        let event = parse_event(&raw(&[
            ("operation", json!("update")),
            ("table_name", json!("t")),
            ("data", json!({"id": 1, "v": "new"})),
            ("old_data", json!({"id": 1, "v": "old"})),
        ]))
        .unwrap();
        applier(&data).apply(&event).await.unwrap();

        let executed = data.executed.lock().unwrap();
        let (sql, params) = &executed[0];
        assert_eq!(
            sql,
            r#"UPDATE "t" SET "v" = $1 WHERE "id" = $2 AND "v" = $3"#
        );
        assert_eq!(params, &vec![json!("new"), json!(1), json!("old")]);
    }

    #[tokio::test]
    async fn delete_without_old_data_filters_on_data() {
        let data = RecordingData::new();
        let event = parse_event(&raw(&[
            ("operation", json!("delete")),
            ("table_name", json!("t")),
            ("data", json!({"id": 7})),
        ]))
        .unwrap();
        applier(&data).apply(&event).await.unwrap();

        let executed = data.executed.lock().unwrap();
        let (sql, params) = &executed[0];
        assert_eq!(sql, r#"DELETE FROM "t" WHERE "id" = $1"#);
        assert_eq!(params, &vec![json!(7)]);
    }

    #[tokio::test]
    async fn insert_skips_metadata_fields_and_empty_is_a_noop() {
        let data = RecordingData::new();
        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("data", json!({"id": 1, "lsn": "0/1", "database_id": "db"})),
        ]))
        .unwrap();
        applier(&data).apply(&event).await.unwrap();
        {
            let executed = data.executed.lock().unwrap();
            assert_eq!(executed[0].0, r#"INSERT INTO "t" ("id") VALUES ($1)"#);
        }

        // All-metadata payload applies as a no-op.
        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("data", json!({"lsn": "0/2"})),
        ]))
        .unwrap();
        assert_eq!(applier(&data).apply(&event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unfiltered_update_fails_unless_opted_in() {
        let data = RecordingData::new();
        // old_data present but entirely metadata: conditions resolve empty.
        let event = parse_event(&raw(&[
            ("operation", json!("update")),
            ("table_name", json!("t")),
            ("data", json!({"v": "x"})),
            ("old_data", json!({})),
        ]))
        .unwrap();

        let strict = applier(&data);
        assert!(matches!(
            strict.apply(&event).await,
            Err(Error::InvalidData(_))
        ));

        let permissive = Applier::new(
            DatabaseType::Postgres,
            data.clone() as Arc<dyn DataOps>,
            ApplyOptions {
                permit_unfiltered_update: true,
            },
        );
        permissive.apply(&event).await.unwrap();
        let executed = data.executed.lock().unwrap();
        assert_eq!(executed[0].0, r#"UPDATE "t" SET "v" = $1 WHERE 1=1"#);
    }

    #[tokio::test]
    async fn truncate_and_repeat_update_idempotence() {
        let data = RecordingData::new();
        let event = parse_event(&raw(&[
            ("operation", json!("truncate")),
            ("table_name", json!("t")),
        ]))
        .unwrap();
        applier(&data).apply(&event).await.unwrap();
        assert_eq!(
            data.executed.lock().unwrap()[0].0,
            r#"TRUNCATE TABLE "t""#
        );

        // Applying the same UPDATE twice issues the same statement twice.
        let update = parse_event(&raw(&[
            ("operation", json!("update")),
            ("table_name", json!("t")),
            ("data", json!({"id": 1, "v": "new"})),
            ("old_data", json!({"id": 1, "v": "old"})),
        ]))
        .unwrap();
        let a = applier(&data);
        a.apply(&update).await.unwrap();
        a.apply(&update).await.unwrap();
        let executed = data.executed.lock().unwrap();
        let n = executed.len();
        assert_eq!(executed[n - 1], executed[n - 2]);
    }
}
