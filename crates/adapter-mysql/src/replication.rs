use crate::{decode::decode_row, fetch_all, Handle};
use adapter::{CdcMechanism, ChangeBatch, ChangeStream, Error, ReplicationOps, Row};
use serde_json::Value;
use usm::DatabaseType;

/// Change capture by timestamp polling. A true binlog client is not part
/// of this driver, so the adapter reads binlog coordinates for position
/// reporting but tails tables through a change-tracking column. Degraded
/// by design: every observed change surfaces as an UPDATE, and ordering
/// holds only within one table.
pub struct MySqlReplication {
    handle: Handle,
}

impl MySqlReplication {
    pub fn new(handle: Handle) -> MySqlReplication {
        MySqlReplication { handle }
    }
}

#[async_trait::async_trait]
impl ReplicationOps for MySqlReplication {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::Polling
    }

    /// The binlog head, `file:position`, even though the poll loop tracks
    /// a timestamp watermark; callers use this for drift reporting.
    async fn current_position(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        let rows = fetch_all(&self.handle, "current_position", "SHOW MASTER STATUS", &[]).await?;
        let row = rows
            .first()
            .map(decode_row)
            .ok_or_else(|| Error::InvalidData("binary logging is not enabled".to_string()))?;
        let file = row
            .get("File")
            .or_else(|| row.get("file"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let position = row
            .get("Position")
            .or_else(|| row.get("position"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if file.is_empty() {
            return Err(Error::InvalidData("binary logging is not enabled".to_string()));
        }
        Ok(format!("{file}:{position}"))
    }

    #[tracing::instrument(skip(self), fields(db = "mysql"))]
    async fn open_change_stream(
        &self,
        source_id: &str,
        table: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>, Error> {
        self.handle.ensure_connected()?;
        let Some(table) = table else {
            return Err(Error::NotSupported {
                database_type: DatabaseType::MySql,
                operation: "database-wide change stream (polling requires a table)",
            });
        };

        // Prefer a column the server itself maintains on update.
        let rows = fetch_all(
            &self.handle,
            "open_change_stream",
            "SELECT column_name, extra FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
               AND data_type IN ('timestamp', 'datetime') \
             ORDER BY (extra LIKE '%on update%') DESC, ordinal_position \
             LIMIT 1",
            &[Value::String(table.to_string())],
        )
        .await?;
        let tracking_column = rows
            .first()
            .map(decode_row)
            .and_then(|row| {
                row.get("column_name")
                    .or_else(|| row.get("COLUMN_NAME"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| Error::NotSupported {
                database_type: DatabaseType::MySql,
                operation: "polling change capture without a timestamp column",
            })?;

        tracing::info!(
            source_id,
            table,
            %tracking_column,
            "opened polling change stream"
        );
        Ok(Box::new(PollStream {
            handle: self.handle.clone(),
            table: table.to_string(),
            tracking_column,
        }))
    }
}

struct PollStream {
    handle: Handle,
    table: String,
    tracking_column: String,
}

#[async_trait::async_trait]
impl ChangeStream for PollStream {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::Polling
    }

    async fn fetch_changes(
        &mut self,
        from: Option<&str>,
        max: usize,
    ) -> Result<ChangeBatch, Error> {
        let dialect = dialect::dialect_for(DatabaseType::MySql);
        let quoted_column = dialect.quote_identifier(&self.tracking_column);
        let quoted_table = dialect.quote_identifier(&self.table);

        let (sql, params) = match from {
            Some(watermark) => (
                format!(
                    "SELECT * FROM {quoted_table} WHERE {quoted_column} > ? \
                     ORDER BY {quoted_column} ASC LIMIT {max}"
                ),
                vec![Value::String(watermark.replace('T', " "))],
            ),
            None => (
                format!(
                    "SELECT * FROM {quoted_table} ORDER BY {quoted_column} ASC LIMIT {max}"
                ),
                Vec::new(),
            ),
        };
        let rows = fetch_all(&self.handle, "fetch_changes", &sql, &params).await?;

        let mut changes = Vec::new();
        let mut next_position = from.map(str::to_string);
        for row in rows.iter().map(decode_row) {
            let Some(watermark) = row
                .get(&self.tracking_column)
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };

            // Without history, inserts and updates are indistinguishable;
            // everything is reported as an update keyed by the full row.
            let mut raw = Row::new();
            raw.insert("operation".to_string(), Value::String("update".to_string()));
            raw.insert("table_name".to_string(), Value::String(self.table.clone()));
            raw.insert(
                "data".to_string(),
                Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            );
            raw.insert("lsn".to_string(), Value::String(watermark.clone()));
            changes.push(raw);
            next_position = Some(watermark);
        }
        Ok(ChangeBatch {
            changes,
            next_position,
        })
    }

    async fn ack(&mut self, _position: &str) -> Result<(), Error> {
        // The watermark is the whole cursor; there is nothing to release.
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
