use crate::{bind, decode::decode_row, Handle};
use adapter::{CdcMechanism, ChangeBatch, ChangeStream, Error, ReplicationOps, Row};
use serde_json::Value;

/// Change capture over a wal2json logical replication slot. The slot is
/// the durable cursor: fetches peek, and `ack` advances the slot once a
/// window is applied.
pub struct PgReplication {
    handle: Handle,
}

impl PgReplication {
    pub fn new(handle: Handle) -> PgReplication {
        PgReplication { handle }
    }
}

/// A valid replication slot identifier derived from the source id.
fn slot_name(source_id: &str) -> String {
    let mut name = String::from("cdc_");
    for ch in source_id.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push('_');
        }
    }
    name.truncate(63);
    name
}

#[async_trait::async_trait]
impl ReplicationOps for PgReplication {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::LogicalSlot
    }

    async fn current_position(&self) -> Result<String, Error> {
        self.handle.ensure_connected()?;
        let rows = bind::fetch_all(
            &self.handle,
            "current_position",
            "SELECT pg_current_wal_lsn()::text AS lsn",
            &[],
        )
        .await?;
        rows.first()
            .map(decode_row)
            .and_then(|row| row.get("lsn").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| Error::InvalidData("no current WAL position".to_string()))
    }

    #[tracing::instrument(skip(self), fields(db = "postgres"))]
    async fn open_change_stream(
        &self,
        source_id: &str,
        table: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>, Error> {
        self.handle.ensure_connected()?;
        let slot = slot_name(source_id);

        let existing = bind::fetch_all(
            &self.handle,
            "open_change_stream",
            "SELECT 1 AS present FROM pg_replication_slots WHERE slot_name = $1",
            &[Value::String(slot.clone())],
        )
        .await?;
        if existing.is_empty() {
            bind::fetch_all(
                &self.handle,
                "open_change_stream",
                "SELECT pg_create_logical_replication_slot($1, 'wal2json')",
                &[Value::String(slot.clone())],
            )
            .await?;
            tracing::info!(%slot, "created logical replication slot");
        }

        Ok(Box::new(WalStream {
            handle: self.handle.clone(),
            slot,
            table: table.map(str::to_string),
        }))
    }
}

struct WalStream {
    handle: Handle,
    slot: String,
    table: Option<String>,
}

#[async_trait::async_trait]
impl ChangeStream for WalStream {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::LogicalSlot
    }

    async fn fetch_changes(
        &mut self,
        _from: Option<&str>,
        max: usize,
    ) -> Result<ChangeBatch, Error> {
        // The slot itself is the position: peek returns everything after
        // the last advance, and `from` is implied by it.
        let sql = "SELECT lsn::text AS lsn, data \
                   FROM pg_logical_slot_peek_changes($1, NULL, $2, \
                        'format-version', '2', \
                        'actions', 'insert,update,delete,truncate')";
        let rows = bind::fetch_all(
            &self.handle,
            "fetch_changes",
            sql,
            &[
                Value::String(self.slot.clone()),
                Value::from(max as i64),
            ],
        )
        .await?;

        let mut changes = Vec::new();
        let mut next_position = None;
        for row in rows.iter().map(decode_row) {
            let Some(lsn) = row.get("lsn").and_then(Value::as_str) else {
                continue;
            };
            next_position = Some(lsn.to_string());

            let Some(parsed) = row
                .get("data")
                .and_then(Value::as_str)
                .and_then(|data| serde_json::from_str::<Value>(data).ok())
            else {
                continue;
            };
            if let Some(change) = normalize_wal2json(&parsed, lsn) {
                if let Some(only) = &self.table {
                    let matches = change
                        .get("table_name")
                        .and_then(Value::as_str)
                        .map(|t| t == only)
                        .unwrap_or(false);
                    if !matches {
                        continue;
                    }
                }
                changes.push(change);
            }
        }
        Ok(ChangeBatch {
            changes,
            next_position,
        })
    }

    async fn ack(&mut self, position: &str) -> Result<(), Error> {
        bind::fetch_all(
            &self.handle,
            "ack",
            "SELECT pg_replication_slot_advance($1, $2::pg_lsn)",
            &[
                Value::String(self.slot.clone()),
                Value::String(position.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        // The slot stays for resume; dropping it would lose the cursor.
        Ok(())
    }
}

/// Flatten one wal2json (format version 2) change record into the raw
/// event shape the normalizer expects. Begin/commit records are filtered
/// out by the slot options and any other action is skipped here.
fn normalize_wal2json(parsed: &Value, lsn: &str) -> Option<Row> {
    let action = parsed.get("action").and_then(Value::as_str)?;
    if !matches!(action, "I" | "U" | "D" | "T") {
        return None;
    }

    let mut raw = Row::new();
    raw.insert("operation".to_string(), Value::String(action.to_string()));
    raw.insert("lsn".to_string(), Value::String(lsn.to_string()));
    if let Some(table) = parsed.get("table").and_then(Value::as_str) {
        raw.insert("table_name".to_string(), Value::String(table.to_string()));
    }
    if let Some(schema) = parsed.get("schema").and_then(Value::as_str) {
        raw.insert("schema_name".to_string(), Value::String(schema.to_string()));
    }
    if let Some(columns) = parsed.get("columns").and_then(Value::as_array) {
        raw.insert("data".to_string(), columns_to_map(columns));
    }
    if let Some(identity) = parsed.get("identity").and_then(Value::as_array) {
        raw.insert("old_data".to_string(), columns_to_map(identity));
    }
    Some(raw)
}

fn columns_to_map(columns: &[Value]) -> Value {
    let mut map = serde_json::Map::new();
    for column in columns {
        let Some(name) = column.get("name").and_then(Value::as_str) else {
            continue;
        };
        map.insert(
            name.to_string(),
            column.get("value").cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(map)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_names_are_valid_identifiers() {
        assert_eq!(slot_name("Src-1/a"), "cdc_src_1_a");
        assert!(slot_name(&"x".repeat(100)).len() <= 63);
    }

    #[test]
    fn wal2json_update_normalizes() {
        let parsed = json!({
            "action": "U",
            "schema": "public",
            "table": "t",
            "columns": [
                {"name": "id", "type": "integer", "value": 1},
                {"name": "v", "type": "text", "value": "new"},
            ],
            "identity": [
                {"name": "id", "type": "integer", "value": 1},
                {"name": "v", "type": "text", "value": "old"},
            ],
        });
        let raw = normalize_wal2json(&parsed, "0/A1B2C3D4").unwrap();
        assert_eq!(raw.get("operation"), Some(&json!("U")));
        assert_eq!(raw.get("table_name"), Some(&json!("t")));
        assert_eq!(raw.get("data"), Some(&json!({"id": 1, "v": "new"})));
        assert_eq!(raw.get("old_data"), Some(&json!({"id": 1, "v": "old"})));
        assert_eq!(raw.get("lsn"), Some(&json!("0/A1B2C3D4")));
    }

    #[test]
    fn begin_and_commit_records_are_skipped() {
        assert!(normalize_wal2json(&json!({"action": "B"}), "0/1").is_none());
        assert!(normalize_wal2json(&json!({"action": "C"}), "0/1").is_none());
    }
}
