use adapter::{Error, Row};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved keys that never count as data columns. Backends stash
/// positions and envelope details under these; the applier skips them and
/// the parser preserves them in `metadata` for checkpointing.
pub const METADATA_FIELDS: &[&str] = &[
    "operation",
    "table_name",
    "schema_name",
    "database_name",
    "owner",
    "database_id",
    "timestamp",
    "lsn",
    "scn",
    "binlog_file",
    "binlog_position",
    "message_type",
    "raw_data_b64",
    "data_length",
    "is_update",
    "_redb_meta",
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CdcOperation {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl CdcOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOperation::Insert => "INSERT",
            CdcOperation::Update => "UPDATE",
            CdcOperation::Delete => "DELETE",
            CdcOperation::Truncate => "TRUNCATE",
        }
    }
}

impl std::fmt::Display for CdcOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CdcOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INSERT" | "I" | "C" => Ok(CdcOperation::Insert),
            "UPDATE" | "U" => Ok(CdcOperation::Update),
            "DELETE" | "D" => Ok(CdcOperation::Delete),
            "TRUNCATE" | "T" => Ok(CdcOperation::Truncate),
            other => Err(Error::InvalidData(format!(
                "unrecognized change operation '{other}'"
            ))),
        }
    }
}

/// One normalized row-level change, whatever backend produced it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CdcEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: CdcOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<Row>,
    /// The source's ordering token, mirrored from `metadata`: a WAL LSN,
    /// `file:position`, SCN, or poll watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsn: Option<String>,
    #[serde(default, skip_serializing_if = "Row::is_empty")]
    pub metadata: Row,
}

/// Normalize one raw change map. `operation` and a non-empty table name
/// are required; the rest is best-effort with sensible defaults.
pub fn parse_event(raw: &Row) -> Result<CdcEvent, Error> {
    let operation: CdcOperation = raw
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidData("change event is missing 'operation'".to_string()))?
        .parse()?;

    let table_name = raw
        .get("table_name")
        .or_else(|| raw.get("table"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if table_name.is_empty() {
        return Err(Error::InvalidData(
            "change event is missing 'table_name'".to_string(),
        ));
    }

    let schema_name = ["schema_name", "schema", "owner", "database_name"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    let data = raw.get("data").and_then(as_row);
    let old_data = raw.get("old_data").and_then(as_row);

    // Preserve every reserved key that is present, then mirror whichever
    // position field the backend used into `lsn`.
    let mut metadata = Row::new();
    for key in METADATA_FIELDS {
        if let Some(value) = raw.get(*key) {
            metadata.insert(key.to_string(), value.clone());
        }
    }
    let lsn = position_from(&metadata);

    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(CdcEvent {
        timestamp,
        operation,
        schema_name,
        table_name,
        data,
        old_data,
        lsn,
        metadata,
    })
}

/// The position token carried by a raw event's reserved keys.
fn position_from(metadata: &Row) -> Option<String> {
    if let Some(lsn) = metadata.get("lsn").and_then(Value::as_str) {
        return Some(lsn.to_string());
    }
    if let Some(position) = metadata.get("binlog_position") {
        let position = scalar_to_string(position)?;
        return match metadata.get("binlog_file").and_then(Value::as_str) {
            Some(file) => Some(format!("{file}:{position}")),
            None => Some(position),
        };
    }
    metadata.get("scn").and_then(scalar_to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_row(value: &Value) -> Option<Row> {
    value
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Split a payload into data columns, dropping reserved keys and any key
/// the event itself declares as metadata.
pub fn data_columns(payload: &Row, event_metadata: &Row) -> Row {
    payload
        .iter()
        .filter(|(key, _)| {
            !METADATA_FIELDS.contains(&key.as_str()) && !event_metadata.contains_key(*key)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn operations_uppercase_on_parse() {
        for (input, expect) in [
            ("insert", CdcOperation::Insert),
            ("Update", CdcOperation::Update),
            ("DELETE", CdcOperation::Delete),
            ("truncate", CdcOperation::Truncate),
        ] {
            let event = parse_event(&raw(&[
                ("operation", json!(input)),
                ("table_name", json!("t")),
            ]))
            .unwrap();
            assert_eq!(event.operation, expect);
            assert_eq!(event.operation.to_string(), input.to_uppercase());
        }
    }

    #[test]
    fn missing_table_or_operation_is_invalid() {
        assert!(parse_event(&raw(&[("operation", json!("insert"))])).is_err());
        assert!(parse_event(&raw(&[("table_name", json!("t"))])).is_err());
        assert!(parse_event(&raw(&[
            ("operation", json!("upsert")),
            ("table_name", json!("t")),
        ]))
        .is_err());
    }

    #[test]
    fn table_alias_and_owner_schema() {
        let event = parse_event(&raw(&[
            ("operation", json!("delete")),
            ("table", json!("orders")),
            ("owner", json!("APP")),
        ]))
        .unwrap();
        assert_eq!(event.table_name, "orders");
        assert_eq!(event.schema_name.as_deref(), Some("APP"));
    }

    #[test]
    fn binlog_position_mirrors_into_lsn() {
        let event = parse_event(&raw(&[
            ("operation", json!("update")),
            ("table_name", json!("t")),
            ("binlog_file", json!("mysql-bin.000007")),
            ("binlog_position", json!(4821)),
            ("data", json!({"id": 1})),
        ]))
        .unwrap();
        assert_eq!(event.lsn.as_deref(), Some("mysql-bin.000007:4821"));
        assert_eq!(event.metadata.get("binlog_position"), Some(&json!(4821)));
    }

    #[test]
    fn scn_and_wal_positions_mirror() {
        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("scn", json!("48732918")),
        ]))
        .unwrap();
        assert_eq!(event.lsn.as_deref(), Some("48732918"));

        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("lsn", json!("0/A1B2C3D4")),
        ]))
        .unwrap();
        assert_eq!(event.lsn.as_deref(), Some("0/A1B2C3D4"));
    }

    #[test]
    fn timestamp_honors_rfc3339_and_defaults_to_now() {
        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("timestamp", json!("2024-05-01T12:30:00+00:00")),
        ]))
        .unwrap();
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T12:30:00+00:00");

        let before = Utc::now();
        let event = parse_event(&raw(&[
            ("operation", json!("insert")),
            ("table_name", json!("t")),
            ("timestamp", json!("not a timestamp")),
        ]))
        .unwrap();
        assert!(event.timestamp >= before);
    }

    #[test]
    fn data_columns_drop_reserved_keys() {
        let payload = raw(&[
            ("id", json!(1)),
            ("name", json!("a")),
            ("lsn", json!("0/1")),
            ("database_id", json!("db-7")),
        ]);
        let columns = data_columns(&payload, &Row::new());
        assert_eq!(columns.len(), 2);
        assert!(columns.contains_key("id") && columns.contains_key("name"));
    }
}
