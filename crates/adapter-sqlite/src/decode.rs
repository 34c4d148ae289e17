use adapter::{sanitize_binary, Row};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo};

/// SQLite is dynamically typed; the declared type is a hint and the
/// stored value can be anything, so decoding falls through storage
/// classes until one fits.
pub fn decode_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => {
            if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
                return value.map(Value::from).unwrap_or(Value::Null);
            }
        }
        "REAL" | "DOUBLE" | "FLOAT" | "NUMERIC" | "DECIMAL" => {
            if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
                return value.map(Value::from).unwrap_or(Value::Null);
            }
        }
        "BOOLEAN" => {
            if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
                return value.map(Value::from).unwrap_or(Value::Null);
            }
        }
        "BLOB" => {
            if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
                return value
                    .map(|bytes| sanitize_binary(&bytes))
                    .unwrap_or(Value::Null);
            }
        }
        _ => (),
    }

    // TEXT, declared types, and anything the hint missed.
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value
            .map(|bytes| sanitize_binary(&bytes))
            .unwrap_or(Value::Null);
    }
    tracing::warn!(type_name, "undecodable column value, yielding null");
    Value::Null
}
