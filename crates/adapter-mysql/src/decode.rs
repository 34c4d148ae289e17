use adapter::{sanitize_binary, Row};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row as _, TypeInfo};

pub fn decode_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            opt(row.try_get::<Option<i64>, _>(index).map(|v| v.map(Value::from)))
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => opt(row
            .try_get::<Option<u64>, _>(index)
            .map(|v| v.map(Value::from))),
        "FLOAT" => opt(row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|f| Value::from(f as f64)))),
        "DOUBLE" => opt(row.try_get::<Option<f64>, _>(index).map(|v| v.map(Value::from))),
        "DECIMAL" => opt(row
            .try_get::<Option<BigDecimal>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string())))),
        "BOOLEAN" => opt(row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::from))),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            opt(row
                .try_get::<Option<String>, _>(index)
                .map(|v| v.map(Value::String)))
        }
        "DATETIME" => opt(row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339())))),
        "DATE" => opt(row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string())))),
        "TIME" => opt(row
            .try_get::<Option<NaiveTime>, _>(index)
            .map(|v| v.map(|t| Value::String(t.to_string())))),
        "JSON" => opt(row.try_get::<Option<Value>, _>(index)),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => opt(row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| v.map(|bytes| sanitize_binary(&bytes)))),
        other => match row.try_get::<Option<String>, _>(index) {
            Ok(value) => value.map(Value::String).unwrap_or(Value::Null),
            Err(_) => {
                tracing::warn!(type_name = other, "undecodable column value, yielding null");
                Value::Null
            }
        },
    }
}

fn opt(result: Result<Option<Value>, sqlx::Error>) -> Value {
    match result {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(error) => {
            tracing::warn!(%error, "failed to decode column, yielding null");
            Value::Null
        }
    }
}
