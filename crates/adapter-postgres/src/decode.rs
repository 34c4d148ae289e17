use adapter::{sanitize_binary, Row};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo};

/// Decode one driver row into the core value set. Unknown types fall back
/// to text, then null with a warning; a decode failure never aborts the
/// whole fetch.
pub fn decode_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" => opt(row.try_get::<Option<i16>, _>(index).map(|v| v.map(Value::from))),
        "INT4" => opt(row.try_get::<Option<i32>, _>(index).map(|v| v.map(Value::from))),
        "INT8" | "OID" => opt(row.try_get::<Option<i64>, _>(index).map(|v| v.map(Value::from))),
        "FLOAT4" => opt(row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|f| Value::from(f as f64)))),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(index).map(|v| v.map(Value::from))),
        // Decimals stay textual to preserve precision.
        "NUMERIC" => opt(row
            .try_get::<Option<BigDecimal>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string())))),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::from))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => opt(row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map(Value::String))),
        "UUID" => opt(row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(|v| v.map(|u| Value::String(u.to_string())))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())))),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339())))),
        "DATE" => opt(row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string())))),
        "TIME" => opt(row
            .try_get::<Option<NaiveTime>, _>(index)
            .map(|v| v.map(|t| Value::String(t.to_string())))),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(index)),
        "BYTEA" => opt(row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| v.map(|bytes| sanitize_binary(&bytes)))),
        "TEXT[]" | "VARCHAR[]" => opt(row
            .try_get::<Option<Vec<String>>, _>(index)
            .map(|v| v.map(|items| Value::Array(items.into_iter().map(Value::String).collect())))),
        "INT4[]" => opt(row
            .try_get::<Option<Vec<i32>>, _>(index)
            .map(|v| v.map(|items| Value::Array(items.into_iter().map(Value::from).collect())))),
        "INT8[]" => opt(row
            .try_get::<Option<Vec<i64>>, _>(index)
            .map(|v| v.map(|items| Value::Array(items.into_iter().map(Value::from).collect())))),
        other => {
            // Enums and other textual types decode as strings.
            match row.try_get::<Option<String>, _>(index) {
                Ok(value) => value.map(Value::String).unwrap_or(Value::Null),
                Err(_) => {
                    tracing::warn!(type_name = other, "undecodable column value, yielding null");
                    Value::Null
                }
            }
        }
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
