use crate::Handle;
use adapter::Error;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{Executor, Postgres, Statement, TypeInfo};
use std::str::FromStr;
use usm::DatabaseType;

fn err(operation: &'static str, e: sqlx::Error) -> Error {
    Error::from_sqlx(DatabaseType::Postgres, operation, e)
}

/// Prepare the statement so the server reports the parameter types it
/// inferred from context, then bind each JSON value coerced to the
/// expected type. This is what lets dynamically-typed rows hit strongly
/// typed columns (uuid, timestamp, numeric) without per-call schema
/// knowledge.
pub async fn execute(
    handle: &Handle,
    operation: &'static str,
    sql: &str,
    params: &[Value],
) -> Result<u64, Error> {
    let statement = handle
        .pool
        .prepare(sql)
        .await
        .map_err(|e| err(operation, e))?;
    let types = parameter_types(&statement);

    let mut query = sqlx::query(sql);
    for (index, value) in params.iter().enumerate() {
        query = bind_coerced(query, value, types.get(index).copied(), operation)?;
    }
    let result = query
        .execute(&handle.pool)
        .await
        .map_err(|e| err(operation, e))?;
    Ok(result.rows_affected())
}

/// As `execute`, returning the result rows.
pub async fn fetch_all(
    handle: &Handle,
    operation: &'static str,
    sql: &str,
    params: &[Value],
) -> Result<Vec<PgRow>, Error> {
    let statement = handle
        .pool
        .prepare(sql)
        .await
        .map_err(|e| err(operation, e))?;
    let types = parameter_types(&statement);

    let mut query = sqlx::query(sql);
    for (index, value) in params.iter().enumerate() {
        query = bind_coerced(query, value, types.get(index).copied(), operation)?;
    }
    query
        .fetch_all(&handle.pool)
        .await
        .map_err(|e| err(operation, e))
}

fn parameter_types<'a>(
    statement: &'a sqlx::postgres::PgStatement<'_>,
) -> Vec<&'a PgTypeInfo> {
    match statement.parameters() {
        Some(sqlx::Either::Left(types)) => types.iter().collect(),
        _ => Vec::new(),
    }
}

fn bind_coerced<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
    expected: Option<&PgTypeInfo>,
    operation: &'static str,
) -> Result<Query<'q, Postgres, PgArguments>, Error> {
    let type_name = expected.map(TypeInfo::name).unwrap_or("");

    // The bound Rust type must agree with the expected wire type: binding
    // an i64 against an INT4 parameter would re-declare it as INT8.
    let query = match type_name {
        "INT2" | "INT4" => match to_i64(value) {
            Some(v) => query.bind(v as i32),
            None => query.bind(Option::<i32>::None),
        },
        "INT8" => match to_i64(value) {
            Some(v) => query.bind(v),
            None => query.bind(Option::<i64>::None),
        },
        "FLOAT4" => match to_f64(value) {
            Some(v) => query.bind(v as f32),
            None => query.bind(Option::<f32>::None),
        },
        "FLOAT8" => match to_f64(value) {
            Some(v) => query.bind(v),
            None => query.bind(Option::<f64>::None),
        },
        "NUMERIC" => {
            let decimal = match value {
                Value::Null => None,
                Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
                Value::String(s) => BigDecimal::from_str(s).ok(),
                _ => None,
            };
            match (decimal, value.is_null()) {
                (Some(d), _) => query.bind(d),
                (None, true) => query.bind(Option::<BigDecimal>::None),
                (None, false) => {
                    return Err(invalid(operation, value, "numeric"));
                }
            }
        }
        "BOOL" => match value {
            Value::Null => query.bind(Option::<bool>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => query.bind(n.as_f64() != Some(0.0)),
            Value::String(s) => query.bind(matches!(s.as_str(), "true" | "t" | "1")),
            _ => return Err(invalid(operation, value, "boolean")),
        },
        "UUID" => match value {
            Value::Null => query.bind(Option::<uuid::Uuid>::None),
            Value::String(s) => match uuid::Uuid::parse_str(s) {
                Ok(u) => query.bind(u),
                Err(_) => return Err(invalid(operation, value, "uuid")),
            },
            _ => return Err(invalid(operation, value, "uuid")),
        },
        "TIMESTAMPTZ" => match value {
            Value::Null => query.bind(Option::<DateTime<Utc>>::None),
            Value::String(s) => match parse_timestamptz(s) {
                Some(t) => query.bind(t),
                None => return Err(invalid(operation, value, "timestamptz")),
            },
            _ => return Err(invalid(operation, value, "timestamptz")),
        },
        "TIMESTAMP" => match value {
            Value::Null => query.bind(Option::<NaiveDateTime>::None),
            Value::String(s) => match parse_timestamp(s) {
                Some(t) => query.bind(t),
                None => return Err(invalid(operation, value, "timestamp")),
            },
            _ => return Err(invalid(operation, value, "timestamp")),
        },
        "DATE" => match value {
            Value::Null => query.bind(Option::<NaiveDate>::None),
            Value::String(s) => match NaiveDate::from_str(s) {
                Ok(d) => query.bind(d),
                Err(_) => return Err(invalid(operation, value, "date")),
            },
            _ => return Err(invalid(operation, value, "date")),
        },
        "TIME" => match value {
            Value::Null => query.bind(Option::<NaiveTime>::None),
            Value::String(s) => match NaiveTime::from_str(s) {
                Ok(t) => query.bind(t),
                Err(_) => return Err(invalid(operation, value, "time")),
            },
            _ => return Err(invalid(operation, value, "time")),
        },
        "JSON" | "JSONB" => match value {
            Value::Null => query.bind(Option::<Value>::None),
            other => query.bind(other.clone()),
        },
        "BYTEA" => match value {
            Value::Null => query.bind(Option::<Vec<u8>>::None),
            Value::String(s) => match base64::decode(s) {
                Ok(bytes) => query.bind(bytes),
                // Not base64; store the raw text bytes.
                Err(_) => query.bind(s.as_bytes().to_vec()),
            },
            _ => return Err(invalid(operation, value, "bytea")),
        },
        "TEXT[]" | "VARCHAR[]" => match value {
            Value::Null => query.bind(Option::<Vec<String>>::None),
            Value::Array(items) => {
                let strings: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                query.bind(strings)
            }
            _ => return Err(invalid(operation, value, "text[]")),
        },
        "INT4[]" => match value {
            Value::Null => query.bind(Option::<Vec<i32>>::None),
            Value::Array(items) => {
                let numbers: Option<Vec<i32>> =
                    items.iter().map(|v| to_i64(v).map(|n| n as i32)).collect();
                match numbers {
                    Some(numbers) => query.bind(numbers),
                    None => return Err(invalid(operation, value, "integer[]")),
                }
            }
            _ => return Err(invalid(operation, value, "integer[]")),
        },
        "INT8[]" => match value {
            Value::Null => query.bind(Option::<Vec<i64>>::None),
            Value::Array(items) => {
                let numbers: Option<Vec<i64>> = items.iter().map(to_i64).collect();
                match numbers {
                    Some(numbers) => query.bind(numbers),
                    None => return Err(invalid(operation, value, "bigint[]")),
                }
            }
            _ => return Err(invalid(operation, value, "bigint[]")),
        },
        // TEXT, VARCHAR, enums, and anything the server didn't type:
        // fall back to the JSON class of the value. Structured values
        // JSON-encode to text, since the column is not an array/object.
        _ => match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) if n.is_i64() || n.is_u64() => {
                query.bind(n.as_i64().unwrap_or(i64::MAX))
            }
            Value::Number(n) => query.bind(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => query.bind(s.clone()),
            structured => query.bind(structured.to_string()),
        },
    };
    Ok(query)
}

fn invalid(operation: &'static str, value: &Value, expected: &str) -> Error {
    Error::InvalidData(format!(
        "{operation}: cannot bind {value} as {expected}"
    ))
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::from_str(s)
                .ok()
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        })
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::from_str(s)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.naive_utc())
        })
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_coercions() {
        assert_eq!(to_i64(&json!(7)), Some(7));
        assert_eq!(to_i64(&json!("42")), Some(42));
        assert_eq!(to_i64(&json!(true)), Some(1));
        assert_eq!(to_i64(&json!([1])), None);
        assert_eq!(to_f64(&json!("1.25")), Some(1.25));
    }

    #[test]
    fn timestamps_accept_common_shapes() {
        assert!(parse_timestamptz("2024-05-01T12:30:00+00:00").is_some());
        assert!(parse_timestamp("2024-05-01T12:30:00").is_some());
        assert!(parse_timestamp("2024-05-01 12:30:00.125").is_some());
        assert!(parse_timestamp("May 1st").is_none());
    }
}
