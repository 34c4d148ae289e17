use crate::{bind, decode::decode_row, Handle};
use adapter::{DataOps, Error, Row, StreamPage, StreamParams};
use dialect::{dialect_for, Dialect};
use itertools::Itertools;
use serde_json::Value;
use usm::DatabaseType;

pub struct PgData {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

impl PgData {
    pub fn new(handle: Handle) -> PgData {
        PgData {
            handle,
            dialect: dialect_for(DatabaseType::Postgres),
        }
    }

    fn err(operation: &'static str, e: sqlx::Error) -> Error {
        Error::from_sqlx(DatabaseType::Postgres, operation, e)
    }

    /// The column list shared by a batch of rows: the first row's keys.
    /// Every other row must carry exactly the same keys.
    fn batch_columns(rows: &[Row], operation: &'static str) -> Result<Vec<String>, Error> {
        let columns: Vec<String> = rows[0].keys().cloned().collect();
        for (index, row) in rows.iter().enumerate().skip(1) {
            if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
                return Err(Error::InvalidData(format!(
                    "{operation}: row {index} does not match the column set of row 0"
                )));
            }
        }
        Ok(columns)
    }
}

#[async_trait::async_trait]
impl DataOps for PgData {
    #[tracing::instrument(skip(self), fields(db = "postgres"))]
    async fn fetch(&self, table: &str, limit: Option<u64>) -> Result<Vec<Row>, Error> {
        self.handle.ensure_connected()?;
        let sql = dialect::build_select(self.dialect, None, table, None, limit, None);
        let rows = bind::fetch_all(&self.handle, "fetch", &sql, &[]).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn fetch_with_columns(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<Vec<Row>, Error> {
        self.handle.ensure_connected()?;
        let sql = dialect::build_select(self.dialect, None, table, Some(columns), limit, None);
        let rows = bind::fetch_all(&self.handle, "fetch_with_columns", &sql, &[]).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    #[tracing::instrument(skip(self, rows), fields(db = "postgres", rows = rows.len()))]
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = Self::batch_columns(rows, "insert")?;
        let row_refs: Vec<&Row> = rows.iter().collect();
        let statement = dialect::build_insert(self.dialect, None, table, &columns, &row_refs);
        bind::execute(&self.handle, "insert", &statement.sql, &statement.params).await
    }

    async fn update(
        &self,
        table: &str,
        rows: &[Row],
        where_columns: &[String],
    ) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        if rows.is_empty() {
            return Ok(0);
        }
        if where_columns.is_empty() {
            return Err(Error::InvalidData(
                "update requires at least one where column".to_string(),
            ));
        }

        let mut tx = self
            .handle
            .pool
            .begin()
            .await
            .map_err(|e| Self::err("update", e))?;
        let mut affected = 0u64;
        for row in rows {
            let set: Row = row
                .iter()
                .filter(|(column, _)| !where_columns.contains(column))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let conditions: Row = row
                .iter()
                .filter(|(column, _)| where_columns.contains(column))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if set.is_empty() || conditions.len() != where_columns.len() {
                return Err(Error::InvalidData(
                    "update row is missing set or where values".to_string(),
                ));
            }
            let statement =
                dialect::build_update(self.dialect, None, table, &set, &conditions);

            let mut query = sqlx::query(&statement.sql);
            for value in &statement.params {
                query = bind_plain(query, value);
            }
            let result = query
                .execute(&mut tx)
                .await
                .map_err(|e| Self::err("update", e))?;
            affected += result.rows_affected();
        }
        tx.commit().await.map_err(|e| Self::err("update", e))?;
        Ok(affected)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        unique_columns: &[String],
    ) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        if rows.is_empty() {
            return Ok(0);
        }
        if unique_columns.is_empty() {
            return Err(Error::InvalidData(
                "upsert requires at least one unique column".to_string(),
            ));
        }
        let columns = Self::batch_columns(rows, "upsert")?;
        let row_refs: Vec<&Row> = rows.iter().collect();
        let statement = dialect::build_upsert(
            self.dialect,
            None,
            table,
            &columns,
            &row_refs,
            unique_columns,
        );
        bind::execute(&self.handle, "upsert", &statement.sql, &statement.params).await
    }

    async fn delete(&self, table: &str, conditions: &Row) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        if conditions.is_empty() {
            return Err(Error::InvalidData(
                "delete requires at least one condition".to_string(),
            ));
        }
        let statement = dialect::build_delete(self.dialect, None, table, conditions);
        bind::execute(&self.handle, "delete", &statement.sql, &statement.params).await
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamPage, Error> {
        self.handle.ensure_connected()?;
        let offset: u64 = params
            .cursor
            .as_deref()
            .map(|cursor| {
                cursor.parse().map_err(|_| {
                    Error::InvalidData(format!("malformed stream cursor '{cursor}'"))
                })
            })
            .transpose()?
            .unwrap_or(0);

        let sql = dialect::build_select(
            self.dialect,
            None,
            &params.table,
            params.columns.as_deref(),
            Some(params.batch_size as u64),
            Some(offset),
        );
        let rows = bind::fetch_all(&self.handle, "stream", &sql, &[]).await?;
        let rows: Vec<Row> = rows.iter().map(decode_row).collect();

        let has_more = rows.len() as u64 == params.batch_size as u64;
        let next_cursor = has_more.then(|| (offset + rows.len() as u64).to_string());
        Ok(StreamPage {
            rows,
            has_more,
            next_cursor,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        self.handle.ensure_connected()?;
        bind::execute(&self.handle, "execute", sql, params).await
    }

    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>, Error> {
        self.handle.ensure_connected()?;
        let rows = bind::fetch_all(&self.handle, "execute_query", sql, &[]).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute_count_query(&self, sql: &str) -> Result<i64, Error> {
        self.handle.ensure_connected()?;
        let rows = bind::fetch_all(&self.handle, "execute_count_query", sql, &[]).await?;
        let first = rows
            .first()
            .ok_or_else(|| Error::InvalidData("count query returned no rows".to_string()))?;
        let decoded = decode_row(first);
        decoded
            .values()
            .next()
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidData("count query returned no integer".to_string()))
    }

    async fn get_row_count(
        &self,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<(i64, bool), Error> {
        self.handle.ensure_connected()?;
        match where_clause {
            Some(filter) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE {filter}",
                    self.dialect.quote_identifier(table)
                );
                Ok((self.execute_count_query(&sql).await?, true))
            }
            None => {
                // The planner's estimate; cheap on large tables but not exact.
                let sql = "SELECT reltuples::bigint FROM pg_class WHERE oid = $1::regclass";
                let rows = bind::fetch_all(
                    &self.handle,
                    "get_row_count",
                    sql,
                    &[Value::String(self.dialect.quote_identifier(table))],
                )
                .await?;
                let estimate = rows
                    .first()
                    .map(decode_row)
                    .and_then(|row| row.values().next().and_then(Value::as_i64))
                    .ok_or_else(|| Error::NotFound {
                        kind: "table",
                        name: table.to_string(),
                    })?;
                if estimate < 0 {
                    // Never analyzed; fall back to the exact count.
                    let sql = format!(
                        "SELECT COUNT(*) FROM {}",
                        self.dialect.quote_identifier(table)
                    );
                    return Ok((self.execute_count_query(&sql).await?, true));
                }
                Ok((estimate, false))
            }
        }
    }

    #[tracing::instrument(skip(self), fields(db = "postgres"))]
    async fn wipe(&self) -> Result<(), Error> {
        self.handle.ensure_connected()?;
        let tables = crate::schema::user_tables(&self.handle).await?;
        if tables.is_empty() {
            return Ok(());
        }
        // One statement; CASCADE follows foreign keys so ordering and
        // constraint toggling are unnecessary.
        let list = tables
            .iter()
            .map(|(schema, table)| {
                self.dialect.quote_qualified(Some(schema.as_str()), table)
            })
            .join(", ");
        let sql = format!("TRUNCATE TABLE {list} CASCADE");
        bind::execute(&self.handle, "wipe", &sql, &[]).await?;
        Ok(())
    }
}

/// Bind by JSON class alone, for statements inside a transaction where
/// prepare-based type introspection is unavailable.
fn bind_plain<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() || n.is_u64() => query.bind(n.as_i64().unwrap_or(i64::MAX)),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => query.bind(s.clone()),
        structured => query.bind(structured.to_string()),
    }
}
