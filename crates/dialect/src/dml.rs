use crate::{Dialect, UpsertForm};
use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;

/// A SQL string plus its bind parameters, in marker order. Null-valued
/// WHERE conditions are folded into `IS NULL` text and contribute no
/// parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Tracks marker indexes across a statement so `$N` dialects number
/// their placeholders correctly.
struct Markers<'a> {
    dialect: &'a dyn Dialect,
    next: usize,
}

impl<'a> Markers<'a> {
    fn new(dialect: &'a dyn Dialect) -> Markers<'a> {
        Markers { dialect, next: 1 }
    }

    fn next(&mut self) -> String {
        let marker = self.dialect.parameter_marker(self.next);
        self.next += 1;
        marker
    }
}

/// `INSERT INTO t (cols) VALUES (...), (...)`. The column list is the
/// caller's; every row must carry exactly those keys.
pub fn build_insert(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    columns: &[String],
    rows: &[&BTreeMap<String, Value>],
) -> Statement {
    let mut markers = Markers::new(dialect);
    let mut params = Vec::with_capacity(columns.len() * rows.len());

    let tuples = rows
        .iter()
        .map(|row| {
            let tuple = columns.iter().map(|_| markers.next()).join(", ");
            for column in columns {
                params.push(row.get(column).cloned().unwrap_or(Value::Null));
            }
            format!("({tuple})")
        })
        .join(", ");

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {tuples}",
            dialect.quote_qualified(schema, table),
            columns.iter().map(|c| dialect.quote_identifier(c)).join(", "),
        ),
        params,
    }
}

/// `UPDATE t SET ... WHERE ...`. SET columns always bind a parameter;
/// WHERE columns bind one unless the value is null, which renders as
/// `IS NULL`. An empty condition map produces no WHERE clause; policy on
/// unfiltered updates belongs to the caller.
pub fn build_update(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    set: &BTreeMap<String, Value>,
    conditions: &BTreeMap<String, Value>,
) -> Statement {
    let mut markers = Markers::new(dialect);
    let mut params = Vec::new();

    let assignments = set
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = {}", dialect.quote_identifier(column), markers.next())
        })
        .join(", ");

    let mut sql = format!(
        "UPDATE {} SET {assignments}",
        dialect.quote_qualified(schema, table),
    );
    let where_clause = render_conditions(dialect, &mut markers, &mut params, conditions);
    if !where_clause.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause);
    }
    Statement { sql, params }
}

/// `DELETE FROM t WHERE ...`. Callers must reject empty conditions before
/// calling; an empty map here emits no WHERE clause.
pub fn build_delete(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    conditions: &BTreeMap<String, Value>,
) -> Statement {
    let mut markers = Markers::new(dialect);
    let mut params = Vec::new();

    let mut sql = format!("DELETE FROM {}", dialect.quote_qualified(schema, table));
    let where_clause = render_conditions(dialect, &mut markers, &mut params, conditions);
    if !where_clause.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause);
    }
    Statement { sql, params }
}

/// `SELECT cols FROM t [LIMIT n] [OFFSET m]`. A `None` column list selects
/// `*`.
pub fn build_select(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    columns: Option<&[String]>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> String {
    let projection = match columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!(
        "SELECT {projection} FROM {}",
        dialect.quote_qualified(schema, table),
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    sql
}

/// Insert-or-update in the dialect's native form. `unique_columns` names
/// the conflict target; remaining columns become the update set.
pub fn build_upsert(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    columns: &[String],
    rows: &[&BTreeMap<String, Value>],
    unique_columns: &[String],
) -> Statement {
    let mut statement = build_insert(dialect, schema, table, columns, rows);
    let update_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !unique_columns.contains(c))
        .collect();

    match dialect.upsert_form() {
        UpsertForm::OnConflict => {
            let target = unique_columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .join(", ");
            if update_columns.is_empty() {
                statement
                    .sql
                    .push_str(&format!(" ON CONFLICT ({target}) DO NOTHING"));
            } else {
                let assignments = update_columns
                    .iter()
                    .map(|c| {
                        let quoted = dialect.quote_identifier(c);
                        format!("{quoted} = EXCLUDED.{quoted}")
                    })
                    .join(", ");
                statement.sql.push_str(&format!(
                    " ON CONFLICT ({target}) DO UPDATE SET {assignments}"
                ));
            }
        }
        UpsertForm::OnDuplicateKey => {
            let assignments = if update_columns.is_empty() {
                // At least one assignment is required; reassigning a key
                // column to itself makes the statement a no-op on conflict.
                let quoted =
                    dialect.quote_identifier(unique_columns.first().map_or("", |c| c.as_str()));
                format!("{quoted} = {quoted}")
            } else {
                update_columns
                    .iter()
                    .map(|c| {
                        let quoted = dialect.quote_identifier(c);
                        format!("{quoted} = VALUES({quoted})")
                    })
                    .join(", ")
            };
            statement
                .sql
                .push_str(&format!(" ON DUPLICATE KEY UPDATE {assignments}"));
        }
        UpsertForm::Merge | UpsertForm::Emulated => {
            // No current dialect declares these forms; the adapter for a
            // backend that does must emulate above this layer.
        }
    }
    statement
}

fn render_conditions(
    dialect: &dyn Dialect,
    markers: &mut Markers<'_>,
    params: &mut Vec<Value>,
    conditions: &BTreeMap<String, Value>,
) -> String {
    conditions
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", dialect.quote_identifier(column))
            } else {
                params.push(value.clone());
                format!("{} = {}", dialect.quote_identifier(column), markers.next())
            }
        })
        .join(" AND ")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect_for;
    use serde_json::json;
    use usm::DatabaseType;

    fn row(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_emits_one_marker_per_column() {
        let pg = dialect_for(DatabaseType::Postgres);
        let r = row(&[("a", json!(1)), ("b", json!("x")), ("c", json!(null))]);
        let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let statement = build_insert(pg, None, "t", &columns, &[&r]);

        assert_eq!(
            statement.sql,
            r#"INSERT INTO "t" ("a", "b", "c") VALUES ($1, $2, $3)"#
        );
        assert_eq!(statement.params, vec![json!(1), json!("x"), json!(null)]);
    }

    #[test]
    fn multi_row_insert_numbers_markers_across_rows() {
        let pg = dialect_for(DatabaseType::Postgres);
        let r1 = row(&[("a", json!(1))]);
        let r2 = row(&[("a", json!(2))]);
        let statement = build_insert(pg, None, "t", &["a".to_string()], &[&r1, &r2]);
        assert_eq!(statement.sql, r#"INSERT INTO "t" ("a") VALUES ($1), ($2)"#);
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn update_null_condition_becomes_is_null() {
        let pg = dialect_for(DatabaseType::Postgres);
        let statement = build_update(
            pg,
            None,
            "t",
            &row(&[("v", json!("new"))]),
            &row(&[("id", json!(1)), ("note", json!(null))]),
        );
        assert_eq!(
            statement.sql,
            r#"UPDATE "t" SET "v" = $1 WHERE "id" = $2 AND "note" IS NULL"#
        );
        assert_eq!(statement.params, vec![json!("new"), json!(1)]);
    }

    #[test]
    fn delete_with_question_markers() {
        let my = dialect_for(DatabaseType::MySql);
        let statement = build_delete(my, None, "t", &row(&[("id", json!(7))]));
        assert_eq!(statement.sql, "DELETE FROM `t` WHERE `id` = ?");
        assert_eq!(statement.params, vec![json!(7)]);
    }

    #[test]
    fn upsert_on_conflict() {
        let pg = dialect_for(DatabaseType::Postgres);
        let r = row(&[
            ("email", json!("a@x")),
            ("name", json!("A")),
            ("age", json!(25)),
        ]);
        let columns = vec!["email".to_string(), "name".to_string(), "age".to_string()];
        let statement = build_upsert(pg, None, "users", &columns, &[&r], &["email".to_string()]);
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "users" ("email", "name", "age") VALUES ($1, $2, $3) ON CONFLICT ("email") DO UPDATE SET "name" = EXCLUDED."name", "age" = EXCLUDED."age""#
        );
    }

    #[test]
    fn upsert_on_duplicate_key() {
        let my = dialect_for(DatabaseType::MySql);
        let r = row(&[("email", json!("a@x")), ("name", json!("A"))]);
        let columns = vec!["email".to_string(), "name".to_string()];
        let statement = build_upsert(my, None, "users", &columns, &[&r], &["email".to_string()]);
        assert_eq!(
            statement.sql,
            "INSERT INTO `users` (`email`, `name`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
    }

    #[test]
    fn upsert_with_only_key_columns_does_nothing_on_conflict() {
        let pg = dialect_for(DatabaseType::Postgres);
        let r = row(&[("email", json!("a@x"))]);
        let columns = vec!["email".to_string()];
        let statement = build_upsert(pg, None, "users", &columns, &[&r], &columns.clone());
        assert!(statement.sql.ends_with(r#"ON CONFLICT ("email") DO NOTHING"#));
    }

    #[test]
    fn select_projection_and_paging() {
        let pg = dialect_for(DatabaseType::Postgres);
        assert_eq!(
            build_select(pg, Some("app"), "t", None, Some(100), Some(200)),
            r#"SELECT * FROM "app"."t" LIMIT 100 OFFSET 200"#
        );
        assert_eq!(
            build_select(pg, None, "t", Some(&["a".to_string()]), None, None),
            r#"SELECT "a" FROM "t""#
        );
    }
}
