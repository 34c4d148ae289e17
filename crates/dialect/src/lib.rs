mod dml;
mod mysql;
mod postgres;
mod sqlite;
mod typeparse;

pub use dml::{build_delete, build_insert, build_select, build_update, build_upsert, Statement};
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::collections::BTreeMap;
use usm::{
    Column, Constraint, DataType, DatabaseType, Function, Index, Procedure, Sequence, Table,
    Trigger, TypeDef, View,
};

/// How a backend spells bind-parameter placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `?`, positional.
    Question,
    /// `$1`, `$2`, ... one-indexed.
    Dollar,
    /// `:1`, `:2`, ... one-indexed.
    Colon,
}

impl MarkerStyle {
    /// The marker for the one-indexed `index`.
    pub fn marker(&self, index: usize) -> String {
        match self {
            MarkerStyle::Question => "?".to_string(),
            MarkerStyle::Dollar => format!("${index}"),
            MarkerStyle::Colon => format!(":{index}"),
        }
    }
}

/// Which insert-or-update syntax a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertForm {
    /// `INSERT ... ON CONFLICT (cols) DO UPDATE`.
    OnConflict,
    /// `INSERT ... ON DUPLICATE KEY UPDATE`.
    OnDuplicateKey,
    /// `MERGE ... WHEN MATCHED / WHEN NOT MATCHED`.
    Merge,
    /// Probe with SELECT, then INSERT or UPDATE.
    Emulated,
}

/// Per-backend pure helpers: identifier quoting, parameter markers, the type
/// map in both directions, and DDL emission. Implementations never perform
/// I/O; they turn model values into SQL text and nothing else.
pub trait Dialect: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// The identifier quote character (`"` or `` ` ``).
    fn quote_char(&self) -> char;

    fn marker_style(&self) -> MarkerStyle;

    fn upsert_form(&self) -> UpsertForm;

    /// Wrap `name` in the dialect's quote character, doubling embedded
    /// occurrences. Empty names produce the empty quoted form.
    fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(q);
        for ch in name.chars() {
            out.push(ch);
            if ch == q {
                out.push(q);
            }
        }
        out.push(q);
        out
    }

    /// `"schema"."name"` when a schema is present, else `"name"`.
    fn quote_qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            _ => self.quote_identifier(name),
        }
    }

    fn parameter_marker(&self, index: usize) -> String {
        self.marker_style().marker(index)
    }

    /// Render a model type as this backend's native column type. Total:
    /// types the backend cannot represent degrade to a text spelling.
    fn map_type(&self, data_type: &DataType) -> String;

    /// Parse a native type string (as system catalogs print it) back into a
    /// model type. Total: unknown names map to the string fallback with a
    /// warning, retaining the native spelling as `custom_type_name`.
    fn parse_type(&self, native: &str) -> DataType;

    /// One column definition inside CREATE TABLE.
    fn column_definition(&self, column: &Column) -> String;

    /// CREATE TABLE with columns, inline NOT NULL / auto-increment /
    /// defaults, and a table-level PRIMARY KEY clause. Foreign keys are
    /// never inlined here except where the backend cannot add them later.
    fn emit_create_table(&self, table: &Table, types: &BTreeMap<String, TypeDef>) -> String;

    /// ALTER TABLE ... ADD CONSTRAINT for FK/UNIQUE/CHECK. Returns None
    /// where the backend cannot add the constraint after table creation.
    fn emit_add_constraint(&self, table: &Table, constraint: &Constraint) -> Option<String>;

    fn emit_create_index(&self, table: &Table, index: &Index) -> String;

    /// CREATE SEQUENCE, for backends that have sequences.
    fn emit_create_sequence(&self, sequence: &Sequence) -> Option<String> {
        let _ = sequence;
        None
    }

    /// CREATE TYPE / CREATE DOMAIN, for backends with user-defined types.
    fn emit_create_type(&self, type_def: &TypeDef) -> Option<String> {
        let _ = type_def;
        None
    }

    /// CREATE FUNCTION, where the backend's DDL is reconstructible from
    /// the discovered signature and body.
    fn emit_create_function(&self, function: &Function) -> Option<String> {
        let _ = function;
        None
    }

    fn emit_create_procedure(&self, procedure: &Procedure) -> Option<String> {
        let _ = procedure;
        None
    }

    fn emit_create_trigger(&self, trigger: &Trigger) -> Option<String> {
        let _ = trigger;
        None
    }

    fn emit_create_view(&self, view: &View) -> String {
        let head = if view.materialized {
            "CREATE MATERIALIZED VIEW"
        } else {
            "CREATE VIEW"
        };
        format!(
            "{head} {} AS {}",
            self.quote_qualified(view.schema.as_deref(), &view.name),
            view.definition
        )
    }

    /// Quote a literal default value for embedding in DDL.
    fn quote_literal(&self, literal: &str) -> String {
        format!("'{}'", literal.replace('\'', "''"))
    }

    /// The statement that empties one table.
    fn emit_truncate(&self, schema: Option<&str>, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.quote_qualified(schema, table))
    }
}

/// The dialect for a backend type. Dialects are stateless statics.
pub fn dialect_for(database_type: DatabaseType) -> &'static dyn Dialect {
    match database_type {
        DatabaseType::Postgres => &PostgresDialect,
        DatabaseType::MySql => &MySqlDialect,
        DatabaseType::Sqlite => &SqliteDialect,
    }
}

/// The table's primary-key column list: the PK constraint when present,
/// otherwise columns flagged `is_primary_key` in ordinal order.
pub(crate) fn primary_key_columns(table: &Table) -> Option<Vec<String>> {
    if let Some(pk) = table.primary_key() {
        return Some(pk.columns.clone());
    }
    let flagged: Vec<String> = table
        .ordered_columns()
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.clone())
        .collect();
    if flagged.is_empty() {
        None
    } else {
        Some(flagged)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quote_chars() {
        let pg = dialect_for(DatabaseType::Postgres);
        assert_eq!(pg.quote_identifier("plain"), r#""plain""#);
        assert_eq!(pg.quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(pg.quote_identifier(""), r#""""#);

        let my = dialect_for(DatabaseType::MySql);
        assert_eq!(my.quote_identifier("t"), "`t`");
        assert_eq!(my.quote_identifier("a`b"), "`a``b`");
    }

    // quote(unquote(quote(n))) == quote(n) for any non-empty name.
    #[test]
    fn quoting_round_trips() {
        let unquote = |quoted: &str, q: char| -> String {
            let inner = &quoted[1..quoted.len() - 1];
            inner.replace(&format!("{q}{q}"), &q.to_string())
        };
        for dialect in [
            dialect_for(DatabaseType::Postgres),
            dialect_for(DatabaseType::MySql),
            dialect_for(DatabaseType::Sqlite),
        ] {
            for name in ["a", "mixed Case", "with\"both`quotes", "ümlaut"] {
                let quoted = dialect.quote_identifier(name);
                let back = unquote(&quoted, dialect.quote_char());
                assert_eq!(dialect.quote_identifier(&back), quoted);
            }
        }
    }

    #[test]
    fn marker_styles() {
        assert_eq!(MarkerStyle::Question.marker(3), "?");
        assert_eq!(MarkerStyle::Dollar.marker(3), "$3");
        assert_eq!(MarkerStyle::Colon.marker(12), ":12");
    }

    #[test]
    fn qualified_names() {
        let pg = dialect_for(DatabaseType::Postgres);
        assert_eq!(pg.quote_qualified(Some("app"), "users"), r#""app"."users""#);
        assert_eq!(pg.quote_qualified(None, "users"), r#""users""#);
    }
}
