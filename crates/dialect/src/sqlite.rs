use crate::typeparse::split_native_type;
use crate::{Dialect, MarkerStyle, UpsertForm};
use itertools::Itertools;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DataType, DatabaseType, Index, ReferentialAction,
    SortOrder, Table, Trigger, TypeCategory, TypeDef,
};

/// SQLite: double-quoted identifiers, `?` markers, transactional DDL,
/// `ON CONFLICT` upserts. Constraints cannot be added after table creation,
/// so every constraint is inlined into CREATE TABLE and
/// `emit_add_constraint` has nothing to do.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Question
    }

    fn upsert_form(&self) -> UpsertForm {
        UpsertForm::OnConflict
    }

    fn map_type(&self, data_type: &DataType) -> String {
        // Declared type names are free-form under affinity rules and are
        // preserved verbatim in sqlite_master, so spellings round-trip.
        match data_type.base_type.as_str() {
            "smallint" => "SMALLINT".to_string(),
            "int" | "integer" => "INTEGER".to_string(),
            "bigint" => "BIGINT".to_string(),
            "varchar" => match data_type.length {
                Some(n) => format!("VARCHAR({n})"),
                None => "TEXT".to_string(),
            },
            "char" => format!("CHAR({})", data_type.length.unwrap_or(1)),
            "text" => "TEXT".to_string(),
            "boolean" => "BOOLEAN".to_string(),
            "real" => "REAL".to_string(),
            "double" => "DOUBLE".to_string(),
            "decimal" | "numeric" => match (data_type.precision, data_type.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p},{s})"),
                (Some(p), None) => format!("DECIMAL({p})"),
                _ => "NUMERIC".to_string(),
            },
            "timestamp" | "timestamptz" => "TIMESTAMP".to_string(),
            "date" => "DATE".to_string(),
            "time" => "TIME".to_string(),
            "json" => "JSON".to_string(),
            "uuid" => "UUID".to_string(),
            "bytes" => "BLOB".to_string(),
            other => {
                tracing::warn!(native = other, "no sqlite rendering for type, using TEXT");
                "TEXT".to_string()
            }
        }
    }

    fn parse_type(&self, native: &str) -> DataType {
        let parts = split_native_type(native);
        let scalar = DataType::scalar;
        match parts.base.as_str() {
            "smallint" | "tinyint" => scalar("smallint", TypeCategory::Numeric),
            "int" | "integer" | "mediumint" => scalar("int", TypeCategory::Numeric),
            "bigint" | "int8" => scalar("bigint", TypeCategory::Numeric),
            "varchar" | "nvarchar" | "varying character" => DataType {
                length: parts.length_or_precision,
                ..scalar("varchar", TypeCategory::String)
            },
            "char" | "character" | "nchar" => DataType {
                length: parts.length_or_precision,
                ..scalar("char", TypeCategory::String)
            },
            "text" | "clob" => scalar("text", TypeCategory::String),
            "boolean" | "bool" => scalar("boolean", TypeCategory::Boolean),
            "real" | "float" => scalar("real", TypeCategory::Numeric),
            "double" | "double precision" => scalar("double", TypeCategory::Numeric),
            "decimal" | "numeric" => DataType {
                precision: parts.length_or_precision,
                scale: parts.scale,
                ..scalar("decimal", TypeCategory::Numeric)
            },
            "timestamp" | "datetime" => scalar("timestamp", TypeCategory::Datetime),
            "date" => scalar("date", TypeCategory::Datetime),
            "time" => scalar("time", TypeCategory::Datetime),
            "json" => scalar("json", TypeCategory::Json),
            "uuid" => scalar("uuid", TypeCategory::Basic),
            "blob" | "" => scalar("bytes", TypeCategory::Binary),
            other => {
                tracing::warn!(native = other, "unknown sqlite type, using text fallback");
                DataType {
                    custom_type_name: Some(other.to_string()),
                    ..DataType::string_fallback()
                }
            }
        }
    }

    fn column_definition(&self, column: &Column) -> String {
        // A rowid alias must be spelled exactly INTEGER PRIMARY KEY.
        if column.auto_increment {
            return format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                self.quote_identifier(&column.name)
            );
        }
        let mut out = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.map_type(&column.data_type)
        );
        if column.is_generated {
            if let Some(expression) = &column.generated_expression {
                out.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
            }
        }
        if !column.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            if column.default_is_function {
                out.push_str(&format!(" DEFAULT ({default})"));
            } else {
                out.push_str(&format!(" DEFAULT {}", self.quote_literal(default)));
            }
        }
        out
    }

    fn emit_create_table(&self, table: &Table, _types: &BTreeMap<String, TypeDef>) -> String {
        let columns = table.ordered_columns();
        let has_rowid_alias = columns.iter().any(|c| c.auto_increment);

        let mut clauses: Vec<String> = columns
            .iter()
            .map(|column| self.column_definition(column))
            .collect();

        if !has_rowid_alias {
            if let Some(pk_columns) = crate::primary_key_columns(table) {
                clauses.push(format!(
                    "PRIMARY KEY ({})",
                    pk_columns
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .join(", ")
                ));
            }
        }

        // Everything else is inlined; there is no ALTER TABLE ADD CONSTRAINT.
        for constraint in table.constraints.values() {
            match constraint.constraint_type {
                ConstraintType::PrimaryKey | ConstraintType::NotNull => (),
                ConstraintType::Unique => clauses.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    self.quote_identifier(&constraint.name),
                    constraint
                        .columns
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .join(", ")
                )),
                ConstraintType::Check => clauses.push(format!(
                    "CONSTRAINT {} CHECK ({})",
                    self.quote_identifier(&constraint.name),
                    constraint.expression.as_deref().unwrap_or("1")
                )),
                ConstraintType::ForeignKey => {
                    if let Some(reference) = &constraint.reference {
                        let mut clause = format!(
                            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                            self.quote_identifier(&constraint.name),
                            constraint
                                .columns
                                .iter()
                                .map(|c| self.quote_identifier(c))
                                .join(", "),
                            self.quote_identifier(&reference.table.name),
                            reference
                                .columns
                                .iter()
                                .map(|c| self.quote_identifier(c))
                                .join(", "),
                        );
                        if let Some(action) = reference.on_update {
                            clause.push_str(&format!(" ON UPDATE {}", action_keyword(action)));
                        }
                        if let Some(action) = reference.on_delete {
                            clause.push_str(&format!(" ON DELETE {}", action_keyword(action)));
                        }
                        clauses.push(clause);
                    }
                }
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote_identifier(&table.name),
            clauses.join(",\n    "),
        )
    }

    fn emit_add_constraint(&self, _table: &Table, _constraint: &Constraint) -> Option<String> {
        None
    }

    // There is no TRUNCATE; an unqualified DELETE is the native idiom.
    fn emit_truncate(&self, _schema: Option<&str>, table: &str) -> String {
        format!("DELETE FROM {}", self.quote_identifier(table))
    }

    // Discovery keeps the original CREATE TRIGGER text as the body.
    fn emit_create_trigger(&self, trigger: &Trigger) -> Option<String> {
        let body = trigger.body.trim();
        if body.to_uppercase().starts_with("CREATE TRIGGER") {
            Some(body.to_string())
        } else {
            None
        }
    }

    fn emit_create_index(&self, table: &Table, index: &Index) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let members = index
            .columns
            .iter()
            .map(|member| {
                let mut rendered = match &member.expression {
                    Some(expression) => format!("({expression})"),
                    None => self.quote_identifier(&member.name),
                };
                if member.order == Some(SortOrder::Desc) {
                    rendered.push_str(" DESC");
                }
                rendered
            })
            .join(", ");
        let mut out = format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({members})",
            self.quote_identifier(&index.name),
            self.quote_identifier(&table.name),
        );
        if let Some(predicate) = &index.predicate {
            out.push_str(&format!(" WHERE {predicate}"));
        }
        out
    }
}

fn action_keyword(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::NoAction => "NO ACTION",
        ReferentialAction::Restrict => "RESTRICT",
        ReferentialAction::Cascade => "CASCADE",
        ReferentialAction::SetNull => "SET NULL",
        ReferentialAction::SetDefault => "SET DEFAULT",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use usm::Reference;

    fn round_trip(data_type: DataType) {
        let emitted = SqliteDialect.map_type(&data_type);
        assert_eq!(SqliteDialect.parse_type(&emitted), data_type, "via '{emitted}'");
    }

    #[test]
    fn common_types_round_trip() {
        round_trip(DataType::scalar("int", TypeCategory::Numeric));
        round_trip(DataType::scalar("bigint", TypeCategory::Numeric));
        round_trip(DataType::varchar(80));
        round_trip(DataType::scalar("text", TypeCategory::String));
        round_trip(DataType::scalar("boolean", TypeCategory::Boolean));
        round_trip(DataType::scalar("timestamp", TypeCategory::Datetime));
        round_trip(DataType::scalar("json", TypeCategory::Json));
        round_trip(DataType::decimal(8, 3));
        round_trip(DataType::scalar("bytes", TypeCategory::Binary));
        round_trip(DataType::scalar("uuid", TypeCategory::Basic));
    }

    #[test]
    fn constraints_are_inlined() {
        let mut table = Table {
            name: "orders".to_string(),
            ..Default::default()
        };
        for (ordinal, name) in ["id", "user_id"].into_iter().enumerate() {
            table.columns.insert(
                name.to_string(),
                Column {
                    name: name.to_string(),
                    data_type: DataType::scalar("bigint", TypeCategory::Numeric),
                    ordinal: ordinal as u32 + 1,
                    nullable: false,
                    auto_increment: name == "id",
                    ..Default::default()
                },
            );
        }
        table.constraints.insert(
            "orders_user_fk".to_string(),
            Constraint {
                name: "orders_user_fk".to_string(),
                constraint_type: ConstraintType::ForeignKey,
                columns: vec!["user_id".to_string()],
                reference: Some(Reference {
                    table: usm::TableRef::bare("users"),
                    columns: vec!["id".to_string()],
                    on_update: None,
                    on_delete: Some(ReferentialAction::Cascade),
                }),
                expression: None,
                deferrable: false,
                initially_deferred: false,
                enabled: true,
                validated: true,
                using_index: None,
            },
        );

        let ddl = SqliteDialect.emit_create_table(&table, &BTreeMap::new());
        assert!(ddl.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(ddl.contains(
            "CONSTRAINT \"orders_user_fk\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(SqliteDialect
            .emit_add_constraint(&table, table.constraints.values().next().unwrap())
            .is_none());
    }
}
