use crate::typeparse::split_native_type;
use crate::{Dialect, MarkerStyle, UpsertForm};
use itertools::Itertools;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DataType, DatabaseType, Index, ReferentialAction,
    SortOrder, Table, Trigger, TriggerEvent, TriggerTiming, TypeCategory, TypeDef,
};

/// MySQL: backtick identifiers, `?` markers, non-transactional DDL,
/// `ON DUPLICATE KEY UPDATE` upserts.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Question
    }

    fn upsert_form(&self) -> UpsertForm {
        UpsertForm::OnDuplicateKey
    }

    fn map_type(&self, data_type: &DataType) -> String {
        // MySQL has no array or user-defined types; enums are inline and
        // everything else degrades to a text spelling.
        if data_type.is_array {
            return "json".to_string();
        }
        if data_type.is_enum && !data_type.enum_values.is_empty() {
            return format!(
                "enum({})",
                data_type.enum_values.iter().map(|v| self.quote_literal(v)).join(",")
            );
        }
        match data_type.base_type.as_str() {
            "smallint" => "smallint".to_string(),
            "int" | "integer" => "int".to_string(),
            "bigint" => "bigint".to_string(),
            "varchar" => format!("varchar({})", data_type.length.unwrap_or(255)),
            "char" => format!("char({})", data_type.length.unwrap_or(1)),
            "text" => "text".to_string(),
            // tinyint(1) is the conventional boolean.
            "boolean" => "tinyint(1)".to_string(),
            "real" => "float".to_string(),
            "double" => "double".to_string(),
            "decimal" | "numeric" => match (data_type.precision, data_type.scale) {
                (Some(p), Some(s)) => format!("decimal({p},{s})"),
                (Some(p), None) => format!("decimal({p})"),
                _ => "decimal(10,0)".to_string(),
            },
            "timestamp" | "timestamptz" => "datetime".to_string(),
            "date" => "date".to_string(),
            "time" => "time".to_string(),
            "json" => "json".to_string(),
            // No native uuid type; the canonical hyphenated form is 36 chars.
            "uuid" => "char(36)".to_string(),
            "bytes" => match data_type.length {
                Some(n) => format!("varbinary({n})"),
                None => "blob".to_string(),
            },
            other => {
                tracing::warn!(native = other, "no mysql rendering for type, using text");
                "text".to_string()
            }
        }
    }

    fn parse_type(&self, native: &str) -> DataType {
        // Inline enum('a','b') columns carry their values in the type string.
        let trimmed = native.trim();
        if trimmed.to_lowercase().starts_with("enum(") && trimmed.ends_with(')') {
            let body = &trimmed["enum(".len()..trimmed.len() - 1];
            let values = body
                .split(',')
                .map(|v| v.trim().trim_matches('\'').to_string())
                .collect();
            return DataType {
                is_enum: true,
                enum_values: values,
                ..DataType::scalar("enum", TypeCategory::Enum)
            };
        }

        let parts = split_native_type(trimmed);
        let scalar = DataType::scalar;
        match parts.base.as_str() {
            "tinyint" if parts.length_or_precision == Some(1) => {
                scalar("boolean", TypeCategory::Boolean)
            }
            "tinyint" | "smallint" => scalar("smallint", TypeCategory::Numeric),
            "int" | "integer" | "mediumint" => scalar("int", TypeCategory::Numeric),
            "bigint" => scalar("bigint", TypeCategory::Numeric),
            "varchar" => DataType {
                length: parts.length_or_precision,
                ..scalar("varchar", TypeCategory::String)
            },
            "char" if parts.length_or_precision == Some(36) => {
                scalar("uuid", TypeCategory::Basic)
            }
            "char" => DataType {
                length: parts.length_or_precision,
                ..scalar("char", TypeCategory::String)
            },
            "text" | "tinytext" | "mediumtext" | "longtext" => {
                scalar("text", TypeCategory::String)
            }
            "bool" | "boolean" => scalar("boolean", TypeCategory::Boolean),
            "float" => scalar("real", TypeCategory::Numeric),
            "double" | "double precision" => scalar("double", TypeCategory::Numeric),
            "decimal" | "numeric" => DataType {
                precision: parts.length_or_precision,
                scale: parts.scale,
                ..scalar("decimal", TypeCategory::Numeric)
            },
            "datetime" | "timestamp" => scalar("timestamp", TypeCategory::Datetime),
            "date" => scalar("date", TypeCategory::Datetime),
            "time" => scalar("time", TypeCategory::Datetime),
            "year" => scalar("smallint", TypeCategory::Numeric),
            "json" => scalar("json", TypeCategory::Json),
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => DataType {
                length: parts.length_or_precision,
                ..scalar("bytes", TypeCategory::Binary)
            },
            other => {
                tracing::warn!(native = other, "unknown mysql type, using text fallback");
                DataType {
                    custom_type_name: Some(other.to_string()),
                    ..DataType::string_fallback()
                }
            }
        }
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut out = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.map_type(&column.data_type)
        );
        if let Some(collation) = &column.collation {
            out.push_str(&format!(" COLLATE {collation}"));
        }
        if column.is_generated {
            if let Some(expression) = &column.generated_expression {
                out.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
            }
        }
        if !column.nullable {
            out.push_str(" NOT NULL");
        }
        if column.auto_increment {
            out.push_str(" AUTO_INCREMENT");
        }
        if let Some(default) = &column.default_value {
            if column.default_is_function {
                out.push_str(&format!(" DEFAULT {default}"));
            } else {
                out.push_str(&format!(" DEFAULT {}", self.quote_literal(default)));
            }
        }
        out
    }

    fn emit_create_table(&self, table: &Table, _types: &BTreeMap<String, TypeDef>) -> String {
        let mut clauses: Vec<String> = table
            .ordered_columns()
            .iter()
            .map(|column| self.column_definition(column))
            .collect();

        if let Some(pk_columns) = crate::primary_key_columns(table) {
            clauses.push(format!(
                "PRIMARY KEY ({})",
                pk_columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .join(", ")
            ));
        }

        let mut out = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote_qualified(table.schema.as_deref(), &table.name),
            clauses.join(",\n    "),
        );
        if let Some(comment) = &table.comment {
            out.push_str(&format!(" COMMENT = {}", self.quote_literal(comment)));
        }
        out
    }

    fn emit_add_constraint(&self, table: &Table, constraint: &Constraint) -> Option<String> {
        let quoted_columns = || {
            constraint
                .columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .join(", ")
        };
        let body = match constraint.constraint_type {
            ConstraintType::NotNull => return None,
            ConstraintType::PrimaryKey => format!("PRIMARY KEY ({})", quoted_columns()),
            ConstraintType::Unique => format!("UNIQUE ({})", quoted_columns()),
            ConstraintType::Check => {
                format!("CHECK ({})", constraint.expression.as_deref().unwrap_or("true"))
            }
            ConstraintType::ForeignKey => {
                let reference = constraint.reference.as_ref()?;
                let mut body = format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    quoted_columns(),
                    self.quote_qualified(reference.table.schema.as_deref(), &reference.table.name),
                    reference
                        .columns
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .join(", "),
                );
                if let Some(action) = reference.on_update {
                    body.push_str(&format!(" ON UPDATE {}", action_keyword(action)));
                }
                if let Some(action) = reference.on_delete {
                    body.push_str(&format!(" ON DELETE {}", action_keyword(action)));
                }
                body
            }
        };
        Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {body}",
            self.quote_qualified(table.schema.as_deref(), &table.name),
            self.quote_identifier(&constraint.name),
        ))
    }

    // Triggers take exactly one event each here; a model trigger carrying
    // several emits for its first event only. Routines are not emitted:
    // the catalog strips the argument list, so their DDL cannot be
    // reconstructed faithfully.
    fn emit_create_trigger(&self, trigger: &Trigger) -> Option<String> {
        let event = trigger.events.first()?;
        let event = match event {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
            TriggerEvent::Truncate => return None,
        };
        let timing = match trigger.timing {
            TriggerTiming::Before => "BEFORE",
            TriggerTiming::After | TriggerTiming::InsteadOf => "AFTER",
        };
        Some(format!(
            "CREATE TRIGGER {} {timing} {event} ON {} FOR EACH ROW {}",
            self.quote_identifier(&trigger.name),
            self.quote_identifier(&trigger.table.name),
            trigger.body,
        ))
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
            "CREATE {unique}INDEX {} ON {} ({members})",
            self.quote_identifier(&index.name),
            self.quote_qualified(table.schema.as_deref(), &table.name),
        );
        if let Some(method) = &index.method {
            out.push_str(&format!(" USING {}", method.to_uppercase()));
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

    fn round_trip(data_type: DataType) {
        let emitted = MySqlDialect.map_type(&data_type);
        assert_eq!(MySqlDialect.parse_type(&emitted), data_type, "via '{emitted}'");
    }

    #[test]
    fn common_types_round_trip() {
        round_trip(DataType::scalar("int", TypeCategory::Numeric));
        round_trip(DataType::scalar("bigint", TypeCategory::Numeric));
        round_trip(DataType::varchar(120));
        round_trip(DataType::scalar("text", TypeCategory::String));
        round_trip(DataType::scalar("boolean", TypeCategory::Boolean));
        round_trip(DataType::scalar("timestamp", TypeCategory::Datetime));
        round_trip(DataType::scalar("date", TypeCategory::Datetime));
        round_trip(DataType::scalar("json", TypeCategory::Json));
        round_trip(DataType::decimal(12, 4));
        round_trip(DataType::scalar("uuid", TypeCategory::Basic));
    }

    #[test]
    fn inline_enum_parses() {
        let parsed = MySqlDialect.parse_type("enum('red','green','blue')");
        assert!(parsed.is_enum);
        assert_eq!(parsed.enum_values, vec!["red", "green", "blue"]);
    }

    #[test]
    fn tinyint1_is_boolean_and_wider_tinyint_is_not() {
        assert_eq!(MySqlDialect.parse_type("tinyint(1)").name, "boolean");
        assert_eq!(MySqlDialect.parse_type("tinyint(4)").name, "smallint");
    }

    #[test]
    fn auto_increment_column_definition() {
        let column = Column {
            name: "id".to_string(),
            data_type: DataType::scalar("bigint", TypeCategory::Numeric),
            nullable: false,
            auto_increment: true,
            ordinal: 1,
            ..Default::default()
        };
        assert_eq!(
            MySqlDialect.column_definition(&column),
            "`id` bigint NOT NULL AUTO_INCREMENT"
        );
    }
}
