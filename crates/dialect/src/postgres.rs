use crate::typeparse::split_native_type;
use crate::{Dialect, MarkerStyle, UpsertForm};
use itertools::Itertools;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DataType, DatabaseType, Function, Index, NullsOrder,
    Procedure, ReferentialAction, Sequence, SortOrder, Table, Trigger, TriggerEvent, TriggerLevel,
    TriggerTiming, TypeCategory, TypeDef,
};

/// PostgreSQL: double-quoted identifiers, `$N` markers, transactional DDL,
/// `ON CONFLICT` upserts.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Dollar
    }

    fn upsert_form(&self) -> UpsertForm {
        UpsertForm::OnConflict
    }

    fn map_type(&self, data_type: &DataType) -> String {
        let rendered = match data_type.base_type.as_str() {
            _ if data_type.custom_type_name.is_some() => self
                .quote_qualified(
                    data_type.schema.as_deref(),
                    data_type.custom_type_name.as_deref().unwrap(),
                ),
            "smallint" => "smallint".to_string(),
            "int" | "integer" => "integer".to_string(),
            "bigint" => "bigint".to_string(),
            "varchar" => match data_type.length {
                Some(n) => format!("varchar({n})"),
                None => "varchar".to_string(),
            },
            "char" => format!("char({})", data_type.length.unwrap_or(1)),
            "text" => "text".to_string(),
            "boolean" => "boolean".to_string(),
            "real" => "real".to_string(),
            "double" => "double precision".to_string(),
            "decimal" | "numeric" => match (data_type.precision, data_type.scale) {
                (Some(p), Some(s)) => format!("numeric({p},{s})"),
                (Some(p), None) => format!("numeric({p})"),
                _ => "numeric".to_string(),
            },
            "timestamp" => "timestamp".to_string(),
            "timestamptz" => "timestamptz".to_string(),
            "date" => "date".to_string(),
            "time" => "time".to_string(),
            "json" => "jsonb".to_string(),
            "uuid" => "uuid".to_string(),
            "bytes" => "bytea".to_string(),
            other => {
                tracing::warn!(native = other, "no postgres rendering for type, using text");
                "text".to_string()
            }
        };
        if data_type.is_array {
            format!("{rendered}[]")
        } else {
            rendered
        }
    }

    fn parse_type(&self, native: &str) -> DataType {
        let parts = split_native_type(native);
        let scalar = |name: &str, category: TypeCategory| DataType::scalar(name, category);

        let mut parsed = match parts.base.as_str() {
            "int2" | "smallint" | "smallserial" => scalar("smallint", TypeCategory::Numeric),
            "int4" | "int" | "integer" | "serial" => scalar("int", TypeCategory::Numeric),
            "int8" | "bigint" | "bigserial" => scalar("bigint", TypeCategory::Numeric),
            "varchar" | "character varying" => DataType {
                length: parts.length_or_precision,
                ..scalar("varchar", TypeCategory::String)
            },
            "char" | "bpchar" | "character" => DataType {
                length: parts.length_or_precision,
                ..scalar("char", TypeCategory::String)
            },
            "text" | "name" | "citext" => scalar("text", TypeCategory::String),
            "bool" | "boolean" => scalar("boolean", TypeCategory::Boolean),
            "float4" | "real" => scalar("real", TypeCategory::Numeric),
            "float8" | "double precision" => scalar("double", TypeCategory::Numeric),
            "numeric" | "decimal" => DataType {
                precision: parts.length_or_precision,
                scale: parts.scale,
                ..scalar("decimal", TypeCategory::Numeric)
            },
            "timestamp" | "timestamp without time zone" => {
                scalar("timestamp", TypeCategory::Datetime)
            }
            "timestamptz" | "timestamp with time zone" => {
                scalar("timestamptz", TypeCategory::Datetime)
            }
            "date" => scalar("date", TypeCategory::Datetime),
            "time" | "time without time zone" | "time with time zone" | "timetz" => {
                scalar("time", TypeCategory::Datetime)
            }
            "json" | "jsonb" => scalar("json", TypeCategory::Json),
            "uuid" => scalar("uuid", TypeCategory::Basic),
            "bytea" => scalar("bytes", TypeCategory::Binary),
            other => {
                tracing::warn!(native = other, "unknown postgres type, using text fallback");
                DataType {
                    custom_type_name: Some(other.to_string()),
                    ..DataType::string_fallback()
                }
            }
        };
        if parts.is_array {
            parsed.is_array = true;
            parsed.array_dimensions = Some(1);
        }
        parsed
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut out = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.map_type(&column.data_type)
        );
        if let Some(collation) = &column.collation {
            out.push_str(&format!(" COLLATE {}", self.quote_identifier(collation)));
        }
        if column.auto_increment {
            out.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        }
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

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote_qualified(table.schema.as_deref(), &table.name),
            clauses.join(",\n    "),
        )
    }

    fn emit_add_constraint(&self, table: &Table, constraint: &Constraint) -> Option<String> {
        let body = match constraint.constraint_type {
            ConstraintType::NotNull => return None,
            ConstraintType::PrimaryKey => format!(
                "PRIMARY KEY ({})",
                constraint
                    .columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .join(", ")
            ),
            ConstraintType::Unique => format!(
                "UNIQUE ({})",
                constraint
                    .columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .join(", ")
            ),
            ConstraintType::Check => {
                format!("CHECK ({})", constraint.expression.as_deref().unwrap_or("true"))
            }
            ConstraintType::ForeignKey => {
                let reference = constraint.reference.as_ref()?;
                let mut body = format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    constraint
                        .columns
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .join(", "),
                    self.quote_qualified(reference.table.schema.as_deref(), &reference.table.name),
                    reference
                        .columns
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .join(", "),
                );
                if let Some(action) = reference.on_update {
                    body.push_str(&format!(" ON UPDATE {}", referential_action(action)));
                }
                if let Some(action) = reference.on_delete {
                    body.push_str(&format!(" ON DELETE {}", referential_action(action)));
                }
                body
            }
        };

        let mut out = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {body}",
            self.quote_qualified(table.schema.as_deref(), &table.name),
            self.quote_identifier(&constraint.name),
        );
        if constraint.deferrable {
            out.push_str(" DEFERRABLE");
            if constraint.initially_deferred {
                out.push_str(" INITIALLY DEFERRED");
            }
        }
        Some(out)
    }

    fn emit_create_index(&self, table: &Table, index: &Index) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let mut out = format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {}",
            self.quote_identifier(&index.name),
            self.quote_qualified(table.schema.as_deref(), &table.name),
        );
        if let Some(method) = &index.method {
            out.push_str(&format!(" USING {method}"));
        }
        let members = index
            .columns
            .iter()
            .map(|member| {
                let mut rendered = match &member.expression {
                    Some(expression) => format!("({expression})"),
                    None => self.quote_identifier(&member.name),
                };
                match member.order {
                    Some(SortOrder::Desc) => rendered.push_str(" DESC"),
                    Some(SortOrder::Asc) | None => (),
                }
                match member.nulls_order {
                    Some(NullsOrder::First) => rendered.push_str(" NULLS FIRST"),
                    Some(NullsOrder::Last) => rendered.push_str(" NULLS LAST"),
                    None => (),
                }
                rendered
            })
            .join(", ");
        out.push_str(&format!(" ({members})"));
        if !index.include_columns.is_empty() {
            out.push_str(&format!(
                " INCLUDE ({})",
                index
                    .include_columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .join(", ")
            ));
        }
        if let Some(fillfactor) = index.fillfactor {
            out.push_str(&format!(" WITH (fillfactor = {fillfactor})"));
        }
        if let Some(tablespace) = &index.tablespace {
            out.push_str(&format!(" TABLESPACE {}", self.quote_identifier(tablespace)));
        }
        if let Some(predicate) = &index.predicate {
            out.push_str(&format!(" WHERE {predicate}"));
        }
        out
    }

    fn emit_create_sequence(&self, sequence: &Sequence) -> Option<String> {
        let mut out = format!(
            "CREATE SEQUENCE IF NOT EXISTS {}",
            self.quote_qualified(sequence.schema.as_deref(), &sequence.name),
        );
        if let Some(data_type) = &sequence.data_type {
            out.push_str(&format!(" AS {data_type}"));
        }
        if let Some(start) = sequence.start {
            out.push_str(&format!(" START WITH {start}"));
        }
        if let Some(increment) = sequence.increment {
            out.push_str(&format!(" INCREMENT BY {increment}"));
        }
        if let Some(min) = sequence.min_value {
            out.push_str(&format!(" MINVALUE {min}"));
        }
        if let Some(max) = sequence.max_value {
            out.push_str(&format!(" MAXVALUE {max}"));
        }
        if let Some(cache) = sequence.cache {
            out.push_str(&format!(" CACHE {cache}"));
        }
        if sequence.cycle {
            out.push_str(" CYCLE");
        }
        Some(out)
    }

    fn emit_create_function(&self, function: &Function) -> Option<String> {
        Some(format!(
            "CREATE OR REPLACE FUNCTION {}({}) RETURNS {} LANGUAGE {} AS $function$\n{}\n$function$",
            self.quote_qualified(function.schema.as_deref(), &function.name),
            function.arguments,
            function.returns.as_deref().unwrap_or("void"),
            function.language.as_deref().unwrap_or("sql"),
            function.body,
        ))
    }

    fn emit_create_procedure(&self, procedure: &Procedure) -> Option<String> {
        Some(format!(
            "CREATE OR REPLACE PROCEDURE {}({}) LANGUAGE {} AS $procedure$\n{}\n$procedure$",
            self.quote_qualified(procedure.schema.as_deref(), &procedure.name),
            procedure.arguments,
            procedure.language.as_deref().unwrap_or("sql"),
            procedure.body,
        ))
    }

    fn emit_create_trigger(&self, trigger: &Trigger) -> Option<String> {
        let events = trigger
            .events
            .iter()
            .map(|event| trigger_event(*event))
            .join(" OR ");
        Some(format!(
            "CREATE TRIGGER {} {} {events} ON {} FOR EACH {} {}",
            self.quote_identifier(&trigger.name),
            trigger_timing(trigger.timing),
            self.quote_qualified(trigger.table.schema.as_deref(), &trigger.table.name),
            trigger_level(trigger.level),
            trigger.body,
        ))
    }

    fn emit_create_type(&self, type_def: &TypeDef) -> Option<String> {
        match type_def {
            TypeDef::Enum { name, schema, values } => Some(format!(
                "CREATE TYPE {} AS ENUM ({})",
                self.quote_qualified(schema.as_deref(), name),
                values.iter().map(|v| self.quote_literal(v)).join(", "),
            )),
            TypeDef::Composite { name, schema, fields } => Some(format!(
                "CREATE TYPE {} AS ({})",
                self.quote_qualified(schema.as_deref(), name),
                fields
                    .iter()
                    .map(|(field, data_type)| format!(
                        "{} {}",
                        self.quote_identifier(field),
                        self.map_type(data_type)
                    ))
                    .join(", "),
            )),
            TypeDef::Domain {
                name,
                schema,
                base,
                not_null,
                default_value,
                check,
            } => {
                let mut out = format!(
                    "CREATE DOMAIN {} AS {}",
                    self.quote_qualified(schema.as_deref(), name),
                    self.map_type(base),
                );
                if let Some(default) = default_value {
                    out.push_str(&format!(" DEFAULT {default}"));
                }
                if *not_null {
                    out.push_str(" NOT NULL");
                }
                if let Some(check) = check {
                    out.push_str(&format!(" CHECK ({check})"));
                }
                Some(out)
            }
            TypeDef::Range { name, schema, subtype } => Some(format!(
                "CREATE TYPE {} AS RANGE (subtype = {})",
                self.quote_qualified(schema.as_deref(), name),
                self.map_type(subtype),
            )),
        }
    }
}

fn trigger_timing(timing: TriggerTiming) -> &'static str {
    match timing {
        TriggerTiming::Before => "BEFORE",
        TriggerTiming::After => "AFTER",
        TriggerTiming::InsteadOf => "INSTEAD OF",
    }
}

fn trigger_event(event: TriggerEvent) -> &'static str {
    match event {
        TriggerEvent::Insert => "INSERT",
        TriggerEvent::Update => "UPDATE",
        TriggerEvent::Delete => "DELETE",
        TriggerEvent::Truncate => "TRUNCATE",
    }
}

fn trigger_level(level: TriggerLevel) -> &'static str {
    match level {
        TriggerLevel::Row => "ROW",
        TriggerLevel::Statement => "STATEMENT",
    }
}

fn referential_action(action: ReferentialAction) -> &'static str {
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
    use usm::IndexColumn;

    fn round_trip(dialect: &dyn Dialect, data_type: DataType) {
        let emitted = dialect.map_type(&data_type);
        let parsed = dialect.parse_type(&emitted);
        assert_eq!(parsed, data_type, "round-trip of '{emitted}'");
    }

    #[test]
    fn common_types_round_trip() {
        let dialect = PostgresDialect;
        round_trip(&dialect, DataType::scalar("int", TypeCategory::Numeric));
        round_trip(&dialect, DataType::scalar("bigint", TypeCategory::Numeric));
        round_trip(&dialect, DataType::varchar(255));
        round_trip(&dialect, DataType::scalar("text", TypeCategory::String));
        round_trip(&dialect, DataType::scalar("boolean", TypeCategory::Boolean));
        round_trip(&dialect, DataType::scalar("timestamp", TypeCategory::Datetime));
        round_trip(&dialect, DataType::scalar("date", TypeCategory::Datetime));
        round_trip(&dialect, DataType::scalar("json", TypeCategory::Json));
        round_trip(&dialect, DataType::decimal(10, 2));
        round_trip(&dialect, DataType::scalar("bytes", TypeCategory::Binary));
        round_trip(&dialect, DataType::scalar("uuid", TypeCategory::Basic));
    }

    #[test]
    fn catalog_spellings_normalize() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.parse_type("int4").base_type, "int");
        assert_eq!(dialect.parse_type("character varying(64)").length, Some(64));
        assert_eq!(dialect.parse_type("timestamp without time zone").name, "timestamp");
        assert_eq!(dialect.parse_type("jsonb").name, "json");
        let array = dialect.parse_type("_int8");
        assert!(array.is_array);
        assert_eq!(array.base_type, "bigint");
    }

    #[test]
    fn unknown_type_degrades_to_text() {
        let parsed = PostgresDialect.parse_type("tsvector");
        assert_eq!(parsed.name, "text");
        assert_eq!(parsed.custom_type_name.as_deref(), Some("tsvector"));
    }

    #[test]
    fn create_table_shape() {
        let mut table = Table {
            name: "users".to_string(),
            schema: Some("app".to_string()),
            ..Default::default()
        };
        for (ordinal, (name, data_type, nullable)) in [
            ("id", DataType::scalar("bigint", TypeCategory::Numeric), false),
            ("email", DataType::varchar(255), false),
            ("note", DataType::scalar("text", TypeCategory::String), true),
        ]
        .into_iter()
        .enumerate()
        {
            let mut column = Column {
                name: name.to_string(),
                data_type,
                ordinal: ordinal as u32 + 1,
                nullable,
                ..Default::default()
            };
            if name == "id" {
                column.auto_increment = true;
            }
            table.columns.insert(name.to_string(), column);
        }
        table.constraints.insert(
            "users_pkey".to_string(),
            usm::Constraint::primary_key("users_pkey", vec!["id".to_string()]),
        );

        let ddl = PostgresDialect.emit_create_table(&table, &BTreeMap::new());
        insta::assert_snapshot!(ddl, @r###"
        CREATE TABLE IF NOT EXISTS "app"."users" (
            "id" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL,
            "email" varchar(255) NOT NULL,
            "note" text,
            PRIMARY KEY ("id")
        )
        "###);
    }

    #[test]
    fn partial_unique_index() {
        let table = Table {
            name: "users".to_string(),
            ..Default::default()
        };
        let index = Index {
            name: "users_email_live".to_string(),
            columns: vec![IndexColumn::plain("email")],
            unique: true,
            method: Some("btree".to_string()),
            predicate: Some("deleted_at IS NULL".to_string()),
            ..Default::default()
        };
        assert_eq!(
            PostgresDialect.emit_create_index(&table, &index),
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "users_email_live" ON "users" USING btree ("email") WHERE deleted_at IS NULL"#,
        );
    }
}
