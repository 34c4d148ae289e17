use crate::{bind, decode::decode_row, Handle, SYSTEM_SCHEMAS};
use adapter::{Error, Row, SchemaOps};
use dialect::{dialect_for, Dialect};
use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DatabaseType, Extension, Function, Index, IndexColumn,
    Procedure, Reference, ReferentialAction, SchemaDef, Sequence, Table, TableRef, Trigger,
    TriggerEvent, TriggerLevel, TriggerTiming, TypeDef, UnifiedSchema, View,
};

pub struct PgSchema {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

/// All user tables as (schema, name) pairs.
pub(crate) async fn user_tables(handle: &Handle) -> Result<Vec<(String, String)>, Error> {
    let sql = format!(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' AND table_schema NOT IN ({}) \
         ORDER BY table_schema, table_name",
        system_schema_list(),
    );
    let rows = bind::fetch_all(handle, "list_tables", &sql, &[]).await?;
    Ok(rows
        .iter()
        .map(decode_row)
        .filter_map(|row| Some((string(&row, "table_schema")?, string(&row, "table_name")?)))
        .collect())
}

fn system_schema_list() -> String {
    SYSTEM_SCHEMAS.iter().map(|s| format!("'{s}'")).join(", ")
}

fn string(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int(row: &Row, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn flag(row: &Row, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "YES" || s == "t" || s == "true" || s == "ALWAYS",
        _ => false,
    }
}

impl PgSchema {
    pub fn new(handle: Handle) -> PgSchema {
        PgSchema {
            handle,
            dialect: dialect_for(DatabaseType::Postgres),
        }
    }

    async fn rows(&self, operation: &'static str, sql: &str) -> Result<Vec<Row>, Error> {
        let rows = bind::fetch_all(&self.handle, operation, sql, &[]).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn discover_schemas(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT schema_name FROM information_schema.schemata \
             WHERE schema_name NOT IN ({}) AND schema_name NOT LIKE 'pg_%' \
             ORDER BY schema_name",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            if let Some(name) = string(&row, "schema_name") {
                out.schemas.insert(
                    name.clone(),
                    SchemaDef {
                        name,
                        ..Default::default()
                    },
                );
            }
        }
        Ok(())
    }

    async fn discover_columns(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT table_schema, table_name, column_name, ordinal_position, is_nullable, \
                    data_type, udt_name, character_maximum_length, numeric_precision, \
                    numeric_scale, column_default, is_identity, is_generated, \
                    generation_expression, collation_name \
             FROM information_schema.columns \
             WHERE table_schema NOT IN ({}) \
               AND (table_schema, table_name) IN ( \
                   SELECT table_schema, table_name FROM information_schema.tables \
                   WHERE table_type = 'BASE TABLE') \
             ORDER BY table_schema, table_name, ordinal_position",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(table_name), Some(column_name)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "column_name"),
            ) else {
                continue;
            };

            let native = native_type_of(&row);
            let mut data_type = self.dialect.parse_type(&native);
            if let Some(Value::String(udt)) = row.get("udt_name") {
                // Enum and composite columns surface through udt_name.
                if data_type.custom_type_name.is_some() {
                    data_type.custom_type_name = Some(udt.clone());
                }
            }

            let default_value = string(&row, "column_default");
            let default_is_function = default_value
                .as_deref()
                .map(|d| d.contains('(') || d.contains("::"))
                .unwrap_or(false);
            let column = Column {
                name: column_name.clone(),
                data_type,
                ordinal: int(&row, "ordinal_position").unwrap_or(0) as u32,
                nullable: flag(&row, "is_nullable"),
                is_primary_key: false,
                is_unique: false,
                auto_increment: flag(&row, "is_identity")
                    || default_value
                        .as_deref()
                        .map(|d| d.starts_with("nextval("))
                        .unwrap_or(false),
                is_generated: flag(&row, "is_generated"),
                generated_expression: string(&row, "generation_expression"),
                default_value,
                default_is_function,
                collation: string(&row, "collation_name"),
                options: BTreeMap::new(),
            };

            let key = format!("{schema}.{table_name}");
            let table = out.tables.entry(key).or_insert_with(|| Table {
                name: table_name,
                schema: Some(schema),
                ..Default::default()
            });
            table.columns.insert(column_name, column);
        }
        Ok(())
    }

    async fn discover_key_constraints(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT tc.table_schema, tc.table_name, tc.constraint_name, tc.constraint_type, \
                    kcu.column_name, kcu.ordinal_position \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
              AND kcu.table_name = tc.table_name \
             WHERE tc.table_schema NOT IN ({}) \
               AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
             ORDER BY tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(table_name), Some(name), Some(kind), Some(column)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "constraint_name"),
                string(&row, "constraint_type"),
                string(&row, "column_name"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&format!("{schema}.{table_name}")) else {
                continue;
            };

            let constraint_type = if kind == "PRIMARY KEY" {
                ConstraintType::PrimaryKey
            } else {
                ConstraintType::Unique
            };
            let constraint = table
                .constraints
                .entry(name.clone())
                .or_insert_with(|| Constraint {
                    name,
                    constraint_type,
                    columns: Vec::new(),
                    reference: None,
                    expression: None,
                    deferrable: false,
                    initially_deferred: false,
                    enabled: true,
                    validated: true,
                    using_index: None,
                });
            constraint.columns.push(column.clone());

            if constraint_type == ConstraintType::PrimaryKey {
                if let Some(col) = table.columns.get_mut(&column) {
                    col.is_primary_key = true;
                    col.nullable = false;
                }
            } else if constraint.columns.len() == 1 {
                if let Some(col) = table.columns.get_mut(&column) {
                    col.is_unique = true;
                }
            }
        }
        Ok(())
    }

    async fn discover_foreign_keys(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT tc.table_schema, tc.table_name, tc.constraint_name, kcu.column_name, \
                    ccu.table_schema AS foreign_schema, ccu.table_name AS foreign_table, \
                    ccu.column_name AS foreign_column, rc.update_rule, rc.delete_rule \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema \
             JOIN information_schema.referential_constraints rc \
               ON rc.constraint_name = tc.constraint_name AND rc.constraint_schema = tc.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema \
             WHERE tc.table_schema NOT IN ({}) AND tc.constraint_type = 'FOREIGN KEY' \
             ORDER BY tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(table_name), Some(name), Some(column)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "constraint_name"),
                string(&row, "column_name"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&format!("{schema}.{table_name}")) else {
                continue;
            };

            let constraint = table
                .constraints
                .entry(name.clone())
                .or_insert_with(|| Constraint {
                    name,
                    constraint_type: ConstraintType::ForeignKey,
                    columns: Vec::new(),
                    reference: Some(Reference {
                        table: TableRef {
                            schema: string(&row, "foreign_schema"),
                            name: string(&row, "foreign_table").unwrap_or_default(),
                        },
                        columns: Vec::new(),
                        on_update: string(&row, "update_rule").as_deref().and_then(action),
                        on_delete: string(&row, "delete_rule").as_deref().and_then(action),
                    }),
                    expression: None,
                    deferrable: false,
                    initially_deferred: false,
                    enabled: true,
                    validated: true,
                    using_index: None,
                });
            if !constraint.columns.contains(&column) {
                constraint.columns.push(column);
            }
            if let (Some(reference), Some(foreign_column)) =
                (constraint.reference.as_mut(), string(&row, "foreign_column"))
            {
                if !reference.columns.contains(&foreign_column) {
                    reference.columns.push(foreign_column);
                }
            }
        }
        Ok(())
    }

    async fn discover_check_constraints(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT tc.table_schema, tc.table_name, tc.constraint_name, cc.check_clause \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.check_constraints cc \
               ON cc.constraint_name = tc.constraint_name AND cc.constraint_schema = tc.table_schema \
             WHERE tc.table_schema NOT IN ({}) AND tc.constraint_type = 'CHECK'",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(table_name), Some(name), Some(clause)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "constraint_name"),
                string(&row, "check_clause"),
            ) else {
                continue;
            };
            // Implicit NOT NULL checks are already column properties.
            if clause.ends_with("IS NOT NULL") {
                continue;
            }
            let Some(table) = out.tables.get_mut(&format!("{schema}.{table_name}")) else {
                continue;
            };
            table.constraints.insert(
                name.clone(),
                Constraint {
                    name,
                    constraint_type: ConstraintType::Check,
                    columns: Vec::new(),
                    reference: None,
                    expression: Some(clause),
                    deferrable: false,
                    initially_deferred: false,
                    enabled: true,
                    validated: true,
                    using_index: None,
                },
            );
        }
        Ok(())
    }

    async fn discover_indexes(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT n.nspname AS table_schema, t.relname AS table_name, \
                    i.relname AS index_name, ix.indisunique AS is_unique, \
                    am.amname AS method, pg_get_expr(ix.indpred, ix.indrelid) AS predicate, \
                    a.attname AS column_name, k.ord \
             FROM pg_index ix \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_am am ON am.oid = i.relam \
             CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE n.nspname NOT IN ({}) AND NOT ix.indisprimary \
             ORDER BY n.nspname, t.relname, i.relname, k.ord",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(table_name), Some(index_name), Some(column)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "index_name"),
                string(&row, "column_name"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&format!("{schema}.{table_name}")) else {
                continue;
            };
            // Unique indexes backing declared constraints are modeled as
            // constraints, not again as indexes.
            if table.constraints.contains_key(&index_name) {
                continue;
            }
            let index = table
                .indexes
                .entry(index_name.clone())
                .or_insert_with(|| Index {
                    name: index_name,
                    unique: flag(&row, "is_unique"),
                    method: string(&row, "method"),
                    predicate: string(&row, "predicate"),
                    ..Default::default()
                });
            index.columns.push(IndexColumn::plain(&column));
        }
        Ok(())
    }

    async fn discover_types(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT n.nspname AS type_schema, t.typname AS type_name, e.enumlabel \
             FROM pg_type t \
             JOIN pg_enum e ON e.enumtypid = t.oid \
             JOIN pg_namespace n ON n.oid = t.typnamespace \
             WHERE n.nspname NOT IN ({}) \
             ORDER BY n.nspname, t.typname, e.enumsortorder",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(name), Some(label)) = (
                string(&row, "type_schema"),
                string(&row, "type_name"),
                string(&row, "enumlabel"),
            ) else {
                continue;
            };
            match out
                .types
                .entry(name.clone())
                .or_insert_with(|| TypeDef::Enum {
                    name,
                    schema: Some(schema),
                    values: Vec::new(),
                }) {
                TypeDef::Enum { values, .. } => values.push(label),
                _ => (),
            }
        }
        Ok(())
    }

    async fn discover_sequences(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT sequence_schema, sequence_name, data_type, start_value, minimum_value, \
                    maximum_value, increment, cycle_option \
             FROM information_schema.sequences WHERE sequence_schema NOT IN ({})",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let Some(name) = string(&row, "sequence_name") else {
                continue;
            };
            out.sequences.insert(
                name.clone(),
                Sequence {
                    name,
                    schema: string(&row, "sequence_schema"),
                    data_type: string(&row, "data_type"),
                    start: int(&row, "start_value"),
                    increment: int(&row, "increment"),
                    min_value: int(&row, "minimum_value"),
                    max_value: int(&row, "maximum_value"),
                    cache: None,
                    cycle: flag(&row, "cycle_option"),
                    owned_by: None,
                },
            );
        }
        Ok(())
    }

    async fn discover_views(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT table_schema, table_name, view_definition \
             FROM information_schema.views WHERE table_schema NOT IN ({})",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(name), Some(definition)) = (
                string(&row, "table_schema"),
                string(&row, "table_name"),
                string(&row, "view_definition"),
            ) else {
                continue;
            };
            out.views.insert(
                name.clone(),
                View {
                    name,
                    schema: Some(schema),
                    definition,
                    materialized: false,
                },
            );
        }

        let sql = "SELECT schemaname, matviewname, definition FROM pg_matviews";
        for row in self.rows("discover_schema", sql).await? {
            let (Some(schema), Some(name), Some(definition)) = (
                string(&row, "schemaname"),
                string(&row, "matviewname"),
                string(&row, "definition"),
            ) else {
                continue;
            };
            if SYSTEM_SCHEMAS.contains(&schema.as_str()) {
                continue;
            }
            out.views.insert(
                name.clone(),
                View {
                    name,
                    schema: Some(schema),
                    definition,
                    materialized: true,
                },
            );
        }
        Ok(())
    }

    async fn discover_routines(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT n.nspname AS routine_schema, p.proname AS routine_name, \
                    l.lanname AS language, p.prokind::text AS kind, p.prosrc AS body, \
                    pg_get_function_arguments(p.oid) AS arguments, \
                    pg_get_function_result(p.oid) AS returns \
             FROM pg_proc p \
             JOIN pg_namespace n ON n.oid = p.pronamespace \
             JOIN pg_language l ON l.oid = p.prolang \
             WHERE n.nspname NOT IN ({}) AND p.prokind IN ('f', 'p')",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(schema), Some(name)) = (
                string(&row, "routine_schema"),
                string(&row, "routine_name"),
            ) else {
                continue;
            };
            let language = string(&row, "language");
            let arguments = string(&row, "arguments").unwrap_or_default();
            let body = string(&row, "body").unwrap_or_default();
            if string(&row, "kind").as_deref() == Some("p") {
                out.procedures.insert(
                    name.clone(),
                    Procedure {
                        name,
                        schema: Some(schema),
                        language,
                        arguments,
                        body,
                    },
                );
            } else {
                out.functions.insert(
                    name.clone(),
                    Function {
                        name,
                        schema: Some(schema),
                        language,
                        arguments,
                        returns: string(&row, "returns"),
                        body,
                    },
                );
            }
        }
        Ok(())
    }

    async fn discover_triggers(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = format!(
            "SELECT trigger_schema, trigger_name, event_manipulation, event_object_schema, \
                    event_object_table, action_timing, action_orientation, action_statement \
             FROM information_schema.triggers WHERE trigger_schema NOT IN ({})",
            system_schema_list(),
        );
        for row in self.rows("discover_schema", &sql).await? {
            let (Some(name), Some(event), Some(table_name)) = (
                string(&row, "trigger_name"),
                string(&row, "event_manipulation"),
                string(&row, "event_object_table"),
            ) else {
                continue;
            };
            let event = match event.as_str() {
                "INSERT" => TriggerEvent::Insert,
                "UPDATE" => TriggerEvent::Update,
                "DELETE" => TriggerEvent::Delete,
                "TRUNCATE" => TriggerEvent::Truncate,
                _ => continue,
            };
            let entry = out.triggers.entry(name.clone()).or_insert_with(|| Trigger {
                name,
                table: TableRef {
                    schema: string(&row, "event_object_schema"),
                    name: table_name,
                },
                timing: match string(&row, "action_timing").as_deref() {
                    Some("BEFORE") => TriggerTiming::Before,
                    Some("INSTEAD OF") => TriggerTiming::InsteadOf,
                    _ => TriggerTiming::After,
                },
                events: Vec::new(),
                level: match string(&row, "action_orientation").as_deref() {
                    Some("ROW") => TriggerLevel::Row,
                    _ => TriggerLevel::Statement,
                },
                body: string(&row, "action_statement").unwrap_or_default(),
            });
            if !entry.events.contains(&event) {
                entry.events.push(event);
            }
        }
        Ok(())
    }

    async fn discover_extensions(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT e.extname, e.extversion, n.nspname AS ext_schema \
                   FROM pg_extension e JOIN pg_namespace n ON n.oid = e.extnamespace";
        for row in self.rows("discover_schema", sql).await? {
            let Some(name) = string(&row, "extname") else {
                continue;
            };
            out.extensions.insert(
                name.clone(),
                Extension {
                    name,
                    version: string(&row, "extversion"),
                    schema: string(&row, "ext_schema"),
                },
            );
        }
        Ok(())
    }

    /// Every DDL statement for the schema, in dependency order. Foreign
    /// keys come after all tables so cycles need no sorting.
    fn creation_statements(&self, schema: &UnifiedSchema) -> Vec<String> {
        let mut statements = Vec::new();

        for type_def in schema.types.values() {
            if let Some(ddl) = self.dialect.emit_create_type(type_def) {
                statements.push(ddl);
            }
        }
        for sequence in schema.sequences.values() {
            // Identity-backed sequences are created with their tables.
            if sequence.owned_by.is_none() {
                if let Some(ddl) = self.dialect.emit_create_sequence(sequence) {
                    statements.push(ddl);
                }
            }
        }
        for schema_def in schema.schemas.values() {
            if schema_def.name != "public" {
                statements.push(format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    self.dialect.quote_identifier(&schema_def.name)
                ));
            }
        }
        // External stubs exist only to satisfy foreign-key references.
        let tables: Vec<_> = schema.tables.values().filter(|t| !t.is_external()).collect();
        for table in &tables {
            statements.push(self.dialect.emit_create_table(table, &schema.types));
        }
        for table in &tables {
            for index in table.indexes.values() {
                statements.push(self.dialect.emit_create_index(table, index));
            }
        }
        for table in &tables {
            for constraint in table.constraints.values() {
                match constraint.constraint_type {
                    ConstraintType::PrimaryKey | ConstraintType::NotNull => continue,
                    _ => (),
                }
                if let Some(ddl) = self.dialect.emit_add_constraint(table, constraint) {
                    statements.push(ddl);
                }
            }
        }
        for view in schema.views.values() {
            statements.push(self.dialect.emit_create_view(view));
        }
        for function in schema.functions.values() {
            if let Some(ddl) = self.dialect.emit_create_function(function) {
                statements.push(ddl);
            }
        }
        for procedure in schema.procedures.values() {
            if let Some(ddl) = self.dialect.emit_create_procedure(procedure) {
                statements.push(ddl);
            }
        }
        for trigger in schema.triggers.values() {
            if let Some(ddl) = self.dialect.emit_create_trigger(trigger) {
                statements.push(ddl);
            }
        }
        statements
    }
}

fn native_type_of(row: &Row) -> String {
    let data_type = string(row, "data_type").unwrap_or_default();
    let udt = string(row, "udt_name").unwrap_or_default();

    let base = match data_type.as_str() {
        // Arrays and user-defined types carry the real name in udt_name.
        "ARRAY" | "USER-DEFINED" | "" => udt,
        _ => data_type,
    };
    match (
        int(row, "character_maximum_length"),
        int(row, "numeric_precision"),
        int(row, "numeric_scale"),
    ) {
        (Some(length), _, _) => format!("{base}({length})"),
        (None, Some(precision), Some(scale)) if base == "numeric" => {
            format!("{base}({precision},{scale})")
        }
        _ => base,
    }
}

fn action(rule: &str) -> Option<ReferentialAction> {
    match rule {
        "CASCADE" => Some(ReferentialAction::Cascade),
        "RESTRICT" => Some(ReferentialAction::Restrict),
        "SET NULL" => Some(ReferentialAction::SetNull),
        "SET DEFAULT" => Some(ReferentialAction::SetDefault),
        "NO ACTION" => Some(ReferentialAction::NoAction),
        _ => None,
    }
}

#[async_trait::async_trait]
impl SchemaOps for PgSchema {
    #[tracing::instrument(skip(self), fields(db = "postgres"))]
    async fn discover_schema(&self) -> Result<UnifiedSchema, Error> {
        self.handle.ensure_connected()?;
        let mut out = UnifiedSchema::new(DatabaseType::Postgres);

        self.discover_schemas(&mut out).await?;
        self.discover_columns(&mut out).await?;
        self.discover_key_constraints(&mut out).await?;
        self.discover_foreign_keys(&mut out).await?;
        self.discover_check_constraints(&mut out).await?;
        self.discover_indexes(&mut out).await?;
        self.discover_types(&mut out).await?;
        self.discover_sequences(&mut out).await?;
        self.discover_views(&mut out).await?;
        self.discover_routines(&mut out).await?;
        self.discover_triggers(&mut out).await?;
        self.discover_extensions(&mut out).await?;

        tracing::debug!(
            tables = out.tables.len(),
            types = out.types.len(),
            "discovered postgres schema"
        );
        Ok(out)
    }

    #[tracing::instrument(skip(self, schema), fields(db = "postgres", tables = schema.tables.len()))]
    async fn create_structure(&self, schema: &UnifiedSchema) -> Result<(), Error> {
        self.handle.ensure_connected()?;
        let statements = self.creation_statements(schema);

        // DDL is transactional here: all or nothing.
        let mut tx = self
            .handle
            .pool
            .begin()
            .await
            .map_err(|e| Error::from_sqlx(DatabaseType::Postgres, "create_structure", e))?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut tx).await.map_err(|e| {
                tracing::error!(%statement, "structure creation failed");
                Error::from_sqlx(DatabaseType::Postgres, "create_structure", e)
            })?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::from_sqlx(DatabaseType::Postgres, "create_structure", e))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        self.handle.ensure_connected()?;
        Ok(user_tables(&self.handle)
            .await?
            .into_iter()
            .map(|(_, table)| table)
            .collect())
    }

    async fn get_table_schema(&self, table: &str) -> Result<Table, Error> {
        self.handle.ensure_connected()?;
        let discovered = self.discover_schema().await?;
        discovered
            .tables
            .values()
            .find(|t| t.name == table || t.key() == table)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "table",
                name: table.to_string(),
            })
    }
}
