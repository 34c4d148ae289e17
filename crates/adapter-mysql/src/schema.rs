use crate::{decode::decode_row, fetch_all, Handle};
use adapter::{Error, Row, SchemaOps};
use dialect::{dialect_for, Dialect};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DatabaseType, Extension, Function, Index, IndexColumn,
    Procedure, Reference, ReferentialAction, Table, TableRef, Trigger, TriggerEvent, TriggerLevel,
    TriggerTiming, UnifiedSchema, View,
};

/// Discovery is scoped to the connected database, which is the container
/// MySQL calls a schema; tables land in the model unqualified.
pub struct MySqlSchema {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

pub(crate) async fn user_tables(handle: &Handle) -> Result<Vec<String>, Error> {
    let rows = fetch_all(
        handle,
        "list_tables",
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
        &[],
    )
    .await?;
    Ok(rows
        .iter()
        .map(decode_row)
        .filter_map(|row| string(&row, "table_name").or_else(|| string(&row, "TABLE_NAME")))
        .collect())
}

fn string(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

/// information_schema columns arrive upper- or lower-cased depending on
/// server configuration; read both.
fn field(row: &Row, key: &str) -> Option<String> {
    string(row, key).or_else(|| string(row, key.to_uppercase().as_str()))
}

fn field_int(row: &Row, key: &str) -> Option<i64> {
    let value = row
        .get(key)
        .or_else(|| row.get(key.to_uppercase().as_str()))?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl MySqlSchema {
    pub fn new(handle: Handle) -> MySqlSchema {
        MySqlSchema {
            handle,
            dialect: dialect_for(DatabaseType::MySql),
        }
    }

    async fn rows(&self, sql: &str) -> Result<Vec<Row>, Error> {
        let rows = fetch_all(&self.handle, "discover_schema", sql, &[]).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn discover_columns(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT table_name, column_name, ordinal_position, is_nullable, column_type, \
                          column_default, extra, generation_expression, collation_name \
                   FROM information_schema.columns \
                   WHERE table_schema = DATABASE() \
                     AND table_name IN (SELECT table_name FROM information_schema.tables \
                                        WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE') \
                   ORDER BY table_name, ordinal_position";
        for row in self.rows(sql).await? {
            let (Some(table_name), Some(column_name)) =
                (field(&row, "table_name"), field(&row, "column_name"))
            else {
                continue;
            };
            let extra = field(&row, "extra").unwrap_or_default().to_lowercase();
            let native = field(&row, "column_type").unwrap_or_default();
            let default_value = field(&row, "column_default");
            let is_generated = extra.contains("generated");

            let column = Column {
                name: column_name.clone(),
                data_type: self.dialect.parse_type(&native),
                ordinal: field_int(&row, "ordinal_position").unwrap_or(0) as u32,
                nullable: field(&row, "is_nullable").as_deref() == Some("YES"),
                is_primary_key: false,
                is_unique: false,
                auto_increment: extra.contains("auto_increment"),
                is_generated,
                generated_expression: field(&row, "generation_expression")
                    .filter(|e| !e.is_empty()),
                default_is_function: default_value
                    .as_deref()
                    .map(|d| d.contains('(') || d.eq_ignore_ascii_case("current_timestamp"))
                    .unwrap_or(false),
                default_value,
                collation: field(&row, "collation_name"),
                options: BTreeMap::new(),
            };

            let table = out
                .tables
                .entry(table_name.clone())
                .or_insert_with(|| Table {
                    name: table_name,
                    schema: None,
                    ..Default::default()
                });
            table.columns.insert(column_name, column);
        }
        Ok(())
    }

    async fn discover_key_constraints(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT tc.table_name, tc.constraint_name, tc.constraint_type, \
                          kcu.column_name, kcu.ordinal_position, kcu.referenced_table_name, \
                          kcu.referenced_column_name \
                   FROM information_schema.table_constraints tc \
                   JOIN information_schema.key_column_usage kcu \
                     ON kcu.constraint_name = tc.constraint_name \
                    AND kcu.table_schema = tc.table_schema \
                    AND kcu.table_name = tc.table_name \
                   WHERE tc.table_schema = DATABASE() \
                     AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY') \
                   ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";
        for row in self.rows(sql).await? {
            let (Some(table_name), Some(name), Some(kind), Some(column)) = (
                field(&row, "table_name"),
                field(&row, "constraint_name"),
                field(&row, "constraint_type"),
                field(&row, "column_name"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&table_name) else {
                continue;
            };

            let constraint_type = match kind.as_str() {
                "PRIMARY KEY" => ConstraintType::PrimaryKey,
                "UNIQUE" => ConstraintType::Unique,
                "FOREIGN KEY" => ConstraintType::ForeignKey,
                _ => continue,
            };
            let reference = match constraint_type {
                ConstraintType::ForeignKey => Some(Reference {
                    table: TableRef::bare(
                        field(&row, "referenced_table_name").unwrap_or_default().as_str(),
                    ),
                    columns: Vec::new(),
                    on_update: None,
                    on_delete: None,
                }),
                _ => None,
            };
            let constraint = table
                .constraints
                .entry(name.clone())
                .or_insert_with(|| Constraint {
                    name,
                    constraint_type,
                    columns: Vec::new(),
                    reference,
                    expression: None,
                    deferrable: false,
                    initially_deferred: false,
                    enabled: true,
                    validated: true,
                    using_index: None,
                });
            constraint.columns.push(column.clone());
            if let (Some(reference), Some(referenced)) = (
                constraint.reference.as_mut(),
                field(&row, "referenced_column_name"),
            ) {
                reference.columns.push(referenced);
            }

            match constraint_type {
                ConstraintType::PrimaryKey => {
                    if let Some(col) = table.columns.get_mut(&column) {
                        col.is_primary_key = true;
                        col.nullable = false;
                    }
                }
                ConstraintType::Unique => {
                    if constraint.columns.len() == 1 {
                        if let Some(col) = table.columns.get_mut(&column) {
                            col.is_unique = true;
                        }
                    }
                }
                _ => (),
            }
        }

        // Referential actions live in a separate catalog.
        let sql = "SELECT constraint_name, update_rule, delete_rule, table_name \
                   FROM information_schema.referential_constraints \
                   WHERE constraint_schema = DATABASE()";
        for row in self.rows(sql).await? {
            let (Some(name), Some(table_name)) =
                (field(&row, "constraint_name"), field(&row, "table_name"))
            else {
                continue;
            };
            let Some(reference) = out
                .tables
                .get_mut(&table_name)
                .and_then(|table| table.constraints.get_mut(&name))
                .and_then(|constraint| constraint.reference.as_mut())
            else {
                continue;
            };
            reference.on_update = field(&row, "update_rule").as_deref().and_then(action);
            reference.on_delete = field(&row, "delete_rule").as_deref().and_then(action);
        }
        Ok(())
    }

    async fn discover_check_constraints(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        // check_constraints only exists from 8.0.16; absence is fine.
        let sql = "SELECT tc.table_name, cc.constraint_name, cc.check_clause \
                   FROM information_schema.check_constraints cc \
                   JOIN information_schema.table_constraints tc \
                     ON tc.constraint_name = cc.constraint_name \
                    AND tc.constraint_schema = cc.constraint_schema \
                   WHERE cc.constraint_schema = DATABASE()";
        let rows = match self.rows(sql).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::debug!(%error, "no check constraint catalog on this server");
                return Ok(());
            }
        };
        for row in rows {
            let (Some(table_name), Some(name), Some(clause)) = (
                field(&row, "table_name"),
                field(&row, "constraint_name"),
                field(&row, "check_clause"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&table_name) else {
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
        let sql = "SELECT table_name, index_name, non_unique, index_type, column_name, \
                          seq_in_index \
                   FROM information_schema.statistics \
                   WHERE table_schema = DATABASE() AND index_name <> 'PRIMARY' \
                   ORDER BY table_name, index_name, seq_in_index";
        for row in self.rows(sql).await? {
            let (Some(table_name), Some(index_name), Some(column)) = (
                field(&row, "table_name"),
                field(&row, "index_name"),
                field(&row, "column_name"),
            ) else {
                continue;
            };
            let Some(table) = out.tables.get_mut(&table_name) else {
                continue;
            };
            if table.constraints.contains_key(&index_name) {
                continue;
            }
            let unique = field_int(&row, "non_unique") == Some(0);
            let method = field(&row, "index_type").map(|m| m.to_lowercase());
            let index = table
                .indexes
                .entry(index_name.clone())
                .or_insert_with(|| Index {
                    name: index_name,
                    unique,
                    method,
                    ..Default::default()
                });
            index.columns.push(IndexColumn::plain(&column));
        }
        Ok(())
    }

    async fn discover_views(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT table_name, view_definition FROM information_schema.views \
                   WHERE table_schema = DATABASE()";
        for row in self.rows(sql).await? {
            let (Some(name), Some(definition)) =
                (field(&row, "table_name"), field(&row, "view_definition"))
            else {
                continue;
            };
            out.views.insert(
                name.clone(),
                View {
                    name,
                    schema: None,
                    definition,
                    materialized: false,
                },
            );
        }
        Ok(())
    }

    async fn discover_routines(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT routine_name, routine_type, routine_definition, external_language \
                   FROM information_schema.routines WHERE routine_schema = DATABASE()";
        for row in self.rows(sql).await? {
            let Some(name) = field(&row, "routine_name") else {
                continue;
            };
            let body = field(&row, "routine_definition").unwrap_or_default();
            let language = field(&row, "external_language");
            if field(&row, "routine_type").as_deref() == Some("PROCEDURE") {
                out.procedures.insert(
                    name.clone(),
                    Procedure {
                        name,
                        schema: None,
                        language,
                        arguments: String::new(),
                        body,
                    },
                );
            } else {
                out.functions.insert(
                    name.clone(),
                    Function {
                        name,
                        schema: None,
                        language,
                        arguments: String::new(),
                        returns: None,
                        body,
                    },
                );
            }
        }
        Ok(())
    }

    async fn discover_triggers(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT trigger_name, event_manipulation, event_object_table, action_timing, \
                          action_orientation, action_statement \
                   FROM information_schema.triggers WHERE trigger_schema = DATABASE()";
        for row in self.rows(sql).await? {
            let (Some(name), Some(event), Some(table_name)) = (
                field(&row, "trigger_name"),
                field(&row, "event_manipulation"),
                field(&row, "event_object_table"),
            ) else {
                continue;
            };
            let event = match event.as_str() {
                "INSERT" => TriggerEvent::Insert,
                "UPDATE" => TriggerEvent::Update,
                "DELETE" => TriggerEvent::Delete,
                _ => continue,
            };
            let entry = out.triggers.entry(name.clone()).or_insert_with(|| Trigger {
                name,
                table: TableRef::bare(&table_name),
                timing: match field(&row, "action_timing").as_deref() {
                    Some("BEFORE") => TriggerTiming::Before,
                    _ => TriggerTiming::After,
                },
                events: Vec::new(),
                level: match field(&row, "action_orientation").as_deref() {
                    Some("ROW") => TriggerLevel::Row,
                    _ => TriggerLevel::Statement,
                },
                body: field(&row, "action_statement").unwrap_or_default(),
            });
            if !entry.events.contains(&event) {
                entry.events.push(event);
            }
        }
        Ok(())
    }

    async fn discover_plugins(&self, out: &mut UnifiedSchema) -> Result<(), Error> {
        let sql = "SELECT plugin_name, plugin_version FROM information_schema.plugins \
                   WHERE plugin_status = 'ACTIVE' AND plugin_type = 'STORAGE ENGINE'";
        for row in self.rows(sql).await? {
            let Some(name) = field(&row, "plugin_name") else {
                continue;
            };
            out.extensions.insert(
                name.clone(),
                Extension {
                    name,
                    version: field(&row, "plugin_version"),
                    schema: None,
                },
            );
        }
        Ok(())
    }

    fn creation_statements(&self, schema: &UnifiedSchema) -> Vec<String> {
        let mut statements = Vec::new();
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
        for trigger in schema.triggers.values() {
            if let Some(ddl) = self.dialect.emit_create_trigger(trigger) {
                statements.push(ddl);
            }
        }
        statements
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
impl SchemaOps for MySqlSchema {
    #[tracing::instrument(skip(self), fields(db = "mysql"))]
    async fn discover_schema(&self) -> Result<UnifiedSchema, Error> {
        self.handle.ensure_connected()?;
        let mut out = UnifiedSchema::new(DatabaseType::MySql);

        self.discover_columns(&mut out).await?;
        self.discover_key_constraints(&mut out).await?;
        self.discover_check_constraints(&mut out).await?;
        self.discover_indexes(&mut out).await?;
        self.discover_views(&mut out).await?;
        self.discover_routines(&mut out).await?;
        self.discover_triggers(&mut out).await?;
        self.discover_plugins(&mut out).await?;

        tracing::debug!(tables = out.tables.len(), "discovered mysql schema");
        Ok(out)
    }

    /// DDL autocommits here, so creation is best-effort: on failure the
    /// error reports every object that had already been created.
    #[tracing::instrument(skip(self, schema), fields(db = "mysql", tables = schema.tables.len()))]
    async fn create_structure(&self, schema: &UnifiedSchema) -> Result<(), Error> {
        self.handle.ensure_connected()?;
        let statements = self.creation_statements(schema);

        let mut created: Vec<String> = Vec::new();
        for statement in &statements {
            if let Err(error) = crate::execute(&self.handle, "create_structure", statement, &[])
                .await
            {
                return Err(Error::Operation {
                    database_type: DatabaseType::MySql,
                    operation: "create_structure",
                    source: anyhow::anyhow!(
                        "failed on '{statement}' after creating [{}]: {error}",
                        created.join(", "),
                    ),
                });
            }
            created.push(first_words(statement));
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        self.handle.ensure_connected()?;
        user_tables(&self.handle).await
    }

    async fn get_table_schema(&self, table: &str) -> Result<Table, Error> {
        self.handle.ensure_connected()?;
        let discovered = self.discover_schema().await?;
        discovered
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "table",
                name: table.to_string(),
            })
    }
}

/// A short label for a DDL statement, for partial-failure reports.
fn first_words(statement: &str) -> String {
    statement.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
}
