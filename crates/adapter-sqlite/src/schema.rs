use crate::{decode::decode_row, err, fetch_all, Handle};
use adapter::{Error, Row, SchemaOps};
use dialect::{dialect_for, Dialect};
use serde_json::Value;
use std::collections::BTreeMap;
use usm::{
    Column, Constraint, ConstraintType, DatabaseType, Index, IndexColumn, Reference,
    ReferentialAction, Table, TableRef, Trigger, TriggerEvent, TriggerLevel, TriggerTiming,
    UnifiedSchema, View,
};

pub struct SqliteSchema {
    handle: Handle,
    dialect: &'static dyn Dialect,
}

pub(crate) async fn user_tables(handle: &Handle) -> Result<Vec<String>, Error> {
    let rows = fetch_all(
        handle,
        "list_tables",
        "SELECT name FROM sqlite_master WHERE type = 'table' \
         AND name NOT LIKE 'sqlite_%' ORDER BY name",
        &[],
    )
    .await?;
    Ok(rows
        .iter()
        .map(decode_row)
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
        .collect())
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

impl SqliteSchema {
    pub fn new(handle: Handle) -> SqliteSchema {
        SqliteSchema {
            handle,
            dialect: dialect_for(DatabaseType::Sqlite),
        }
    }

    async fn rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let rows = fetch_all(&self.handle, "discover_schema", sql, params).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn discover_table(&self, name: &str, create_sql: &str) -> Result<Table, Error> {
        let mut table = Table {
            name: name.to_string(),
            schema: None,
            ..Default::default()
        };
        let has_autoincrement = create_sql.to_uppercase().contains("AUTOINCREMENT");

        let quoted = name.replace('\'', "''");
        let mut pk_columns: Vec<(i64, String)> = Vec::new();
        for row in self
            .rows(&format!("PRAGMA table_info('{quoted}')"), &[])
            .await?
        {
            let Some(column_name) = string(&row, "name") else {
                continue;
            };
            let declared = string(&row, "type").unwrap_or_default();
            let pk_position = int(&row, "pk").unwrap_or(0);
            let data_type = self.dialect.parse_type(&declared);
            let is_rowid_alias = pk_position == 1
                && has_autoincrement
                && declared.eq_ignore_ascii_case("integer");

            let default_value = string(&row, "dflt_value");
            table.columns.insert(
                column_name.clone(),
                Column {
                    name: column_name.clone(),
                    data_type,
                    ordinal: int(&row, "cid").unwrap_or(0) as u32 + 1,
                    nullable: int(&row, "notnull") == Some(0) && pk_position == 0,
                    is_primary_key: pk_position > 0,
                    is_unique: false,
                    auto_increment: is_rowid_alias,
                    is_generated: false,
                    generated_expression: None,
                    default_is_function: default_value
                        .as_deref()
                        .map(|d| d.contains('('))
                        .unwrap_or(false),
                    default_value,
                    collation: None,
                    options: BTreeMap::new(),
                },
            );
            if pk_position > 0 {
                pk_columns.push((pk_position, column_name));
            }
        }

        if !pk_columns.is_empty() {
            pk_columns.sort();
            table.constraints.insert(
                format!("pk_{name}"),
                Constraint::primary_key(
                    &format!("pk_{name}"),
                    pk_columns.into_iter().map(|(_, c)| c).collect(),
                ),
            );
        }

        self.discover_table_indexes(&mut table, &quoted).await?;
        self.discover_table_foreign_keys(&mut table, &quoted).await?;
        Ok(table)
    }

    async fn discover_table_indexes(&self, table: &mut Table, quoted: &str) -> Result<(), Error> {
        for row in self
            .rows(&format!("PRAGMA index_list('{quoted}')"), &[])
            .await?
        {
            let Some(index_name) = string(&row, "name") else {
                continue;
            };
            let origin = string(&row, "origin").unwrap_or_default();
            if origin == "pk" {
                continue;
            }

            let mut columns = Vec::new();
            let index_quoted = index_name.replace('\'', "''");
            for member in self
                .rows(&format!("PRAGMA index_info('{index_quoted}')"), &[])
                .await?
            {
                if let Some(column) = string(&member, "name") {
                    columns.push(column);
                }
            }

            if origin == "u" {
                // Declared UNIQUE constraints surface as auto-indexes with
                // engine-assigned names; give them a stable one.
                let name = format!("uq_{}_{}", table.name, columns.join("_"));
                table.constraints.insert(
                    name.clone(),
                    Constraint {
                        name,
                        constraint_type: ConstraintType::Unique,
                        columns,
                        reference: None,
                        expression: None,
                        deferrable: false,
                        initially_deferred: false,
                        enabled: true,
                        validated: true,
                        using_index: None,
                    },
                );
            } else if index_name.starts_with("sqlite_") {
                continue;
            } else {
                let unique = int(&row, "unique") == Some(1);
                table.indexes.insert(
                    index_name.clone(),
                    Index {
                        name: index_name,
                        columns: columns.iter().map(|c| IndexColumn::plain(c)).collect(),
                        unique,
                        ..Default::default()
                    },
                );
            }
        }
        Ok(())
    }

    async fn discover_table_foreign_keys(
        &self,
        table: &mut Table,
        quoted: &str,
    ) -> Result<(), Error> {
        for row in self
            .rows(&format!("PRAGMA foreign_key_list('{quoted}')"), &[])
            .await?
        {
            let (Some(id), Some(referenced_table), Some(from)) = (
                int(&row, "id"),
                string(&row, "table"),
                string(&row, "from"),
            ) else {
                continue;
            };
            let name = format!("fk_{}_{id}", table.name);
            let constraint = table
                .constraints
                .entry(name.clone())
                .or_insert_with(|| Constraint {
                    name,
                    constraint_type: ConstraintType::ForeignKey,
                    columns: Vec::new(),
                    reference: Some(Reference {
                        table: TableRef::bare(&referenced_table),
                        columns: Vec::new(),
                        on_update: string(&row, "on_update").as_deref().and_then(action),
                        on_delete: string(&row, "on_delete").as_deref().and_then(action),
                    }),
                    expression: None,
                    deferrable: false,
                    initially_deferred: false,
                    enabled: true,
                    validated: true,
                    using_index: None,
                });
            constraint.columns.push(from);
            if let (Some(reference), Some(to)) =
                (constraint.reference.as_mut(), string(&row, "to"))
            {
                reference.columns.push(to);
            }
        }
        Ok(())
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
impl SchemaOps for SqliteSchema {
    #[tracing::instrument(skip(self), fields(db = "sqlite"))]
    async fn discover_schema(&self) -> Result<UnifiedSchema, Error> {
        self.handle.ensure_connected()?;
        let mut out = UnifiedSchema::new(DatabaseType::Sqlite);

        let master = self
            .rows(
                "SELECT type, name, tbl_name, sql FROM sqlite_master \
                 WHERE name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;

        for row in &master {
            let (Some(kind), Some(name)) = (string(row, "type"), string(row, "name")) else {
                continue;
            };
            let sql = string(row, "sql").unwrap_or_default();
            match kind.as_str() {
                "table" => {
                    let table = self.discover_table(&name, &sql).await?;
                    out.add_table(table);
                }
                "view" => {
                    let definition = sql
                        .split_once(" AS ")
                        .map(|(_, tail)| tail.to_string())
                        .unwrap_or_else(|| sql.clone());
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
                "trigger" => {
                    let upper = sql.to_uppercase();
                    let timing = if upper.contains("INSTEAD OF") {
                        TriggerTiming::InsteadOf
                    } else if upper.contains("BEFORE") {
                        TriggerTiming::Before
                    } else {
                        TriggerTiming::After
                    };
                    let mut events = Vec::new();
                    for (needle, event) in [
                        (" INSERT ", TriggerEvent::Insert),
                        (" UPDATE ", TriggerEvent::Update),
                        (" DELETE ", TriggerEvent::Delete),
                    ] {
                        if upper.contains(needle) {
                            events.push(event);
                        }
                    }
                    out.triggers.insert(
                        name.clone(),
                        Trigger {
                            name,
                            table: TableRef::bare(
                                &string(row, "tbl_name").unwrap_or_default(),
                            ),
                            timing,
                            events,
                            level: TriggerLevel::Row,
                            body: sql,
                        },
                    );
                }
                _ => (),
            }
        }

        tracing::debug!(tables = out.tables.len(), "discovered sqlite schema");
        Ok(out)
    }

    #[tracing::instrument(skip(self, schema), fields(db = "sqlite", tables = schema.tables.len()))]
    async fn create_structure(&self, schema: &UnifiedSchema) -> Result<(), Error> {
        self.handle.ensure_connected()?;

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
        for view in schema.views.values() {
            statements.push(self.dialect.emit_create_view(view));
        }
        for trigger in schema.triggers.values() {
            if let Some(ddl) = self.dialect.emit_create_trigger(trigger) {
                statements.push(ddl);
            }
        }

        // DDL participates in transactions here: all or nothing.
        let mut tx = self
            .handle
            .pool
            .begin()
            .await
            .map_err(|e| err("create_structure", e))?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut tx).await.map_err(|e| {
                tracing::error!(%statement, "structure creation failed");
                err("create_structure", e)
            })?;
        }
        tx.commit().await.map_err(|e| err("create_structure", e))?;
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
