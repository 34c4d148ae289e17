use super::{ConstraintType, DataType, Table, UnifiedSchema};

/// A single well-formedness failure. A valid schema produces none.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Map key of the table the violation is scoped to, when table-scoped.
    pub table: Option<String>,
    /// The constraint, index, or column at fault.
    pub object: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "table '{table}', {}: {}", self.object, self.message),
            None => write!(f, "{}: {}", self.object, self.message),
        }
    }
}

/// Check every structural invariant of the schema model. Returns all
/// violations found rather than stopping at the first, so a caller can
/// report a discovery or translation bug in full.
pub fn validate(schema: &UnifiedSchema) -> Vec<Violation> {
    let mut out = Vec::new();

    for (key, table) in &schema.tables {
        validate_table(schema, key, table, &mut out);
    }
    out
}

fn validate_table(
    schema: &UnifiedSchema,
    key: &str,
    table: &Table,
    out: &mut Vec<Violation>,
) {
    let violation = |object: &str, message: String| Violation {
        table: Some(key.to_string()),
        object: object.to_string(),
        message,
    };

    // Constraint and index columns must name real columns of this table.
    for constraint in table.constraints.values() {
        for column in &constraint.columns {
            if !table.columns.contains_key(column) {
                out.push(violation(
                    &constraint.name,
                    format!("constraint references unknown column '{column}'"),
                ));
            }
        }
    }
    for index in table.indexes.values() {
        for member in &index.columns {
            if member.expression.is_none() && !table.columns.contains_key(&member.name) {
                out.push(violation(
                    &index.name,
                    format!("index references unknown column '{}'", member.name),
                ));
            }
        }
    }

    // Foreign keys resolve to a known table, and their referenced columns
    // exist on it. A target declared external (a stub entry with the
    // `external` option) is accepted without column checks, since its
    // column set may not be fully known.
    for constraint in table.constraints.values() {
        if constraint.constraint_type != ConstraintType::ForeignKey {
            continue;
        }
        let Some(reference) = &constraint.reference else {
            out.push(violation(
                &constraint.name,
                "foreign key carries no reference".to_string(),
            ));
            continue;
        };
        match schema.table(&reference.table) {
            None => out.push(violation(
                &constraint.name,
                format!("foreign key references unknown table '{}'", reference.table.name),
            )),
            Some(referenced) if referenced.is_external() => (),
            Some(referenced) => {
                for column in &reference.columns {
                    if !referenced.columns.contains_key(column) {
                        out.push(violation(
                            &constraint.name,
                            format!(
                                "foreign key references unknown column '{}.{column}'",
                                reference.table.name
                            ),
                        ));
                    }
                }
            }
        }
    }

    // At most one primary key; its columns are non-nullable table columns.
    let primary_keys: Vec<_> = table
        .constraints
        .values()
        .filter(|c| c.constraint_type == ConstraintType::PrimaryKey)
        .collect();
    if primary_keys.len() > 1 {
        out.push(violation(
            &table.name,
            format!("table declares {} primary keys", primary_keys.len()),
        ));
    }
    for pk in &primary_keys {
        for column in &pk.columns {
            match table.columns.get(column) {
                Some(col) if col.nullable => out.push(violation(
                    &pk.name,
                    format!("primary-key column '{column}' is nullable"),
                )),
                _ => (),
            }
        }
    }

    for column in table.columns.values() {
        if column.auto_increment && column.is_generated {
            out.push(violation(
                &column.name,
                "column is both auto-increment and generated".to_string(),
            ));
        }
        validate_data_type(key, &column.name, &column.data_type, out);
    }
}

// Composite fields and domain/range bases must themselves be well-formed.
fn validate_data_type(table: &str, column: &str, data_type: &DataType, out: &mut Vec<Violation>) {
    let violation = |message: String| Violation {
        table: Some(table.to_string()),
        object: column.to_string(),
        message,
    };

    if data_type.base_type.is_empty() && data_type.name.is_empty() {
        out.push(violation("data type has no name".to_string()));
    }
    if data_type.is_enum && data_type.enum_values.is_empty() {
        out.push(violation("enum type declares no values".to_string()));
    }
    for field in &data_type.composite_fields {
        validate_data_type(table, column, &field.data_type, out);
    }
    if let Some(base) = &data_type.domain_base {
        validate_data_type(table, column, base, out);
    }
    if let Some(subtype) = &data_type.range_subtype {
        validate_data_type(table, column, subtype, out);
    }
}

#[cfg(test)]
mod test {
    use super::super::*;
    use super::*;
    use std::collections::BTreeMap;

    fn column(name: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: DataType::scalar("bigint", TypeCategory::Numeric),
            nullable,
            ..Default::default()
        }
    }

    fn table_with(columns: Vec<Column>, constraints: Vec<Constraint>) -> Table {
        Table {
            name: "t".to_string(),
            columns: columns
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect::<BTreeMap<_, _>>(),
            constraints: constraints
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn well_formed_schema_validates_clean() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        schema.add_table(table_with(
            vec![column("id", false), column("v", true)],
            vec![Constraint::primary_key("t_pkey", vec!["id".to_string()])],
        ));
        assert!(validate(&schema).is_empty());
    }

    #[test]
    fn constraint_on_missing_column_is_flagged() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        schema.add_table(table_with(
            vec![column("id", false)],
            vec![Constraint::primary_key("t_pkey", vec!["nope".to_string()])],
        ));
        let violations = validate(&schema);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("unknown column 'nope'"));
    }

    #[test]
    fn nullable_primary_key_is_flagged() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        schema.add_table(table_with(
            vec![column("id", true)],
            vec![Constraint::primary_key("t_pkey", vec!["id".to_string()])],
        ));
        let violations = validate(&schema);
        assert!(violations
            .iter()
            .any(|v| v.message.contains("'id' is nullable")));
    }

    #[test]
    fn duplicate_primary_keys_are_flagged() {
        let mut schema = UnifiedSchema::new(DatabaseType::MySql);
        schema.add_table(table_with(
            vec![column("a", false), column("b", false)],
            vec![
                Constraint::primary_key("pk1", vec!["a".to_string()]),
                Constraint::primary_key("pk2", vec!["b".to_string()]),
            ],
        ));
        let violations = validate(&schema);
        assert!(violations.iter().any(|v| v.message.contains("2 primary keys")));
    }

    #[test]
    fn foreign_key_to_unknown_table_is_flagged() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        let mut child = table_with(vec![column("parent_id", true)], vec![]);
        child.constraints.insert(
            "fk".to_string(),
            Constraint {
                name: "fk".to_string(),
                constraint_type: ConstraintType::ForeignKey,
                columns: vec!["parent_id".to_string()],
                reference: Some(Reference {
                    table: TableRef::bare("parent"),
                    columns: vec!["id".to_string()],
                    on_update: None,
                    on_delete: None,
                }),
                expression: None,
                deferrable: false,
                initially_deferred: false,
                enabled: true,
                validated: true,
                using_index: None,
            },
        );
        schema.add_table(child);

        let violations = validate(&schema);
        assert!(violations
            .iter()
            .any(|v| v.message.contains("unknown table 'parent'")));

        // Adding the parent resolves it.
        let mut schema2 = schema.clone();
        schema2.add_table(Table {
            name: "parent".to_string(),
            columns: [("id".to_string(), column("id", false))].into_iter().collect(),
            ..Default::default()
        });
        assert!(validate(&schema2).is_empty());
    }

    #[test]
    fn foreign_key_to_external_stub_is_accepted() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        let mut child = table_with(vec![column("parent_id", true)], vec![]);
        child.constraints.insert(
            "fk".to_string(),
            Constraint {
                name: "fk".to_string(),
                constraint_type: ConstraintType::ForeignKey,
                columns: vec!["parent_id".to_string()],
                reference: Some(Reference {
                    table: TableRef::bare("parent"),
                    columns: vec!["id".to_string()],
                    on_update: None,
                    on_delete: None,
                }),
                expression: None,
                deferrable: false,
                initially_deferred: false,
                enabled: true,
                validated: true,
                using_index: None,
            },
        );
        schema.add_table(child);

        // A stub carrying the external option satisfies the reference
        // even though it declares no columns.
        schema.add_table(Table {
            name: "parent".to_string(),
            options: [("external".to_string(), serde_json::Value::Bool(true))]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        assert!(validate(&schema).is_empty());
    }

    #[test]
    fn foreign_key_cycles_are_representable_and_valid() {
        let mut schema = UnifiedSchema::new(DatabaseType::Postgres);
        for (name, other) in [("a", "b"), ("b", "a")] {
            let mut table = table_with(vec![column("id", false), column("peer", true)], vec![]);
            table.name = name.to_string();
            table.constraints.insert(
                format!("{name}_peer_fk"),
                Constraint {
                    name: format!("{name}_peer_fk"),
                    constraint_type: ConstraintType::ForeignKey,
                    columns: vec!["peer".to_string()],
                    reference: Some(Reference {
                        table: TableRef::bare(other),
                        columns: vec!["id".to_string()],
                        on_update: None,
                        on_delete: None,
                    }),
                    expression: None,
                    deferrable: true,
                    initially_deferred: true,
                    enabled: true,
                    validated: true,
                    using_index: None,
                },
            );
            schema.add_table(table);
        }
        assert!(validate(&schema).is_empty());
    }

    #[test]
    fn auto_increment_and_generated_conflict() {
        let mut schema = UnifiedSchema::new(DatabaseType::MySql);
        let mut bad = column("id", false);
        bad.auto_increment = true;
        bad.is_generated = true;
        schema.add_table(table_with(vec![bad], vec![]));
        let violations = validate(&schema);
        assert!(violations
            .iter()
            .any(|v| v.message.contains("auto-increment and generated")));
    }
}
