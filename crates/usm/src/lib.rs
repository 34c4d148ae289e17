mod schema;
mod types;
mod validate;

pub use schema::{
    Column, Constraint, ConstraintType, Extension, Function, Index, IndexColumn, NullsOrder,
    Procedure, Reference, ReferentialAction, SchemaDef, Sequence, SortOrder, Table, TableRef,
    TableType, Trigger, TriggerEvent, TriggerLevel, TriggerTiming, TypeDef, UnifiedSchema, View,
};
pub use types::{CompositeField, DataType, TypeCategory};
pub use validate::{validate, Violation};

use serde::{Deserialize, Serialize};

/// A supported backend engine. The unified schema, dialect helpers, and the
/// adapter registry are all keyed by this identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Postgres => "postgres",
            DatabaseType::MySql => "mysql",
            DatabaseType::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = UnknownDatabaseType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseType::MySql),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            other => Err(UnknownDatabaseType(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown database type: '{0}'")]
pub struct UnknownDatabaseType(pub String);

#[cfg(test)]
mod test {
    use super::DatabaseType;

    #[test]
    fn database_type_round_trips_through_str() {
        for (s, expect) in [
            ("postgres", DatabaseType::Postgres),
            ("postgresql", DatabaseType::Postgres),
            ("mysql", DatabaseType::MySql),
            ("mariadb", DatabaseType::MySql),
            ("sqlite", DatabaseType::Sqlite),
        ] {
            assert_eq!(s.parse::<DatabaseType>().unwrap(), expect);
        }
        assert_eq!(DatabaseType::MySql.to_string(), "mysql");
        assert!("mongodb".parse::<DatabaseType>().is_err());
    }
}
