use dialect::{MarkerStyle, UpsertForm};
use usm::DatabaseType;

/// How a backend delivers row-level changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcMechanism {
    /// Logical replication slot with a decoding plugin.
    LogicalSlot,
    /// Binary log positions (`file:offset`).
    Binlog,
    /// Redo-log mining over SCN windows.
    LogMiner,
    /// Timestamp-column polling. Degraded: inserts and updates are
    /// indistinguishable, and cross-table ordering is not preserved.
    Polling,
    /// Replica-set operation log.
    Oplog,
    /// Native change stream API.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCase {
    Preserve,
    Upper,
    Lower,
}

/// Where unquoted NULLs sort by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

/// Static description of one backend's feature surface. Generic code keys
/// its emission strategy off this descriptor; conditionals on the backend
/// identifier outside the dialect and adapter crates are forbidden.
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub database_type: DatabaseType,
    pub quote_char: char,
    pub marker_style: MarkerStyle,
    pub supports_transactions: bool,
    pub supports_cdc: bool,
    pub cdc_mechanisms: &'static [CdcMechanism],
    pub upsert_form: UpsertForm,
    pub identifier_case: IdentifierCase,
    pub null_ordering: NullOrdering,
    /// Whether several DDL statements can run atomically in one transaction.
    pub multistatement_ddl_in_tx: bool,
    /// What this backend calls a table-like container, for messages.
    pub collection_term: &'static str,
}

pub const POSTGRES: Capability = Capability {
    database_type: DatabaseType::Postgres,
    quote_char: '"',
    marker_style: MarkerStyle::Dollar,
    supports_transactions: true,
    supports_cdc: true,
    cdc_mechanisms: &[CdcMechanism::LogicalSlot],
    upsert_form: UpsertForm::OnConflict,
    identifier_case: IdentifierCase::Lower,
    null_ordering: NullOrdering::Last,
    multistatement_ddl_in_tx: true,
    collection_term: "table",
};

pub const MYSQL: Capability = Capability {
    database_type: DatabaseType::MySql,
    quote_char: '`',
    marker_style: MarkerStyle::Question,
    supports_transactions: true,
    supports_cdc: true,
    cdc_mechanisms: &[CdcMechanism::Binlog, CdcMechanism::Polling],
    upsert_form: UpsertForm::OnDuplicateKey,
    identifier_case: IdentifierCase::Preserve,
    null_ordering: NullOrdering::First,
    multistatement_ddl_in_tx: false,
    collection_term: "table",
};

pub const SQLITE: Capability = Capability {
    database_type: DatabaseType::Sqlite,
    quote_char: '"',
    marker_style: MarkerStyle::Question,
    supports_transactions: true,
    supports_cdc: false,
    cdc_mechanisms: &[],
    upsert_form: UpsertForm::OnConflict,
    identifier_case: IdentifierCase::Preserve,
    null_ordering: NullOrdering::First,
    multistatement_ddl_in_tx: true,
    collection_term: "table",
};

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capability_quote_chars_agree_with_dialects() {
        for capability in [POSTGRES, MYSQL, SQLITE] {
            let dialect = dialect::dialect_for(capability.database_type);
            assert_eq!(capability.quote_char, dialect.quote_char());
            assert_eq!(capability.marker_style, dialect.marker_style());
            assert_eq!(capability.upsert_form, dialect.upsert_form());
        }
    }

    #[test]
    fn cdc_support_implies_a_mechanism() {
        for capability in [POSTGRES, MYSQL, SQLITE] {
            assert_eq!(capability.supports_cdc, !capability.cdc_mechanisms.is_empty());
        }
    }
}
