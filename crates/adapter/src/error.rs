use usm::DatabaseType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy shared by every adapter. Operators return these to the
/// caller and never retry on their own; the CDC source consults
/// `is_transient` to decide whether a retry with backoff is warranted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{database_type} does not support {operation}")]
    NotSupported {
        database_type: DatabaseType,
        operation: &'static str,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection is closed")]
    NotConnected,

    /// Network resets, pool exhaustion, deadlocks. Retryable.
    #[error("transient failure in {operation} on {database_type}: {source}")]
    Transient {
        database_type: DatabaseType,
        operation: &'static str,
        source: anyhow::Error,
    },

    /// Invariant violations. A CDC source hitting one stops and stays
    /// stopped.
    #[error("fatal failure in {operation} on {database_type}: {message}")]
    Fatal {
        database_type: DatabaseType,
        operation: &'static str,
        message: String,
    },

    #[error("{operation} on {database_type} failed: {source}")]
    Operation {
        database_type: DatabaseType,
        operation: &'static str,
        source: anyhow::Error,
    },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Wrap a driver error, classifying it as transient where retrying can
    /// plausibly succeed.
    pub fn from_sqlx(
        database_type: DatabaseType,
        operation: &'static str,
        source: sqlx::Error,
    ) -> Error {
        match &source {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Error::Transient {
                database_type,
                operation,
                source: source.into(),
            },
            sqlx::Error::Database(db_err) => {
                // Deadlocks and serialization failures are worth retrying.
                let retryable = db_err
                    .code()
                    .map(|code| matches!(code.as_ref(), "40001" | "40P01" | "1213" | "1205"))
                    .unwrap_or(false);
                if retryable {
                    Error::Transient {
                        database_type,
                        operation,
                        source: source.into(),
                    }
                } else {
                    Error::Operation {
                        database_type,
                        operation,
                        source: source.into(),
                    }
                }
            }
            sqlx::Error::RowNotFound => Error::NotFound {
                kind: "row",
                name: operation.to_string(),
            },
            _ => Error::Operation {
                database_type,
                operation,
                source: source.into(),
            },
        }
    }

    /// A retryable failure that did not originate in a database driver.
    pub fn transient(
        database_type: DatabaseType,
        operation: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Error {
        Error::Transient {
            database_type,
            operation,
            source: source.into(),
        }
    }

    pub fn operation(
        database_type: DatabaseType,
        operation: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Error {
        Error::Operation {
            database_type,
            operation,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = Error::from_sqlx(DatabaseType::Postgres, "insert", sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());

        let err = Error::from_sqlx(
            DatabaseType::Postgres,
            "insert",
            sqlx::Error::RowNotFound,
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn messages_carry_backend_operation_and_cause() {
        let err = Error::operation(
            DatabaseType::MySql,
            "discover_schema",
            anyhow::anyhow!("boom"),
        );
        let message = err.to_string();
        assert!(message.contains("mysql"));
        assert!(message.contains("discover_schema"));
        assert!(message.contains("boom"));
    }
}
