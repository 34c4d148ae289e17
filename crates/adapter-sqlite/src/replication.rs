use adapter::{CdcMechanism, ChangeStream, Error, ReplicationOps};
use usm::DatabaseType;

/// No change feed exists in the engine, and the capability says so; the
/// facet exists only to fail uniformly.
pub struct SqliteReplication;

#[async_trait::async_trait]
impl ReplicationOps for SqliteReplication {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::Polling
    }

    async fn current_position(&self) -> Result<String, Error> {
        Err(Error::NotSupported {
            database_type: DatabaseType::Sqlite,
            operation: "current_position",
        })
    }

    async fn open_change_stream(
        &self,
        _source_id: &str,
        _table: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>, Error> {
        Err(Error::NotSupported {
            database_type: DatabaseType::Sqlite,
            operation: "open_change_stream",
        })
    }
}
