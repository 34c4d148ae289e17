use crate::{
    Capability, ConnectionConfig, DataOps, Decrypter, Error, InstanceConfig, InstanceOps,
    Lifecycle, MetadataOps, ReplicationOps, SchemaOps,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use usm::DatabaseType;
use uuid::Uuid;

/// Connected-state shared between a connection and its operator facets.
/// Facets check it on entry so operations racing a close fail cleanly.
#[derive(Debug)]
pub struct ConnState {
    connected: AtomicBool,
}

impl ConnState {
    pub fn new() -> Arc<ConnState> {
        Arc::new(ConnState {
            connected: AtomicBool::new(true),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Returns true for exactly one caller; subsequent closes are no-ops.
    pub fn mark_closed(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState {
            connected: AtomicBool::new(true),
        }
    }
}

/// A live database-scope connection: the accepted config plus the five
/// operator facets produced by the adapter that built it.
pub struct Connection {
    id: Uuid,
    config: ConnectionConfig,
    state: Arc<ConnState>,
    schema: Arc<dyn SchemaOps>,
    data: Arc<dyn DataOps>,
    replication: Arc<dyn ReplicationOps>,
    metadata: Arc<dyn MetadataOps>,
    lifecycle: Arc<dyn Lifecycle>,
}

impl Connection {
    pub fn new(
        config: ConnectionConfig,
        state: Arc<ConnState>,
        schema: Arc<dyn SchemaOps>,
        data: Arc<dyn DataOps>,
        replication: Arc<dyn ReplicationOps>,
        metadata: Arc<dyn MetadataOps>,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            config,
            state,
            schema,
            data,
            replication,
            metadata,
            lifecycle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn database_type(&self) -> DatabaseType {
        self.config.database_vendor
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.state.ensure_connected()?;
        self.lifecycle.ping().await
    }

    /// Release the pool. Idempotent: the first close wins, later calls
    /// return without error.
    pub async fn close(&self) {
        if self.state.mark_closed() {
            self.lifecycle.close().await;
            tracing::info!(id = %self.id, db = %self.database_type(), "closed connection");
        }
    }

    pub fn schema(&self) -> Result<&Arc<dyn SchemaOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.schema)
    }

    pub fn data(&self) -> Result<&Arc<dyn DataOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.data)
    }

    pub fn replication(&self) -> Result<&Arc<dyn ReplicationOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.replication)
    }

    pub fn metadata(&self) -> Result<&Arc<dyn MetadataOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.metadata)
    }
}

/// A live server-scope connection, for databases-within-instance
/// administration.
pub struct InstanceConnection {
    id: Uuid,
    config: InstanceConfig,
    state: Arc<ConnState>,
    instance: Arc<dyn InstanceOps>,
    metadata: Arc<dyn MetadataOps>,
    lifecycle: Arc<dyn Lifecycle>,
}

impl InstanceConnection {
    pub fn new(
        config: InstanceConfig,
        state: Arc<ConnState>,
        instance: Arc<dyn InstanceOps>,
        metadata: Arc<dyn MetadataOps>,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> InstanceConnection {
        InstanceConnection {
            id: Uuid::new_v4(),
            config,
            state,
            instance,
            metadata,
            lifecycle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn database_type(&self) -> DatabaseType {
        self.config.database_vendor
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.state.ensure_connected()?;
        self.lifecycle.ping().await
    }

    pub async fn close(&self) {
        if self.state.mark_closed() {
            self.lifecycle.close().await;
        }
    }

    pub fn instance(&self) -> Result<&Arc<dyn InstanceOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.instance)
    }

    pub fn metadata(&self) -> Result<&Arc<dyn MetadataOps>, Error> {
        self.state.ensure_connected()?;
        Ok(&self.metadata)
    }
}

/// The factory behind a backend: static capability plus connect paths.
/// Obtained through the registry; nothing else constructs connections.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    fn capabilities(&self) -> &'static Capability;

    /// Decrypt credentials, build the native pool within the configured
    /// bounds, ping it, and wrap it in a connection.
    async fn connect(
        &self,
        config: ConnectionConfig,
        decrypter: &dyn Decrypter,
    ) -> Result<Connection, Error>;

    async fn connect_instance(
        &self,
        config: InstanceConfig,
        decrypter: &dyn Decrypter,
    ) -> Result<InstanceConnection, Error>;
}

#[cfg(test)]
mod test {
    use super::ConnState;

    #[test]
    fn close_is_idempotent() {
        let state = ConnState::new();
        assert!(state.is_connected());
        assert!(state.ensure_connected().is_ok());

        assert!(state.mark_closed());
        assert!(!state.mark_closed());
        assert!(!state.is_connected());
        assert!(state.ensure_connected().is_err());
    }
}
