use std::collections::BTreeMap;
use std::sync::RwLock;

/// Durable record of the last successfully applied position per source.
/// Backed by the embedding process's metadata store in production.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, source_id: &str, position: &str) -> anyhow::Result<()>;

    async fn load(&self, source_id: &str) -> anyhow::Result<Option<String>>;
}

/// Process-local store, for tests and single-node embeddings.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    positions: RwLock<BTreeMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> MemoryCheckpointStore {
        MemoryCheckpointStore::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, source_id: &str, position: &str) -> anyhow::Result<()> {
        self.positions
            .write()
            .expect("checkpoint lock is never poisoned")
            .insert(source_id.to_string(), position.to_string());
        Ok(())
    }

    async fn load(&self, source_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .positions
            .read()
            .expect("checkpoint lock is never poisoned")
            .get(source_id)
            .cloned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("s1").await.unwrap(), None);
        store.save("s1", "0/A1B2C3D4").await.unwrap();
        store.save("s1", "0/A1B2C3D8").await.unwrap();
        assert_eq!(store.load("s1").await.unwrap().as_deref(), Some("0/A1B2C3D8"));
    }
}
