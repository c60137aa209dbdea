use super::{Collection, DocumentStore, StoreResult};
use crate::error::StoreError;
use dashmap::DashMap;
use std::sync::Arc;

/// Named set of document-store connections.
///
/// The framework instance opens every registered connection during `listen`
/// and closes them on shutdown; the CRUD synthesizer looks up collections by
/// the store name in each model's `DbConfig`.
#[derive(Default)]
pub struct StoreConnections {
    stores: DashMap<String, Arc<dyn DocumentStore>>,
}

impl StoreConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> &Self {
        self.stores.insert(name.into(), store);
        self
    }

    pub fn get(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        self.stores
            .get(name)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::UnknownStore {
                name: name.to_string(),
            })
    }

    pub fn collection(&self, store: &str, collection: &str) -> StoreResult<Arc<dyn Collection>> {
        Ok(self.get(store)?.collection(collection))
    }

    pub async fn connect_all(&self) -> StoreResult<()> {
        for entry in self.stores.iter() {
            tracing::debug!(store = %entry.key(), "connecting store");
            entry.value().connect().await?;
        }
        Ok(())
    }

    pub async fn disconnect_all(&self) -> StoreResult<()> {
        for entry in self.stores.iter() {
            entry.value().disconnect().await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn connect_all_opens_every_store() {
        let connections = StoreConnections::new();
        let a = Arc::new(MemoryStore::new());
        let b = Arc::new(MemoryStore::new());
        connections.add("userDb", a.clone());
        connections.add("auditDb", b.clone());

        connections.connect_all().await.unwrap();
        assert!(a.is_connected());
        assert!(b.is_connected());

        connections.disconnect_all().await.unwrap();
        assert!(!a.is_connected());
    }

    #[tokio::test]
    async fn unknown_store_is_an_error() {
        let connections = StoreConnections::new();
        let err = connections.get("nope").err().unwrap();
        assert!(matches!(err, StoreError::UnknownStore { .. }));
    }

    #[tokio::test]
    async fn connect_all_propagates_failures() {
        let connections = StoreConnections::new();
        connections.add("bad", Arc::new(MemoryStore::failing()));
        assert!(connections.connect_all().await.is_err());
    }
}
