use crate::storage::{DocumentStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory store used by tests and by callers embedding the pipeline.
#[derive(Default)]
pub struct MemStore {
    docs: DashMap<String, String>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (id, content) in docs {
            store.docs.insert(id.into(), content.into());
        }
        store
    }
}

#[async_trait]
impl DocumentStore for MemStore {
    async fn get(&self, id: &str) -> Result<String, StoreError> {
        self.docs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn set(&self, id: &str, content: &str) -> Result<(), StoreError> {
        self.docs.insert(id.to_string(), content.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.docs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
