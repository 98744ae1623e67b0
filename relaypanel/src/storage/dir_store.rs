use crate::storage::{DocumentStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One file per document id under a single directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Ids are opaque keys; anything that could escape the root is refused.
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.starts_with('.') {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl DocumentStore for DirStore {
    async fn get(&self, id: &str) -> Result<String, StoreError> {
        let path = self.entry_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(path.to_string_lossy().to_string(), e)),
        }
    }

    async fn set(&self, id: &str, content: &str) -> Result<(), StoreError> {
        let path = self.entry_path(id)?;
        let io_error = |e| StoreError::Io(path.to_string_lossy().to_string(), e);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, content).await.map_err(io_error)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let io_error = |e| StoreError::Io(self.root.to_string_lossy().to_string(), e);
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;
        while let Some(entry) = dir.next_entry().await.map_err(io_error)? {
            if entry.file_type().await.map_err(io_error)?.is_file() {
                entries.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        store.set("profiles.yaml", "current: null").await.unwrap();
        store.set("r42", "proxies: []").await.unwrap();
        assert_eq!(store.get("r42").await.unwrap(), "proxies: []");
        assert_eq!(
            store.list().await.unwrap(),
            vec!["profiles.yaml".to_string(), "r42".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_and_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        assert!(matches!(
            store.get("absent").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
    }
}
