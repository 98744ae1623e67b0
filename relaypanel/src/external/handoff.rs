use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("{0} io error: {1}")]
    Io(String, std::io::Error),
}

/// Boundary to the core-supervisor collaborator: takes the compiled
/// configuration text; restarting the core process is its business.
#[async_trait]
pub trait CoreHandoff: Send + Sync {
    async fn deliver(&self, compiled: &str) -> Result<(), HandoffError>;
}

/// Writes the compiled configuration to the path the core loads from.
///
/// The write goes through a sibling temp file and a rename so the core can
/// never observe a torn document.
pub struct FileHandoff {
    target: PathBuf,
}

impl FileHandoff {
    pub fn new<P: AsRef<Path>>(target: P) -> Self {
        Self {
            target: target.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CoreHandoff for FileHandoff {
    async fn deliver(&self, compiled: &str) -> Result<(), HandoffError> {
        let io_error = |e| HandoffError::Io(self.target.to_string_lossy().to_string(), e);
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let staging = self.target.with_extension("tmp");
        tokio::fs::write(&staging, compiled).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &self.target)
            .await
            .map_err(io_error)?;
        tracing::debug!("Delivered compiled configuration to {:?}", self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivered_text_lands_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("running.yaml");
        let handoff = FileHandoff::new(&target);
        handoff.deliver("mode: rule\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "mode: rule\n");
        handoff.deliver("mode: global\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "mode: global\n");
    }
}
