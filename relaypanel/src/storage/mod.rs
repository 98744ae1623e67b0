mod dir_store;
mod mem_store;

pub use dir_store::*;
pub use mem_store::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document {0} not found")]
    NotFound(String),
    #[error("Invalid document id: {0}")]
    InvalidId(String),
    #[error("{0} io error: {1}")]
    Io(String, std::io::Error),
}

/// Key-value document store backing profiles, overrides and chain lists.
///
/// The compiler only consumes `get`; `set`/`list` exist for the surrounding
/// management layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<String, StoreError>;
    async fn set(&self, id: &str, content: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}
