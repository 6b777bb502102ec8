//! Object storage for certificate state
//!
//! The updater treats storage as a flat key/value space. Implementations:
//!
//! - [`MemoryStore`] - in-process map, for tests and dry runs
//! - [`FileStore`] - a local directory standing in for a bucket
//! - [`S3Store`] - Amazon S3 (feature `aws`)

mod file;
mod memory;
#[cfg(feature = "aws")]
mod s3;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "aws")]
pub use s3::S3Store;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by object stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object exists at the key
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backend rejected or failed the request
    #[error("storage backend error for {key}: {message}")]
    Backend { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn backend(key: &str, message: impl ToString) -> Self {
        Self::Backend {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// Flat key/value object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any object at the same key
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Read an object; [`StoreError::NotFound`] if it is absent
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Probe for an object. Only "not found" maps to `false`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// List keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location of the store (bucket name, directory)
    fn location(&self) -> String;
}
