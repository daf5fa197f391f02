//! Payload storage, independent of the metadata rows kept in the database

pub mod local;

use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;

pub use local::LocalFileService;

/// Result of a successful store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Opaque key the payload is reachable by
    pub storage_key: String,
    pub size: u64,
    /// Hex SHA-256 of the payload
    pub sha256: String,
}

/// A payload opened for reading
pub struct Payload {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub size: u64,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("size", &self.size).finish()
    }
}

/// Durable payload store keyed by opaque storage keys
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write a payload under a freshly generated, collision-free key.
    /// Nothing is visible under the key unless the whole payload was written.
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        suggested_name: &str,
        cancel: &CancellationToken,
    ) -> AppResult<StoredObject>;

    /// Open a payload. Fails with `NotFound` for keys without a payload.
    async fn retrieve(&self, storage_key: &str, cancel: &CancellationToken) -> AppResult<Payload>;

    /// Remove a payload. Removing an absent key succeeds.
    async fn delete(&self, storage_key: &str) -> AppResult<()>;

    /// Every key that currently has a payload
    async fn list_keys(&self) -> AppResult<Vec<String>>;

    /// When the payload under `storage_key` was written, `None` when absent
    async fn stored_at(&self, storage_key: &str) -> AppResult<Option<SystemTime>>;
}
