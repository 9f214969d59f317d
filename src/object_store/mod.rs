mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Readable, seekable handle on a stored object.
pub trait ObjectReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectReader for T {}

/// Abstraction over object storage backends.
/// Keys are UUIDs -- the raw blobs are meaningless without the metadata DB.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a streaming write. The object becomes readable under `key`
    /// only once the upload is finished.
    async fn put_stream(&self, key: &str) -> Result<Box<dyn ObjectUpload>, ObjectStoreError>;
    /// Open an object for reading, positioned at its start.
    async fn open(&self, key: &str) -> Result<Box<dyn ObjectReader>, ObjectStoreError>;
    /// Delete an object. Fails with `NotFound` if nothing was stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    /// Static backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// An in-progress streaming write.
///
/// Dropping an upload without calling `finish` discards the written data.
#[async_trait]
pub trait ObjectUpload: Send {
    /// Append a chunk of data.
    async fn write(&mut self, data: Bytes) -> Result<(), ObjectStoreError>;
    /// Publish the object and return the total bytes written.
    async fn finish(self: Box<Self>) -> Result<u64, ObjectStoreError>;
    /// Discard the upload.
    async fn abort(self: Box<Self>) -> Result<(), ObjectStoreError>;
}
