use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ObjectReader, ObjectStore, ObjectStoreError, ObjectUpload};

/// In-memory object store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_stream(&self, key: &str) -> Result<Box<dyn ObjectUpload>, ObjectStoreError> {
        Ok(Box::new(MemoryUpload {
            objects: Arc::clone(&self.objects),
            key: key.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectReader>, ObjectStoreError> {
        let objects = self.objects.read().await;
        match objects.get(key) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(ObjectStoreError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(ObjectStoreError::NotFound(key.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryUpload {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    key: String,
    buffer: BytesMut,
}

#[async_trait]
impl ObjectUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> Result<(), ObjectStoreError> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, ObjectStoreError> {
        let MemoryUpload {
            objects,
            key,
            buffer,
        } = *self;
        let size = buffer.len() as u64;
        objects.write().await.insert(key, buffer.freeze());
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> Result<(), ObjectStoreError> {
        Ok(())
    }
}
