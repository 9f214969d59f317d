use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ObjectReader, ObjectStore, ObjectStoreError, ObjectUpload};

/// Local filesystem object store.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Keys are flat file names inside the base directory.
    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put_stream(&self, key: &str) -> Result<Box<dyn ObjectUpload>, ObjectStoreError> {
        let final_path = self.object_path(key)?;
        let temp_path = self
            .base_path
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(LocalUpload {
            file: Some(file),
            temp_path,
            final_path,
            bytes_written: 0,
            finished: false,
        }))
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectReader>, ObjectStoreError> {
        let path = self.object_path(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(e)
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Writes into a hidden temp file and renames it into place on finish.
struct LocalUpload {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
    finished: bool,
}

#[async_trait]
impl ObjectUpload for LocalUpload {
    async fn write(&mut self, data: Bytes) -> Result<(), ObjectStoreError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ObjectStoreError::Backend("upload already closed".to_string()))?;
        file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, ObjectStoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.finished = true;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> Result<(), ObjectStoreError> {
        drop(self.file.take());
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for LocalUpload {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.temp_path.display(),
                        error = %e,
                        "Failed to remove abandoned upload"
                    );
                }
            }
        }
    }
}
