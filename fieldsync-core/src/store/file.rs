//! Directory-backed operation store.
//!
//! Each operation lives in its own file:
//! ```text
//! <DATA_DIR>/
//!   <operation-id>.json
//!   <operation-id>.json
//! ```
//!
//! Writes go to a temp file that is fsynced and then renamed over the
//! final path, so a record is either the old version or the new one.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{OperationStore, StoreError};
use crate::operation::{Operation, OperationId};

/// File extension for operation records.
const RECORD_EXTENSION: &str = "json";

/// Extension for in-progress writes.
const TEMP_EXTENSION: &str = "json.tmp";

#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the full path for an operation record.
    pub fn record_path(&self, id: &OperationId) -> PathBuf {
        self.data_dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<Operation>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(path.display().to_string(), e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(path.to_path_buf(), e)),
        }
    }

    async fn sync_dir(&self) -> Result<(), StoreError> {
        // Directory fsync makes the rename itself durable. Not supported on
        // every platform, so only real I/O errors count.
        match fs::File::open(&self.data_dir).await {
            Ok(dir) => match dir.sync_all().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Unsupported => Ok(()),
                Err(e) => Err(StoreError::Io(self.data_dir.clone(), e)),
            },
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl OperationStore for FileStore {
    async fn load_all(&self) -> Result<Vec<Operation>, StoreError> {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(self.data_dir.clone(), e)),
        };

        let mut ops = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(self.data_dir.clone(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                // Leftover temp files from an interrupted write are ignored
                continue;
            }
            if let Some(op) = self.read_record(&path).await? {
                ops.push(op);
            }
        }

        ops.sort_by_key(|op| op.enqueued_at);
        Ok(ops)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StoreError> {
        self.read_record(&self.record_path(id)).await
    }

    async fn put(&self, op: &Operation) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StoreError::Io(self.data_dir.clone(), e))?;

        let bytes = serde_json::to_vec_pretty(op).map_err(|e| StoreError::Serialization(op.id, e))?;

        let path = self.record_path(&op.id);
        let temp_path = path.with_extension(TEMP_EXTENSION);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::Io(temp_path.clone(), e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::Io(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::Io(temp_path.clone(), e))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io(path, e));
        }

        self.sync_dir().await
    }

    async fn delete(&self, id: &OperationId) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => self.sync_dir().await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(path, e)),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::Io(self.data_dir.clone(), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(self.data_dir.clone(), e))?
        {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(RECORD_EXTENSION) || name.ends_with(TEMP_EXTENSION) {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| StoreError::Io(path.clone(), e))?;
            }
        }

        self.sync_dir().await
    }
}
