//! Durable operation storage.
//!
//! The store is the only component that touches persistent state. Every
//! method either completes durably or fails with a [`StoreError`]; a failed
//! `put` must leave the previous record (if any) untouched.
//!
//! Three implementations ship with the crate:
//! - [`SqliteStore`]: one row per operation in a SQLite database
//! - [`FileStore`]: one JSON file per operation in a directory
//! - [`MemoryStore`]: non-durable, for tests and ephemeral hosts

mod file;
mod memory;
mod sqlite;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::operation::{Operation, OperationId};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage failure. Surfaced to the caller, never swallowed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error for {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to serialize operation {0}: {1}")]
    Serialization(OperationId, #[source] serde_json::Error),

    #[error("Corrupt operation record {0}: {1}")]
    Corrupt(String, String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable key-value storage for queued operations, keyed by operation id.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Loads every stored operation.
    ///
    /// Implementations return records in insertion order where they can;
    /// the queue re-sorts by `enqueued_at` either way.
    async fn load_all(&self) -> Result<Vec<Operation>, StoreError>;

    /// Loads a single operation.
    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StoreError>;

    /// Inserts or replaces the record for `op.id`.
    async fn put(&self, op: &Operation) -> Result<(), StoreError>;

    /// Deletes the record for `id`. Deleting a missing id is not an error.
    async fn delete(&self, id: &OperationId) -> Result<(), StoreError>;

    /// Deletes every record.
    async fn clear(&self) -> Result<(), StoreError>;
}
