//! Fieldsync Core Library
//!
//! Offline-first operation queue and sync engine. Changes are recorded
//! durably while offline and replayed in order against the server once
//! connectivity returns.

pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod operation;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{EngineConfig, DEFAULT_MAX_RETRIES};
pub use engine::{Submission, SyncEngine};
pub use error::EngineError;
pub use network::{HealthProbe, NetworkMonitor};
pub use operation::{Operation, OperationId, OperationKind, OperationParseError, OperationState};
pub use orchestrator::{SyncProgress, SyncResult, SyncState, SyncStatus};
pub use queue::OperationQueue;
pub use store::{FileStore, MemoryStore, OperationStore, SqliteStore, StoreError};
pub use subscription::Subscription;
pub use transport::{Delivery, ErrorClass, HttpTransport, Transport, TransportError};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
