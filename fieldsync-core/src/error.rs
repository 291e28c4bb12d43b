//! Engine-level errors.

use thiserror::Error;

use crate::operation::OperationId;
use crate::store::StoreError;

/// Errors surfaced by the engine facade.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The change could not be durably recorded. Nothing was enqueued.
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The server rejected an online submission as invalid.
    #[error("Operation rejected by server: {0}")]
    Rejected(String),

    #[error("Operation not found: {0}")]
    NotFound(OperationId),
}

impl EngineError {
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}
