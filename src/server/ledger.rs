//! Idempotency ledger.
//!
//! Records every operation the server has applied, keyed by the client's
//! idempotency key. A key is applied at most once; later deliveries of the
//! same key are reported as duplicates.

use chrono::{DateTime, Utc};
use fieldsync_core::OperationKind;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// An operation the server has applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedOperation {
    pub key: String,
    pub client_id: String,
    pub kind: OperationKind,
    pub resource: String,
    pub payload: Value,
    pub applied_at: DateTime<Utc>,
}

#[derive(Default)]
struct Entries {
    order: Vec<String>,
    by_key: HashMap<String, AppliedOperation>,
}

/// Outcome of recording a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Applied,
    Duplicate,
}

#[derive(Default)]
pub struct Ledger {
    entries: RwLock<Entries>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `op` unless its key was seen before.
    pub fn record(&self, op: AppliedOperation) -> Recorded {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.by_key.contains_key(&op.key) {
            return Recorded::Duplicate;
        }
        entries.order.push(op.key.clone());
        entries.by_key.insert(op.key.clone(), op);
        Recorded::Applied
    }

    /// Applied operations in arrival order.
    pub fn applied(&self) -> Vec<AppliedOperation> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .order
            .iter()
            .filter_map(|key| entries.by_key.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
