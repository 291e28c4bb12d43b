use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{OperationStore, StoreError};
use crate::operation::{Operation, OperationId};

/// In-memory operation store.
///
/// Not durable across processes. Share one instance (behind an `Arc`)
/// between engine instances to simulate a restart over the same storage.
/// [`MemoryStore::set_unavailable`] makes every call fail, the way a full
/// disk or an exhausted storage quota would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Operation>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, Vec<Operation>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage quota exceeded".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.records()?.clone())
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StoreError> {
        Ok(self.records()?.iter().find(|op| op.id == *id).cloned())
    }

    async fn put(&self, op: &Operation) -> Result<(), StoreError> {
        let mut records = self.records()?;
        match records.iter_mut().find(|existing| existing.id == op.id) {
            Some(existing) => *existing = op.clone(),
            None => records.push(op.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &OperationId) -> Result<(), StoreError> {
        self.records()?.retain(|op| op.id != *id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records()?.clear();
        Ok(())
    }
}
