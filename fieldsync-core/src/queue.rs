//! Ordered, write-through view over the operation store.
//!
//! The queue owns the ordering and uniqueness invariants. Every mutation is
//! written to the store first and applied in memory only once the store has
//! confirmed it, so the in-memory view never holds state the store lacks.
//!
//! The queue is not synchronized on its own; the engine keeps it behind a
//! single async mutex.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::operation::{Operation, OperationId, OperationKind, OperationState};
use crate::store::{OperationStore, StoreError};

pub struct OperationQueue {
    store: Arc<dyn OperationStore>,
    /// Always sorted by `enqueued_at`.
    ops: Vec<Operation>,
}

impl OperationQueue {
    /// Rebuilds the queue from the store's contents.
    pub async fn load(store: Arc<dyn OperationStore>) -> Result<Self, StoreError> {
        let mut ops = store.load_all().await?;

        // Stable sort keeps store order for identical timestamps
        ops.sort_by_key(|op| op.enqueued_at);

        let mut seen = HashSet::new();
        ops.retain(|op| {
            let fresh = seen.insert(op.id);
            if !fresh {
                tracing::warn!("queue: dropping duplicate record for operation {}", op.id);
            }
            fresh
        });

        tracing::debug!("queue: loaded {} operation(s)", ops.len());
        Ok(Self { store, ops })
    }

    /// Appends a new pending operation and returns its id.
    ///
    /// Returns only after the store has durably recorded it.
    pub async fn enqueue(
        &mut self,
        kind: OperationKind,
        resource: impl Into<String>,
        payload: Value,
    ) -> Result<OperationId, StoreError> {
        self.enqueue_with_id(OperationId::new(), kind, resource, payload)
            .await
    }

    /// Appends a new pending operation under a caller-chosen id.
    ///
    /// Used when an online attempt already sent this id as its idempotency
    /// key. An id that is already queued is left untouched.
    pub async fn enqueue_with_id(
        &mut self,
        id: OperationId,
        kind: OperationKind,
        resource: impl Into<String>,
        payload: Value,
    ) -> Result<OperationId, StoreError> {
        if self.contains(&id) {
            return Ok(id);
        }

        let op = Operation::new(kind, resource, payload)
            .with_id(id)
            .with_enqueued_at(self.next_timestamp());

        self.store.put(&op).await?;
        tracing::debug!("queue: enqueued {} {} {}", op.id, op.kind, op.resource);
        self.ops.push(op);
        Ok(id)
    }

    /// Appends an operation whose first delivery attempt already failed.
    ///
    /// The attempt counts toward the retry cap: `retry_count` starts at 1
    /// and `terminal` queues it as failed-terminal straight away.
    pub async fn enqueue_after_failure(
        &mut self,
        id: OperationId,
        kind: OperationKind,
        resource: impl Into<String>,
        payload: Value,
        error: impl Into<String>,
        terminal: bool,
    ) -> Result<Operation, StoreError> {
        if let Some(existing) = self.get(&id) {
            return Ok(existing.clone());
        }

        let mut op = Operation::new(kind, resource, payload)
            .with_id(id)
            .with_enqueued_at(self.next_timestamp());
        op.retry_count = 1;
        op.last_error = Some(error.into());
        if terminal {
            op.state = OperationState::FailedTerminal;
        }

        self.store.put(&op).await?;
        tracing::debug!("queue: enqueued {} after a failed attempt", op.id);
        self.ops.push(op.clone());
        Ok(op)
    }

    /// Strictly increasing timestamps, so enqueue order is recoverable from
    /// the persisted records alone.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.ops.last() {
            Some(last) if now <= last.enqueued_at => last.enqueued_at + Duration::microseconds(1),
            _ => now,
        }
    }

    /// Snapshot of every operation in queue order.
    pub fn peek_ordered(&self) -> Vec<Operation> {
        self.ops.clone()
    }

    /// Snapshot of operations eligible for draining, in queue order.
    pub fn pending(&self) -> Vec<Operation> {
        self.ops.iter().filter(|op| op.is_pending()).cloned().collect()
    }

    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.ops.iter().find(|op| op.id == *id)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_pending()).count()
    }

    pub fn failed_terminal_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_failed_terminal()).count()
    }

    fn position(&self, id: &OperationId) -> Option<usize> {
        self.ops.iter().position(|op| op.id == *id)
    }

    /// Deletes a delivered operation.
    ///
    /// Returns `false` if the operation is no longer queued (removed while
    /// its delivery was in flight); nothing is written in that case.
    pub async fn mark_succeeded(&mut self, id: &OperationId) -> Result<bool, StoreError> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };

        self.store.delete(id).await?;
        self.ops.remove(index);
        Ok(true)
    }

    /// Records a failed attempt.
    ///
    /// Every attempt increments `retry_count`. A terminal failure also moves
    /// the operation to `FailedTerminal`, which excludes it from draining.
    /// Returns the updated operation, or `None` if it is no longer queued.
    pub async fn mark_failed(
        &mut self,
        id: &OperationId,
        error: impl Into<String>,
        terminal: bool,
    ) -> Result<Option<Operation>, StoreError> {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };

        let mut updated = self.ops[index].clone();
        updated.retry_count = updated.retry_count.saturating_add(1);
        updated.last_error = Some(error.into());
        if terminal {
            updated.state = OperationState::FailedTerminal;
        }

        self.store.put(&updated).await?;
        self.ops[index] = updated.clone();
        Ok(Some(updated))
    }

    /// Returns a failed-terminal operation to `Pending` on explicit request.
    ///
    /// `retry_count` is kept; the operation gets one more attempt before the
    /// retry cap applies again. Returns `false` if the id is not queued or
    /// is already pending.
    pub async fn retry_failed(&mut self, id: &OperationId) -> Result<bool, StoreError> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };
        if self.ops[index].is_pending() {
            return Ok(false);
        }

        let mut updated = self.ops[index].clone();
        updated.state = OperationState::Pending;

        self.store.put(&updated).await?;
        self.ops[index] = updated;
        Ok(true)
    }

    /// Explicit deletion of one operation, regardless of its state.
    pub async fn remove_one(&mut self, id: &OperationId) -> Result<bool, StoreError> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };

        self.store.delete(id).await?;
        self.ops.remove(index);
        Ok(true)
    }

    /// Explicit deletion of everything. Returns how many operations were dropped.
    pub async fn clear_all(&mut self) -> Result<usize, StoreError> {
        self.store.clear().await?;
        let count = self.ops.len();
        self.ops.clear();
        Ok(count)
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("len", &self.ops.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
