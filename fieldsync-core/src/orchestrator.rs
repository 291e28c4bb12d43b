//! Drains the operation queue against the transport.
//!
//! A drain runs one or more passes. A pass snapshots the pending operations
//! and delivers them one at a time, in queue order, recording each outcome
//! before the next operation starts. Only one drain runs at a time; callers
//! that arrive mid-drain wait for it and share its result unless new work
//! showed up while it ran.
//!
//! There are no timers. Retries happen on the next trigger: a reconnect, a
//! manual `sync_now`, or an enqueue while online.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::network::NetworkMonitor;
use crate::operation::{Operation, OperationId, OperationKind};
use crate::queue::OperationQueue;
use crate::store::StoreError;
use crate::subscription::{ListenerSet, Subscription};
use crate::transport::{Delivery, ErrorClass, Transport};

/// Progress of the current pass. Observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: bool,
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Draining,
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Every pass ran over its whole snapshot.
    Completed,
    /// Offline at the start; nothing was attempted.
    Offline,
    /// Connectivity dropped mid-pass; the rest of the snapshot is untouched.
    Interrupted,
    /// Stopped at a retryable failure (`halt_on_retryable_failure`).
    Halted,
    /// Arrived while another drain ran; this is that drain's result.
    Coalesced,
    /// Automatic trigger with nothing new since the last pass.
    Skipped,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Completed => "completed",
            SyncStatus::Offline => "offline",
            SyncStatus::Interrupted => "interrupted",
            SyncStatus::Halted => "halted",
            SyncStatus::Coalesced => "coalesced",
            SyncStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Summary of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub status: SyncStatus,
    /// Passes actually run (0 when offline or skipped).
    pub passes: usize,
    /// Transport calls made.
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed attempts, retryable and terminal alike.
    pub failed: usize,
    /// Operations that became failed-terminal during this drain.
    pub terminal: usize,
    /// Pending operations left afterwards.
    pub pending: usize,
    /// Failed-terminal operations left afterwards.
    pub failed_terminal: usize,
}

impl SyncResult {
    fn empty(status: SyncStatus) -> Self {
        Self {
            status,
            passes: 0,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            terminal: 0,
            pending: 0,
            failed_terminal: 0,
        }
    }
}

/// What started a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `sync_now`. Always runs a pass when idle.
    Manual,
    /// Reconnect or enqueue while online. Skipped if nothing changed.
    Automatic,
}

/// Outcome of [`SyncOrchestrator::deliver_direct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectOutcome {
    Delivered,
    /// Queued, either without an attempt or after a retryable failure.
    Queued,
    /// Terminal rejection; nothing was queued.
    Rejected(String),
}

#[derive(Default)]
struct DrainLedger {
    /// Change counter observed when the last pass began.
    last_pass_change: Option<u64>,
    last_result: Option<SyncResult>,
}

pub struct SyncOrchestrator {
    config: EngineConfig,
    queue: Arc<Mutex<OperationQueue>>,
    network: NetworkMonitor,
    transport: Arc<dyn Transport>,
    progress: ListenerSet<SyncProgress>,
    draining: AtomicBool,
    /// Bumped whenever new work may exist: enqueue, explicit retry, reconnect.
    changes: AtomicU64,
    drain: Mutex<DrainLedger>,
}

impl SyncOrchestrator {
    pub fn new(
        config: EngineConfig,
        queue: Arc<Mutex<OperationQueue>>,
        network: NetworkMonitor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            queue,
            network,
            transport,
            progress: ListenerSet::new(),
            draining: AtomicBool::new(false),
            changes: AtomicU64::new(0),
            drain: Mutex::new(DrainLedger::default()),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.draining.load(Ordering::SeqCst) {
            SyncState::Draining
        } else {
            SyncState::Idle
        }
    }

    /// Records that new work may be available.
    pub fn note_change(&self) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }

    fn current_change(&self) -> u64 {
        self.changes.load(Ordering::SeqCst)
    }

    /// Subscribes to progress updates, emitted in transition order.
    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        self.progress.subscribe(callback)
    }

    /// Runs a drain, or joins the one in flight.
    pub async fn sync(&self, trigger: Trigger) -> Result<SyncResult, StoreError> {
        let mut ledger = match self.drain.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("sync: drain in flight, waiting for it");
                let guard = self.drain.lock().await;
                if guard.last_pass_change == Some(self.current_change()) {
                    if let Some(last) = &guard.last_result {
                        let mut result = last.clone();
                        result.status = SyncStatus::Coalesced;
                        return Ok(result);
                    }
                }
                guard
            }
        };

        if trigger == Trigger::Automatic && ledger.last_pass_change == Some(self.current_change()) {
            tracing::debug!("sync: nothing changed since the last pass, skipping");
            let mut result = SyncResult::empty(SyncStatus::Skipped);
            self.fill_counts(&mut result).await;
            return Ok(result);
        }

        self.draining.store(true, Ordering::SeqCst);
        let result = self.run_drain(&mut ledger).await;
        self.draining.store(false, Ordering::SeqCst);

        if let Ok(result) = &result {
            ledger.last_result = Some(result.clone());
        }
        result
    }

    /// Delivers one new operation without queueing it first.
    ///
    /// The attempt holds the drain lock, so it never overlaps a pass. It is
    /// only made while online with nothing pending; otherwise the operation
    /// is queued. A retryable failure queues it with the attempt counted.
    pub async fn deliver_direct(
        &self,
        id: OperationId,
        kind: OperationKind,
        resource: String,
        payload: Value,
    ) -> Result<DirectOutcome, StoreError> {
        if !self.can_deliver_direct().await {
            return self.queue_direct(id, kind, resource, payload).await;
        }

        let _ledger = self.drain.lock().await;
        if !self.can_deliver_direct().await {
            return self.queue_direct(id, kind, resource, payload).await;
        }

        self.draining.store(true, Ordering::SeqCst);
        let delivery = self.transport.perform(&id, kind, &resource, &payload).await;
        self.draining.store(false, Ordering::SeqCst);

        let err = match delivery {
            Ok(_) => return Ok(DirectOutcome::Delivered),
            Err(err) if err.class == ErrorClass::Terminal => {
                return Ok(DirectOutcome::Rejected(err.message));
            }
            Err(err) => err,
        };

        let terminal = self.config.effective_max_retries() <= 1;
        tracing::warn!("sync: direct delivery of {} failed ({}), queueing: {}", id, err.class, err);
        self.queue
            .lock()
            .await
            .enqueue_after_failure(id, kind, resource, payload, err.message, terminal)
            .await?;
        self.note_change();
        Ok(DirectOutcome::Queued)
    }

    async fn can_deliver_direct(&self) -> bool {
        self.network.is_online() && self.queue.lock().await.pending_count() == 0
    }

    async fn queue_direct(
        &self,
        id: OperationId,
        kind: OperationKind,
        resource: String,
        payload: Value,
    ) -> Result<DirectOutcome, StoreError> {
        self.queue
            .lock()
            .await
            .enqueue_with_id(id, kind, resource, payload)
            .await?;
        self.note_change();
        Ok(DirectOutcome::Queued)
    }

    async fn run_drain(&self, ledger: &mut DrainLedger) -> Result<SyncResult, StoreError> {
        let max_passes = 1 + self.config.max_follow_up_passes as usize;
        let mut result = SyncResult::empty(SyncStatus::Completed);

        loop {
            let change_at_start = self.current_change();
            let pass = self.run_pass().await?;

            result.status = pass.status;
            if pass.status == SyncStatus::Offline {
                break;
            }

            ledger.last_pass_change = Some(change_at_start);
            result.passes += 1;
            result.attempted += pass.attempted;
            result.succeeded += pass.succeeded;
            result.failed += pass.failed;
            result.terminal += pass.terminal;

            if pass.status != SyncStatus::Completed
                || result.passes >= max_passes
                || self.current_change() == change_at_start
                || !self.network.is_online()
            {
                break;
            }
            tracing::debug!("sync: new work arrived during the pass, running a follow-up pass");
        }

        self.fill_counts(&mut result).await;
        tracing::info!(
            "sync: {} after {} pass(es): {} delivered, {} failed ({} terminal), {} pending",
            result.status,
            result.passes,
            result.succeeded,
            result.failed,
            result.terminal,
            result.pending
        );
        Ok(result)
    }

    async fn fill_counts(&self, result: &mut SyncResult) {
        let queue = self.queue.lock().await;
        result.pending = queue.pending_count();
        result.failed_terminal = queue.failed_terminal_count();
    }

    async fn run_pass(&self) -> Result<SyncResult, StoreError> {
        if !self.network.is_online() {
            tracing::debug!("sync: offline, nothing attempted");
            return Ok(SyncResult::empty(SyncStatus::Offline));
        }

        let snapshot = self.queue.lock().await.pending();
        let mut progress = SyncProgress {
            total: snapshot.len(),
            completed: 0,
            failed: 0,
            in_progress: true,
        };
        self.progress.emit(&progress);

        let mut pass = SyncResult::empty(SyncStatus::Completed);
        let outcome = self.deliver_all(snapshot, &mut progress, &mut pass).await;

        progress.in_progress = false;
        self.progress.emit(&progress);

        if let Err(e) = &outcome {
            tracing::error!("sync: storage failure during pass: {}", e);
        }
        outcome.map(|_| pass)
    }

    async fn deliver_all(
        &self,
        snapshot: Vec<Operation>,
        progress: &mut SyncProgress,
        pass: &mut SyncResult,
    ) -> Result<(), StoreError> {
        let max_retries = self.config.effective_max_retries();

        for op in snapshot {
            if !self.network.is_online() {
                tracing::info!("sync: went offline mid-pass, stopping");
                pass.status = SyncStatus::Interrupted;
                return Ok(());
            }

            let retry_count = {
                let queue = self.queue.lock().await;
                if queue.is_empty() {
                    tracing::info!("sync: queue cleared mid-pass, stopping");
                    return Ok(());
                }
                match queue.get(&op.id) {
                    Some(current) if current.is_pending() => current.retry_count,
                    _ => continue,
                }
            };

            tracing::debug!(
                "sync: delivering {} {} {} (attempt {})",
                op.id,
                op.kind,
                op.resource,
                retry_count + 1
            );
            pass.attempted += 1;
            let delivery = self
                .transport
                .perform(&op.id, op.kind, &op.resource, &op.payload)
                .await;

            let mut queue = self.queue.lock().await;
            match delivery {
                Ok(delivery) => {
                    if delivery == Delivery::AlreadyApplied {
                        tracing::debug!("sync: {} was already applied by the server", op.id);
                    }
                    if queue.mark_succeeded(&op.id).await? {
                        pass.succeeded += 1;
                        progress.completed += 1;
                    } else {
                        tracing::debug!("sync: {} removed while in flight, result discarded", op.id);
                    }
                }
                Err(err) => {
                    let terminal = match err.class {
                        ErrorClass::Terminal => true,
                        ErrorClass::Retryable | ErrorClass::Unclassified => {
                            retry_count + 1 >= max_retries
                        }
                    };

                    match queue.mark_failed(&op.id, err.message.clone(), terminal).await? {
                        Some(updated) => {
                            pass.failed += 1;
                            progress.failed += 1;
                            if terminal {
                                pass.terminal += 1;
                                tracing::warn!(
                                    "sync: {} failed terminally after {} attempt(s): {}",
                                    op.id,
                                    updated.retry_count,
                                    err
                                );
                            } else {
                                tracing::warn!(
                                    "sync: {} failed ({}), will retry: {}",
                                    op.id,
                                    err.class,
                                    err
                                );
                            }
                        }
                        None => {
                            tracing::debug!(
                                "sync: {} removed while in flight, result discarded",
                                op.id
                            );
                        }
                    }

                    if !terminal && self.config.halt_on_retryable_failure {
                        drop(queue);
                        self.progress.emit(progress);
                        pass.status = SyncStatus::Halted;
                        return Ok(());
                    }
                }
            }
            drop(queue);
            self.progress.emit(progress);
        }

        Ok(())
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
