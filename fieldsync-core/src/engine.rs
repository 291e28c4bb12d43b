//! The engine facade.
//!
//! A [`SyncEngine`] is constructed once by the host application and shared
//! by handle (it is cheap to clone). It owns the queue, the orchestrator and
//! a background task that drains the queue when connectivity returns or
//! when work is enqueued while online.

use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::network::NetworkMonitor;
use crate::operation::{Operation, OperationId, OperationKind};
use crate::orchestrator::{
    DirectOutcome, SyncOrchestrator, SyncProgress, SyncResult, SyncState, Trigger,
};
use crate::queue::OperationQueue;
use crate::store::OperationStore;
use crate::subscription::Subscription;
use crate::transport::Transport;

/// Outcome of [`SyncEngine::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Delivered immediately.
    Delivered(OperationId),
    /// Durably queued for a later pass.
    Queued(OperationId),
}

impl Submission {
    pub fn id(&self) -> OperationId {
        match self {
            Submission::Delivered(id) | Submission::Queued(id) => *id,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    queue: Arc<Mutex<OperationQueue>>,
    orchestrator: Arc<SyncOrchestrator>,
    network: NetworkMonitor,
    trigger: mpsc::Sender<()>,
    _network_subscription: Subscription,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Loads the queue from `store` and starts the background drain task.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(
        config: EngineConfig,
        store: Arc<dyn OperationStore>,
        network: NetworkMonitor,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        let queue = Arc::new(Mutex::new(OperationQueue::load(store).await?));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.clone(),
            queue.clone(),
            network.clone(),
            transport,
        ));

        // Capacity 1: a trigger that finds one already waiting is coalesced
        let (trigger, receiver) = mpsc::channel(1);
        spawn_drain_task(Arc::downgrade(&orchestrator), receiver);

        let network_subscription = {
            let orchestrator = Arc::downgrade(&orchestrator);
            let trigger = trigger.clone();
            let auto_sync = config.auto_sync;
            network.subscribe(move |online| {
                if !online {
                    return;
                }
                if let Some(orchestrator) = orchestrator.upgrade() {
                    orchestrator.note_change();
                }
                if auto_sync {
                    let _ = trigger.try_send(());
                }
            })
        };

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                queue,
                orchestrator,
                network,
                trigger,
                _network_subscription: network_subscription,
            }),
        };

        let pending = engine.pending_count().await;
        tracing::info!("engine: opened with {} pending operation(s)", pending);
        if pending > 0 {
            engine.request_sync();
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    /// Durably queues an operation and returns its id.
    ///
    /// Fails only when the store cannot confirm the write. When online, a
    /// drain is requested in the background; its outcome does not affect
    /// this call.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        resource: impl Into<String>,
        payload: Value,
    ) -> Result<OperationId, EngineError> {
        let id = self
            .inner
            .queue
            .lock()
            .await
            .enqueue(kind, resource, payload)
            .await?;

        self.inner.orchestrator.note_change();
        self.request_sync();
        Ok(id)
    }

    /// Delivers directly when online with nothing queued ahead, otherwise
    /// queues.
    ///
    /// The direct attempt is serialized with sync passes. A retryable
    /// failure falls back to queueing under the same id, with the attempt
    /// counted toward the retry cap, so a delivery whose response was lost
    /// is deduplicated by the server on replay. A terminal rejection is
    /// returned and nothing is queued.
    pub async fn submit(
        &self,
        kind: OperationKind,
        resource: impl Into<String>,
        payload: Value,
    ) -> Result<Submission, EngineError> {
        let id = OperationId::new();
        match self
            .inner
            .orchestrator
            .deliver_direct(id, kind, resource.into(), payload)
            .await?
        {
            DirectOutcome::Delivered => Ok(Submission::Delivered(id)),
            DirectOutcome::Queued => Ok(Submission::Queued(id)),
            DirectOutcome::Rejected(message) => Err(EngineError::Rejected(message)),
        }
    }

    /// Drains the queue now, or joins the drain already running.
    ///
    /// Offline, this makes no transport calls and leaves the queue as is.
    pub async fn sync_now(&self) -> Result<SyncResult, EngineError> {
        Ok(self.inner.orchestrator.sync(Trigger::Manual).await?)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.lock().await.pending_count()
    }

    pub async fn failed_terminal_count(&self) -> usize {
        self.inner.queue.lock().await.failed_terminal_count()
    }

    /// Every queued operation (pending and failed-terminal) in queue order.
    pub async fn operations(&self) -> Vec<Operation> {
        self.inner.queue.lock().await.peek_ordered()
    }

    pub async fn get(&self, id: &OperationId) -> Option<Operation> {
        self.inner.queue.lock().await.get(id).cloned()
    }

    /// Drops every queued operation. Returns how many were removed.
    ///
    /// An operation already in flight completes, but its result is
    /// discarded.
    pub async fn clear_all(&self) -> Result<usize, EngineError> {
        let removed = self.inner.queue.lock().await.clear_all().await?;
        tracing::info!("engine: cleared {} operation(s)", removed);
        Ok(removed)
    }

    /// Drops one operation regardless of its state.
    pub async fn remove(&self, id: &OperationId) -> Result<(), EngineError> {
        if self.inner.queue.lock().await.remove_one(id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(*id))
        }
    }

    /// Gives a failed-terminal operation another attempt.
    ///
    /// Returns `false` if it was already pending.
    pub async fn retry_failed(&self, id: &OperationId) -> Result<bool, EngineError> {
        let retried = {
            let mut queue = self.inner.queue.lock().await;
            if !queue.contains(id) {
                return Err(EngineError::NotFound(*id));
            }
            queue.retry_failed(id).await?
        };

        if retried {
            self.inner.orchestrator.note_change();
            self.request_sync();
        }
        Ok(retried)
    }

    /// Subscribes to per-pass progress. Callbacks run synchronously after
    /// each transition and must not block.
    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        self.inner.orchestrator.on_progress(callback)
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.orchestrator.state()
    }

    /// Fire-and-forget drain request.
    fn request_sync(&self) {
        if self.inner.config.auto_sync && self.inner.network.is_online() {
            let _ = self.inner.trigger.try_send(());
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("network", &self.inner.network)
            .field("state", &self.sync_state())
            .finish()
    }
}

/// Runs automatic drains until every trigger sender is gone.
fn spawn_drain_task(orchestrator: Weak<SyncOrchestrator>, mut receiver: mpsc::Receiver<()>) {
    tokio::spawn(async move {
        while receiver.recv().await.is_some() {
            let Some(orchestrator) = orchestrator.upgrade() else {
                break;
            };
            if let Err(e) = orchestrator.sync(Trigger::Automatic).await {
                tracing::error!("engine: background sync failed: {}", e);
            }
        }
        tracing::debug!("engine: background sync task stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SyncStatus;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::testing::ScriptedTransport;
    use crate::transport::{Delivery, TransportError};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    async fn open_engine(
        store: Arc<dyn OperationStore>,
        online: bool,
        transport: Arc<ScriptedTransport>,
    ) -> SyncEngine {
        SyncEngine::open(
            EngineConfig::default().with_auto_sync(false),
            store,
            NetworkMonitor::new(online),
            transport,
        )
        .await
        .unwrap()
    }

    async fn wait_for_drain(engine: &SyncEngine) {
        for _ in 0..200 {
            if engine.pending_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue was not drained in time");
    }

    #[tokio::test]
    async fn test_enqueued_operations_survive_restart() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());

        let id = {
            let engine = open_engine(store.clone(), false, transport.clone()).await;
            engine
                .enqueue(OperationKind::Create, "visit", json!({"store": 7}))
                .await
                .unwrap()
        };

        let engine = open_engine(store, false, transport).await;
        let ops = engine.operations().await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, id);
        assert_eq!(ops[0].retry_count, 0);
        assert_eq!(ops[0].payload, json!({"store": 7}));
    }

    #[tokio::test]
    async fn test_enqueued_operations_survive_restart_on_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("queue.db");
        let transport = Arc::new(ScriptedTransport::new());

        {
            let store = Arc::new(SqliteStore::open(&path).await.unwrap());
            let engine = open_engine(store.clone(), false, transport.clone()).await;
            for resource in ["visit", "order", "mileage"] {
                engine
                    .enqueue(OperationKind::Create, resource, json!({}))
                    .await
                    .unwrap();
            }
            store.pool().close().await;
        }

        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        let engine = open_engine(store, false, transport).await;
        let resources: Vec<String> = engine
            .operations()
            .await
            .into_iter()
            .map(|op| op.resource)
            .collect();
        assert_eq!(resources, vec!["visit", "order", "mileage"]);
    }

    #[tokio::test]
    async fn test_enqueue_fails_on_storage_failure() {
        let store = Arc::new(MemoryStore::new());
        let engine = open_engine(store.clone(), false, Arc::new(ScriptedTransport::new())).await;
        store.set_unavailable(true);

        let err = engine
            .enqueue(OperationKind::Create, "photo", json!({}))
            .await
            .unwrap_err();

        assert!(err.is_storage());
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_operations_delivered_in_enqueue_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), false, transport.clone()).await;

        for resource in ["a", "b", "c", "d"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }
        engine.network().set_online(true);
        let result = engine.sync_now().await.unwrap();

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.succeeded, 4);
        assert_eq!(transport.resources(), vec!["a", "b", "c", "d"]);
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_operation_id() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let id = engine
            .enqueue(OperationKind::Update, "order", json!({}))
            .await
            .unwrap();
        engine.sync_now().await.unwrap();

        assert_eq!(transport.keys(), vec![id]);
    }

    #[tokio::test]
    async fn test_halt_policy_blocks_operations_behind_a_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("a", Err(TransportError::retryable("503")));
        let engine = SyncEngine::open(
            EngineConfig::default()
                .with_auto_sync(false)
                .with_halt_on_retryable_failure(true),
            Arc::new(MemoryStore::new()),
            NetworkMonitor::new(true),
            transport.clone(),
        )
        .await
        .unwrap();

        engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();
        engine
            .enqueue(OperationKind::Update, "b", json!({}))
            .await
            .unwrap();

        let result = engine.sync_now().await.unwrap();
        assert_eq!(result.status, SyncStatus::Halted);
        assert_eq!(transport.resources(), vec!["a"]);

        // Next pass: a succeeds, then b goes
        let result = engine.sync_now().await.unwrap();
        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(transport.resources(), vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn test_succeeded_operation_never_reappears() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());

        {
            let engine = open_engine(store.clone(), true, transport.clone()).await;
            engine
                .enqueue(OperationKind::Create, "visit", json!({}))
                .await
                .unwrap();
            engine.sync_now().await.unwrap();
        }

        let engine = open_engine(store, true, transport.clone()).await;
        assert!(engine.operations().await.is_empty());
        engine.sync_now().await.unwrap();
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_response_replay_records_one_success() {
        let transport = Arc::new(ScriptedTransport::new());
        // First delivery reaches the server but the response is lost
        transport.respond("order", Err(TransportError::retryable("connection reset")));
        transport.respond("order", Ok(Delivery::AlreadyApplied));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let id = engine
            .enqueue(OperationKind::Create, "order", json!({"sku": "A-1"}))
            .await
            .unwrap();

        let first = engine.sync_now().await.unwrap();
        assert_eq!((first.succeeded, first.failed), (0, 1));

        let second = engine.sync_now().await.unwrap();
        assert_eq!((second.succeeded, second.failed), (1, 0));

        assert_eq!(transport.keys(), vec![id, id]);
        assert!(engine.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_failures_turn_terminal_at_cap() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always("photo", TransportError::retryable("timeout"));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let id = engine
            .enqueue(OperationKind::Create, "photo", json!({}))
            .await
            .unwrap();

        for attempt in 1..=3u32 {
            let result = engine.sync_now().await.unwrap();
            assert_eq!(result.failed, 1);
            assert_eq!(engine.get(&id).await.unwrap().retry_count, attempt);
        }

        let op = engine.get(&id).await.unwrap();
        assert!(op.is_failed_terminal());
        assert_eq!(op.last_error.as_deref(), Some("timeout"));

        let result = engine.sync_now().await.unwrap();
        assert_eq!(result.attempted, 0);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unclassified_errors_are_retried_until_cap() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always("visit", TransportError::unclassified("???"));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        let id = engine
            .enqueue(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();

        engine.sync_now().await.unwrap();
        assert!(engine.get(&id).await.unwrap().is_pending());
        engine.sync_now().await.unwrap();
        engine.sync_now().await.unwrap();
        assert!(engine.get(&id).await.unwrap().is_failed_terminal());
    }

    #[tokio::test]
    async fn test_rejected_operation_is_terminal_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("order", Err(TransportError::terminal("422: quantity missing")));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        engine
            .enqueue(OperationKind::Create, "order", json!({}))
            .await
            .unwrap();
        engine
            .enqueue(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();

        let result = engine.sync_now().await.unwrap();
        assert_eq!(result.terminal, 1);
        assert_eq!(result.succeeded, 1);
        assert_eq!(engine.failed_terminal_count().await, 1);
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_offline_sync_is_a_noop() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), false, transport.clone()).await;
        engine
            .enqueue(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();
        let before = engine.operations().await;

        let result = engine.sync_now().await.unwrap();

        assert_eq!(result.status, SyncStatus::Offline);
        assert_eq!(result.passes, 0);
        assert_eq!(transport.call_count(), 0);
        assert_eq!(engine.operations().await, before);
    }

    #[tokio::test]
    async fn test_offline_then_online_scenario() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always("c", TransportError::retryable("server returned 503"));
        let engine = open_engine(Arc::new(MemoryStore::new()), false, transport.clone()).await;

        for resource in ["a", "b", "c"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }
        assert_eq!(engine.pending_count().await, 3);
        let order: Vec<String> = engine
            .operations()
            .await
            .into_iter()
            .map(|op| op.resource)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        engine.network().set_online(true);
        engine.sync_now().await.unwrap();

        let remaining = engine.operations().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].resource, "c");
        assert_eq!(remaining[0].retry_count, 1);

        for _ in 0..2 {
            engine.network().set_online(false);
            engine.network().set_online(true);
            engine.sync_now().await.unwrap();
        }

        let c = &engine.operations().await[0];
        assert!(c.is_failed_terminal());
        assert_eq!(c.retry_count, 3);
        assert_eq!(engine.pending_count().await, 0);
        assert_eq!(engine.failed_terminal_count().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_mid_pass_stops_remaining() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        {
            let network = engine.network().clone();
            transport.on_call(move |resource| {
                if resource == "a" {
                    network.set_online(false);
                }
            });
        }

        for resource in ["a", "b", "c"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }

        let result = engine.sync_now().await.unwrap();

        assert_eq!(result.status, SyncStatus::Interrupted);
        assert_eq!(transport.resources(), vec!["a"]);
        let remaining = engine.operations().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|op| op.retry_count == 0));
    }

    #[tokio::test]
    async fn test_clear_during_flight_discards_result() {
        let transport = Arc::new(ScriptedTransport::new());
        let gate = transport.pause_on("a");
        let store = Arc::new(MemoryStore::new());
        let engine = open_engine(store.clone(), true, transport.clone()).await;

        for resource in ["a", "b"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };

        gate.reached().await;
        assert_eq!(engine.sync_state(), SyncState::Draining);
        assert_eq!(engine.clear_all().await.unwrap(), 2);
        gate.release();

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.succeeded, 0);
        assert_eq!(transport.resources(), vec!["a"]);
        assert!(store.is_empty());
        assert_eq!(engine.sync_state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_sync_now_is_coalesced() {
        let transport = Arc::new(ScriptedTransport::new());
        let gate = transport.pause_on("a");
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };
        gate.reached().await;

        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        gate.release();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.status, SyncStatus::Completed);
        assert_eq!(second.status, SyncStatus::Coalesced);
        assert_eq!(second.succeeded, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_during_pass_runs_follow_up_pass() {
        let transport = Arc::new(ScriptedTransport::new());
        let gate = transport.pause_on("a");
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };
        gate.reached().await;
        engine
            .enqueue(OperationKind::Create, "b", json!({}))
            .await
            .unwrap();
        gate.release();

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.passes, 2);
        assert_eq!(result.succeeded, 2);
        assert_eq!(transport.resources(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_automatic_trigger_skipped_without_changes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always("a", TransportError::retryable("503"));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();
        engine.sync_now().await.unwrap();

        let result = engine
            .inner
            .orchestrator
            .sync(Trigger::Automatic)
            .await
            .unwrap();

        assert_eq!(result.status, SyncStatus::Skipped);
        assert_eq!(result.pending, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_progress_notifications_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("b", Err(TransportError::retryable("503")));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            engine.on_progress(move |p| seen.lock().unwrap().push(*p))
        };

        for resource in ["a", "b"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }
        engine.sync_now().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        let p = |total, completed, failed, in_progress| SyncProgress {
            total,
            completed,
            failed,
            in_progress,
        };
        assert_eq!(
            seen,
            vec![
                p(2, 0, 0, true),
                p(2, 1, 0, true),
                p(2, 1, 1, true),
                p(2, 1, 1, false),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_drains_automatically() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = SyncEngine::open(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            NetworkMonitor::new(false),
            transport.clone(),
        )
        .await
        .unwrap();

        engine
            .enqueue(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 0);

        engine.network().set_online(true);
        wait_for_drain(&engine).await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_while_online_drains_automatically() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = SyncEngine::open(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            NetworkMonitor::new(true),
            transport.clone(),
        )
        .await
        .unwrap();

        engine
            .enqueue(OperationKind::Create, "order", json!({}))
            .await
            .unwrap();

        wait_for_drain(&engine).await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_online_delivers_directly() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let submission = engine
            .submit(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();

        assert!(matches!(submission, Submission::Delivered(_)));
        assert_eq!(transport.keys(), vec![submission.id()]);
        assert!(engine.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_falls_back_to_queue_with_same_id() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("visit", Err(TransportError::retryable("timeout")));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let submission = engine
            .submit(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();

        assert_eq!(submission, Submission::Queued(submission.id()));
        let queued = engine.get(&submission.id()).await.unwrap();
        assert!(queued.is_pending());
        assert_eq!(queued.retry_count, 1);
        assert_eq!(queued.last_error.as_deref(), Some("timeout"));

        engine.sync_now().await.unwrap();
        assert_eq!(transport.keys(), vec![submission.id(), submission.id()]);
        assert!(engine.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_counts_toward_retry_cap() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always("visit", TransportError::retryable("timeout"));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let submission = engine
            .submit(OperationKind::Create, "visit", json!({}))
            .await
            .unwrap();
        assert!(matches!(submission, Submission::Queued(_)));

        for _ in 0..3 {
            engine.sync_now().await.unwrap();
        }

        assert_eq!(transport.call_count(), 3);
        let op = engine.get(&submission.id()).await.unwrap();
        assert!(op.is_failed_terminal());
        assert_eq!(op.retry_count, 3);
    }

    #[tokio::test]
    async fn test_submit_in_flight_holds_off_sync() {
        let transport = Arc::new(ScriptedTransport::new());
        let gate = transport.pause_on("x");
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;

        let submitting = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(OperationKind::Create, "x", json!({}))
                    .await
            })
        };
        gate.reached().await;
        assert_eq!(engine.sync_state(), SyncState::Draining);

        engine
            .enqueue(OperationKind::Create, "y", json!({}))
            .await
            .unwrap();
        let syncing = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_now().await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.resources(), vec!["x"]);
        gate.release();

        let submission = submitting.await.unwrap().unwrap();
        assert!(matches!(submission, Submission::Delivered(_)));
        let result = syncing.await.unwrap().unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(transport.resources(), vec!["x", "y"]);
        assert!(engine.operations().await.is_empty());
        assert_eq!(engine.sync_state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_storage_failure_mid_pass_reaches_caller() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryStore::new());
        let engine = open_engine(store.clone(), true, transport.clone()).await;
        let a = engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();
        engine
            .enqueue(OperationKind::Create, "b", json!({}))
            .await
            .unwrap();

        let tripped = Arc::new(AtomicBool::new(false));
        {
            let store = store.clone();
            let tripped = tripped.clone();
            transport.on_call(move |resource| {
                if resource == "a" && !tripped.swap(true, Ordering::SeqCst) {
                    store.set_unavailable(true);
                }
            });
        }

        let err = engine.sync_now().await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(engine.sync_state(), SyncState::Idle);
        assert_eq!(transport.resources(), vec!["a"]);
        assert!(engine.get(&a).await.unwrap().is_pending());

        store.set_unavailable(false);
        let result = engine.sync_now().await.unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(transport.keys()[..2], [a, a]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_fails_on_storage_failure() {
        let store = Arc::new(MemoryStore::new());
        let engine = open_engine(store.clone(), false, Arc::new(ScriptedTransport::new())).await;
        for resource in ["a", "b"] {
            engine
                .enqueue(OperationKind::Create, resource, json!({}))
                .await
                .unwrap();
        }

        store.set_unavailable(true);
        assert!(engine.clear_all().await.unwrap_err().is_storage());
        assert_eq!(engine.operations().await.len(), 2);

        store.set_unavailable(false);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_rejection_is_not_queued() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("order", Err(TransportError::terminal("invalid sku")));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport).await;

        let err = engine
            .submit(OperationKind::Create, "order", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Rejected(msg) if msg == "invalid sku"));
        assert!(engine.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_queues_behind_pending_work() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = open_engine(Arc::new(MemoryStore::new()), false, transport.clone()).await;
        engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();
        engine.network().set_online(true);

        let submission = engine
            .submit(OperationKind::Update, "b", json!({}))
            .await
            .unwrap();

        assert!(matches!(submission, Submission::Queued(_)));
        assert_eq!(transport.call_count(), 0);
        engine.sync_now().await.unwrap();
        assert_eq!(transport.resources(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_retry_failed_and_remove() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("a", Err(TransportError::terminal("bad")));
        let engine = open_engine(Arc::new(MemoryStore::new()), true, transport.clone()).await;
        let a = engine
            .enqueue(OperationKind::Create, "a", json!({}))
            .await
            .unwrap();
        let b = engine
            .enqueue(OperationKind::Create, "b", json!({}))
            .await
            .unwrap();
        engine.remove(&b).await.unwrap();
        engine.sync_now().await.unwrap();
        assert_eq!(engine.failed_terminal_count().await, 1);

        assert!(engine.retry_failed(&a).await.unwrap());
        assert!(!engine.retry_failed(&a).await.unwrap());
        engine.sync_now().await.unwrap();
        assert!(engine.operations().await.is_empty());

        assert!(matches!(
            engine.remove(&b).await,
            Err(EngineError::NotFound(id)) if id == b
        ));
        assert!(matches!(
            engine.retry_failed(&a).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
