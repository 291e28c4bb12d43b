//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::operation::{OperationId, OperationKind};
use crate::transport::{Delivery, Transport, TransportError};

type Outcome = Result<Delivery, TransportError>;

/// Pauses one transport call until released.
#[derive(Default)]
pub(crate) struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Waits until the paused call has started.
    pub(crate) async fn reached(&self) {
        self.reached.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<(OperationId, String)>,
    outcomes: HashMap<String, VecDeque<Outcome>>,
    always: HashMap<String, TransportError>,
    gate: Option<(String, Arc<Gate>)>,
    on_call: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

/// Transport with per-resource scripted outcomes. Anything unscripted is
/// applied.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next call for `resource`.
    pub(crate) fn respond(&self, resource: &str, outcome: Outcome) {
        self.script
            .lock()
            .unwrap()
            .outcomes
            .entry(resource.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Every call for `resource` fails with `error`.
    pub(crate) fn fail_always(&self, resource: &str, error: TransportError) {
        self.script
            .lock()
            .unwrap()
            .always
            .insert(resource.to_string(), error);
    }

    /// Pauses the next call for `resource` until the gate is released.
    pub(crate) fn pause_on(&self, resource: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.script.lock().unwrap().gate = Some((resource.to_string(), gate.clone()));
        gate
    }

    /// Runs `hook` at the start of each call, before its outcome is
    /// decided.
    pub(crate) fn on_call<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.script.lock().unwrap().on_call = Some(Arc::new(hook));
    }

    pub(crate) fn call_count(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    pub(crate) fn resources(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    pub(crate) fn keys(&self) -> Vec<OperationId> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn perform(
        &self,
        idempotency_key: &OperationId,
        _kind: OperationKind,
        resource: &str,
        _payload: &Value,
    ) -> Result<Delivery, TransportError> {
        let (hook, gate) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push((*idempotency_key, resource.to_string()));
            let paused = matches!(&script.gate, Some((r, _)) if r == resource);
            let gate = if paused {
                script.gate.take().map(|(_, g)| g)
            } else {
                None
            };
            (script.on_call.clone(), gate)
        };

        if let Some(hook) = hook {
            hook(resource);
        }
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.always.get(resource) {
            return Err(error.clone());
        }
        script
            .outcomes
            .get_mut(resource)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(Delivery::Applied))
    }
}
