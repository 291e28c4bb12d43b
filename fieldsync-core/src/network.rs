//! Connectivity tracking.
//!
//! [`NetworkMonitor`] holds the current "online" snapshot and notifies
//! subscribers on transitions. The signal is a heuristic (a captive portal
//! or a down server still reads as online), so the engine only ever uses it
//! as a trigger to attempt a pass.
//!
//! [`HealthProbe`] is one way to feed the monitor: it polls the sync
//! server's `/health` endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::subscription::{ListenerSet, Subscription};
use crate::transport::build_http_url;

/// Timeout for a single health check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

struct MonitorInner {
    state: watch::Sender<bool>,
    listeners: ListenerSet<bool>,
    /// Held across a state change and its notification.
    transition: Mutex<()>,
}

/// Shared handle to the current connectivity state. Cloning is cheap.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                listeners: ListenerSet::new(),
                transition: Mutex::new(()),
            }),
        }
    }

    /// Current snapshot.
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Records the platform's connectivity signal.
    ///
    /// Listeners run synchronously, only when the value actually changes,
    /// and see transitions in the order they happened even when several
    /// threads report at once. A listener must not call `set_online`.
    pub fn set_online(&self, online: bool) {
        let _transition = match self.inner.transition.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("network: online");
            } else {
                tracing::info!("network: offline");
            }
            self.inner.listeners.emit(&online);
        }
    }

    /// Registers a transition callback. Callbacks must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(move |online| callback(*online))
    }

    /// Waits for the next transition and returns the new state.
    pub async fn changed(&self) -> bool {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.changed().await;
        let online = *rx.borrow();
        online
    }

    /// Waits until the monitor reports `online`.
    pub async fn wait_for(&self, online: bool) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|current| *current == online).await;
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Checks reachability of a sync server through its health endpoint.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    url: String,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(server_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            url: build_http_url(server_url, "/health"),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true if the server answered with a success status.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("health check to {} failed: {}", self.url, e);
                false
            }
        }
    }

    /// Checks once and records the result on `monitor`.
    pub async fn update(&self, monitor: &NetworkMonitor) -> bool {
        let online = self.check().await;
        monitor.set_online(online);
        online
    }

    /// Polls every `interval` in a background task until the handle is aborted.
    pub fn spawn(self, monitor: NetworkMonitor, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.update(&monitor).await;
            }
        })
    }
}
