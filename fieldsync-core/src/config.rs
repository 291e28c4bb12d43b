//! Engine policy settings.

use serde::{Deserialize, Serialize};

/// Default number of failed attempts before an operation turns terminal.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of follow-up passes a single drain may chain.
pub const DEFAULT_MAX_FOLLOW_UP_PASSES: u32 = 1;

/// Engine policy, loadable from a config file section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Failed attempts after which an operation becomes failed-terminal.
    pub max_retries: u32,
    /// Extra passes a drain may run when new work arrives mid-pass.
    pub max_follow_up_passes: u32,
    /// Drain automatically on reconnect and on enqueue while online.
    pub auto_sync: bool,
    /// Stop a pass at the first retryable failure instead of moving on,
    /// so nothing behind a failing operation is attempted.
    pub halt_on_retryable_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_follow_up_passes: DEFAULT_MAX_FOLLOW_UP_PASSES,
            auto_sync: true,
            halt_on_retryable_failure: false,
        }
    }
}

impl EngineConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    pub fn with_halt_on_retryable_failure(mut self, halt: bool) -> Self {
        self.halt_on_retryable_failure = halt;
        self
    }

    /// A retry cap of zero would make every operation terminal before its
    /// first attempt; treat it as one attempt.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }
}
