mod clear;
mod config_cmd;
mod enqueue;
mod list;
mod remove;
mod retry;
mod status;
mod sync_cmd;

pub use clear::ClearCommand;
pub use config_cmd::ConfigCommand;
pub use enqueue::{EnqueueCommand, SubmitCommand};
pub use list::ListCommand;
pub use remove::RemoveCommand;
pub use retry::RetryCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use fieldsync_core::{
    EngineError, HealthProbe, HttpTransport, NetworkMonitor, OperationId, SqliteStore,
    StoreError, SyncEngine,
};
use std::sync::Arc;

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Connectivity for a command run.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Connectivity {
    /// Queue-only commands never touch the network.
    Offline,
    /// Ask the server's health endpoint.
    Probe,
}

/// Opens the queue database and builds an engine over it.
///
/// The CLI process is short-lived, so background draining is disabled and
/// commands that deliver call `sync_now` themselves.
pub async fn open_engine(
    config: &Config,
    connectivity: Connectivity,
) -> Result<SyncEngine, CommandError> {
    let store = SqliteStore::open(&config.database_path.value).await?;
    let network = NetworkMonitor::new(false);

    let server_url = config.sync.server_url.clone().unwrap_or_default();
    let api_key = config.sync.api_key.clone().unwrap_or_default();

    if connectivity == Connectivity::Probe && config.sync.is_configured() {
        HealthProbe::new(&server_url).update(&network).await;
    }

    let transport = HttpTransport::new(server_url, api_key);
    let engine = SyncEngine::open(
        config.engine.clone().with_auto_sync(false),
        Arc::new(store),
        network,
        Arc::new(transport),
    )
    .await?;

    Ok(engine)
}

pub fn runtime() -> Result<tokio::runtime::Runtime, CommandError> {
    tokio::runtime::Runtime::new().map_err(|e| CommandError::RuntimeError(e.to_string()))
}

pub fn parse_id(id: &str) -> Result<OperationId, CommandError> {
    id.parse()
        .map_err(|_| CommandError::InvalidInput(format!("Invalid operation ID: {}", id)))
}

/// Errors from queue commands
#[derive(Debug)]
pub enum CommandError {
    EngineError(EngineError),
    InvalidInput(String),
    NotConfigured,
    RuntimeError(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::EngineError(e) => write!(f, "{}", e),
            CommandError::InvalidInput(msg) => write!(f, "{}", msg),
            CommandError::NotConfigured => write!(
                f,
                "Sync not configured. Set sync.server_url and sync.api_key in the config file, \
                 or FSYNC_SERVER_URL and FSYNC_API_KEY"
            ),
            CommandError::RuntimeError(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::EngineError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        CommandError::EngineError(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::EngineError(EngineError::Storage(e))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue, SyncConfig};
    use fieldsync_core::EngineConfig;
    use std::path::Path;

    pub fn offline_config(dir: &Path) -> Config {
        Config {
            database_path: ConfigValue::new(dir.join("queue.db"), ConfigSource::Default),
            config_file: None,
            sync: SyncConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}
