use clap::Args;
use fieldsync_core::{OperationKind, Submission, SyncEngine};
use serde_json::Value;

use super::{open_engine, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Arguments describing one operation
#[derive(Args)]
pub struct OperationArgs {
    /// Operation kind (create, update, delete)
    pub kind: OperationKind,

    /// Resource the operation targets (e.g. "visit", "order")
    pub resource: String,

    /// JSON payload
    #[arg(long, short, default_value = "{}")]
    pub payload: String,
}

impl OperationArgs {
    fn parse_payload(&self) -> Result<Value, CommandError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| CommandError::InvalidInput(format!("Invalid JSON payload: {}", e)))
    }
}

/// Queue an operation for later delivery
#[derive(Args)]
pub struct EnqueueCommand {
    #[command(flatten)]
    pub operation: OperationArgs,
}

impl EnqueueCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let payload = self.operation.parse_payload()?;
        let rt = runtime()?;
        rt.block_on(async {
            // Deliver right away when auto-sync is on and the server answers
            let connectivity = if config.engine.auto_sync {
                Connectivity::Probe
            } else {
                Connectivity::Offline
            };
            let engine = open_engine(config, connectivity).await?;

            let id = engine
                .enqueue(
                    self.operation.kind,
                    self.operation.resource.clone(),
                    payload,
                )
                .await?;

            println!(
                "Queued {} {}",
                self.operation.kind, self.operation.resource
            );
            println!("Operation ID: {}", id);

            if engine.network().is_online() {
                auto_sync(&engine).await;
            }
            Ok(())
        })
    }
}

/// Syncs after an enqueue. The operation is already queued, so a failure
/// here is reported and the command still succeeds.
async fn auto_sync(engine: &SyncEngine) -> bool {
    match engine.sync_now().await {
        Ok(result) => {
            println!(
                "Synced: {} delivered, {} failed, {} pending",
                result.succeeded, result.failed, result.pending
            );
            true
        }
        Err(e) => {
            eprintln!("Auto-sync: {}", e);
            false
        }
    }
}

/// Deliver an operation now, queueing it if the server is unreachable
#[derive(Args)]
pub struct SubmitCommand {
    #[command(flatten)]
    pub operation: OperationArgs,
}

impl SubmitCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let payload = self.operation.parse_payload()?;
        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Probe).await?;

            let submission = engine
                .submit(
                    self.operation.kind,
                    self.operation.resource.clone(),
                    payload,
                )
                .await?;

            match submission {
                Submission::Delivered(id) => {
                    println!(
                        "Delivered {} {}",
                        self.operation.kind, self.operation.resource
                    );
                    println!("Operation ID: {}", id);
                }
                Submission::Queued(id) => {
                    println!(
                        "Server unavailable, queued {} {}",
                        self.operation.kind, self.operation.resource
                    );
                    println!("Operation ID: {}", id);
                }
            }
            Ok(())
        })
    }
}
