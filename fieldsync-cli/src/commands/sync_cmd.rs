//! Sync CLI command for draining the queue against the server.

use clap::Args;
use fieldsync_core::{SyncResult, SyncStatus};

use super::{open_engine, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Deliver queued operations to the server
#[derive(Args)]
pub struct SyncCommand {
    /// Print progress for each operation
    #[arg(long, short)]
    pub verbose: bool,
}

impl SyncCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        if !config.sync.is_configured() {
            return Err(CommandError::NotConfigured);
        }

        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Probe).await?;

            let _progress = self.verbose.then(|| {
                engine.on_progress(|p| {
                    if p.in_progress && p.completed + p.failed > 0 {
                        println!(
                            "  [{}/{}] {} delivered, {} failed",
                            p.completed + p.failed,
                            p.total,
                            p.completed,
                            p.failed
                        );
                    }
                })
            });

            println!("Syncing with server...");
            let result = engine.sync_now().await?;
            println!();
            println!("{}", summarize(&result));

            Ok(())
        })
    }
}

fn summarize(result: &SyncResult) -> String {
    match result.status {
        SyncStatus::Offline => format!(
            "Server unreachable. {} operation(s) remain queued.",
            result.pending
        ),
        _ if result.attempted == 0 && result.pending == 0 => {
            let mut summary = "Already up to date.".to_string();
            if result.failed_terminal > 0 {
                summary.push_str(&format!(
                    " {} operation(s) failed terminally; see 'fsync list --failed'.",
                    result.failed_terminal
                ));
            }
            summary
        }
        status => {
            let mut summary = format!(
                "Sync {}: {} delivered, {} failed, {} pending.",
                status, result.succeeded, result.failed, result.pending
            );
            if result.failed_terminal > 0 {
                summary.push_str(&format!(
                    " {} operation(s) failed terminally; see 'fsync list --failed'.",
                    result.failed_terminal
                ));
            }
            summary
        }
    }
}
