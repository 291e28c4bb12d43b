use clap::Args;
use fieldsync_core::SyncEngine;

use super::{open_engine, parse_id, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Give failed operations another delivery attempt
#[derive(Args)]
pub struct RetryCommand {
    /// Operation ID (UUID)
    #[arg(required_unless_present = "all")]
    pub id: Option<String>,

    /// Retry every failed operation
    #[arg(long, conflicts_with = "id")]
    pub all: bool,
}

impl RetryCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Offline).await?;
            let retried = self.retry(&engine).await?;

            if retried == 0 {
                println!("No failed operations to retry.");
            } else {
                println!("Marked {} operation(s) for retry.", retried);
                println!("Run 'fsync sync' to deliver them.");
            }
            Ok(())
        })
    }

    async fn retry(&self, engine: &SyncEngine) -> Result<usize, CommandError> {
        let ids = match &self.id {
            Some(id) => vec![parse_id(id)?],
            None => engine
                .operations()
                .await
                .into_iter()
                .filter(|op| op.is_failed_terminal())
                .map(|op| op.id)
                .collect(),
        };

        let mut retried = 0;
        for id in ids {
            if engine.retry_failed(&id).await? {
                retried += 1;
            }
        }
        Ok(retried)
    }
}
