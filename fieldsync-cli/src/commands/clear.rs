use clap::Args;

use super::{open_engine, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Drop every queued operation
#[derive(Args)]
pub struct ClearCommand {
    /// Confirm dropping the queue
    #[arg(long)]
    pub yes: bool,
}

impl ClearCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Offline).await?;

            if !self.yes {
                let count = engine.operations().await.len();
                println!(
                    "This drops {} queued operation(s) without delivering them.",
                    count
                );
                println!("Re-run with --yes to confirm.");
                return Ok(());
            }

            let removed = engine.clear_all().await?;
            println!("Cleared {} operation(s).", removed);
            Ok(())
        })
    }
}
