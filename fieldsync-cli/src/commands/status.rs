use clap::Args;

use super::{open_engine, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Show queue counts and server reachability
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Probe).await?;

            println!("Sync Status");
            println!("===========");
            println!();

            match &config.sync.server_url {
                Some(url) if config.sync.is_configured() => {
                    println!("Server:        {}", url);
                    let reachable = if engine.network().is_online() {
                        "✓ reachable"
                    } else {
                        "✗ unreachable"
                    };
                    println!("Server status: {}", reachable);
                }
                _ => {
                    println!("Server:        not configured");
                }
            }
            println!(
                "Auto-sync:     {}",
                if config.engine.auto_sync {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();

            println!("Pending:         {}", engine.pending_count().await);
            println!("Failed (final):  {}", engine.failed_terminal_count().await);
            println!("Max retries:     {}", config.engine.effective_max_retries());

            Ok(())
        })
    }
}
