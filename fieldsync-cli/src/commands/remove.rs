use clap::Args;

use super::{open_engine, parse_id, runtime, CommandError, Connectivity};
use crate::config::Config;

/// Drop one queued operation without delivering it
#[derive(Args)]
pub struct RemoveCommand {
    /// Operation ID (UUID)
    pub id: String,
}

impl RemoveCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let id = parse_id(&self.id)?;
        let rt = runtime()?;
        rt.block_on(async {
            let engine = open_engine(config, Connectivity::Offline).await?;
            engine.remove(&id).await?;
            println!("Removed operation {}", id);
            Ok(())
        })
    }
}
