use chrono::Local;
use clap::Args;
use fieldsync_core::Operation;

use super::{open_engine, runtime, CommandError, Connectivity, OutputFormat};
use crate::config::Config;

/// List queued operations in delivery order
#[derive(Args)]
pub struct ListCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only show operations that failed terminally
    #[arg(long)]
    pub failed: bool,
}

impl ListCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let rt = runtime()?;
        let ops = rt.block_on(async {
            let engine = open_engine(config, Connectivity::Offline).await?;
            Ok::<_, CommandError>(engine.operations().await)
        })?;

        let ops: Vec<Operation> = ops
            .into_iter()
            .filter(|op| !self.failed || op.is_failed_terminal())
            .collect();

        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&ops)
                    .map_err(|e| CommandError::InvalidInput(e.to_string()))?;
                println!("{}", json);
            }
            OutputFormat::Text => {
                if ops.is_empty() {
                    println!("No queued operations.");
                    return Ok(());
                }
                for op in &ops {
                    println!("{}", format_operation(op));
                }
                println!("\nTotal: {} operation(s)", ops.len());
            }
        }
        Ok(())
    }
}

fn format_operation(op: &Operation) -> String {
    let enqueued = op.enqueued_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let mut line = format!(
        "{}  {:15}  {:6} {}  (enqueued {}, {} retr{})",
        op.id,
        op.state.as_str(),
        op.kind,
        op.resource,
        enqueued,
        op.retry_count,
        if op.retry_count == 1 { "y" } else { "ies" }
    );
    if let Some(error) = &op.last_error {
        line.push_str(&format!("\n    last error: {}", error));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::OperationKind;
    use serde_json::json;

    #[test]
    fn test_format_operation() {
        let mut op = Operation::new(OperationKind::Update, "order", json!({}));
        let line = format_operation(&op);
        assert!(line.contains("pending"));
        assert!(line.contains("update"));
        assert!(line.contains("order"));
        assert!(line.contains("0 retries"));
        assert!(!line.contains("last error"));

        op.retry_count = 1;
        op.last_error = Some("server returned 503".to_string());
        let line = format_operation(&op);
        assert!(line.contains("1 retry)"));
        assert!(line.ends_with("last error: server returned 503"));
    }
}
