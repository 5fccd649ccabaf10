//! Log ingestion command.

use std::path::Path;

use console::style;
use tokio::io::AsyncReadExt;

use crate::config::Settings;
use crate::models::IncomingLog;
use crate::services::LogCollector;
use crate::storage::DailyStore;

/// Collect logs from a JSON file (array or single object), or stdin for "-".
pub async fn cmd_collect(settings: &Settings, input: &Path) -> anyhow::Result<()> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", input.display(), e))?
    };

    let logs = parse_incoming(&content)?;
    let collector = LogCollector::new(
        DailyStore::new(&settings.logs_path),
        settings.max_logs_per_request,
    );

    match collector.collect_detailed(logs).await {
        Ok(report) => {
            for (day, count) in &report.per_day {
                println!("  {} {}: {} logs", style("✓").green(), day, count);
            }
            println!(
                "{} Collected {} logs",
                style("✓").green(),
                report.total()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} Batch rejected: {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}

fn parse_incoming(content: &str) -> anyhow::Result<Vec<IncomingLog>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        let log: IncomingLog = serde_json::from_str(content)?;
        Ok(vec![log])
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_and_single() {
        let logs = parse_incoming(
            r#"[{"timestamp":"2024-01-15T10:00:00Z","source":"api","message":"x"},{"id":"k","timestamp":"2024-01-15T11:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].id.as_deref(), Some("k"));

        let single = parse_incoming(r#"  {"message":"no timestamp"}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert!(single[0].timestamp.is_none());
    }
}
