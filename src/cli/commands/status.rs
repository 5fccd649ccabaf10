//! Run history and service availability commands.

use console::style;

use crate::config::Settings;
use crate::llm::LlmClient;
use crate::storage::RunLogStore;

/// Show recent runs, oldest first.
pub async fn cmd_runs(settings: &Settings, limit: usize) -> anyhow::Result<()> {
    let runs = RunLogStore::new(&settings.logs_path).recent(limit).await?;

    if runs.is_empty() {
        println!("{} No runs recorded yet", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<10} {:>9} {:>9} {:>7} {:>7}  {}",
        "STARTED", "KIND", "DAY", "ATTEMPTED", "SUCCEEDED", "FAILED", "SKIPPED", "RESULT"
    );
    println!("{}", "-".repeat(100));
    for run in &runs {
        let result = match run.error {
            Some(ref e) => style(e.clone()).red(),
            None => style("ok".to_string()).green(),
        };
        println!(
            "{:<20} {:<10} {:<10} {:>9} {:>9} {:>7} {:>7}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.kind.as_str(),
            run.day,
            run.attempted,
            run.succeeded,
            run.failed,
            run.skipped,
            result
        );
    }
    Ok(())
}

/// Check that the analysis service answers.
pub async fn cmd_check(settings: &Settings) -> anyhow::Result<()> {
    let config = &settings.llm;
    if !config.enabled {
        println!(
            "{} Log analysis is disabled in configuration",
            style("!").yellow()
        );
        return Ok(());
    }

    let client = LlmClient::new(config.clone())?;
    if client.is_available().await {
        println!(
            "{} Connected to {} at {} (model: {})",
            style("✓").green(),
            config.provider.as_str(),
            config.endpoint,
            config.model
        );
        Ok(())
    } else {
        println!(
            "{} Analysis service not available at {}",
            style("✗").red(),
            config.endpoint
        );
        if config.provider == crate::llm::LlmProvider::Ollama {
            println!("  Make sure Ollama is running: ollama serve");
        }
        anyhow::bail!("analysis service unreachable")
    }
}
