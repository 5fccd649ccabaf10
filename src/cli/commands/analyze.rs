//! Manual analysis and retry commands.

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use crate::cli::helpers::{
    open_orchestrator, parse_optional_day, progress_style, truncate, utc_today,
};
use crate::config::Settings;
use crate::pipeline::{
    last_complete_day, FailureLedger, PipelineEvent, RetryCoordinator, RetryStatus, RunKind,
};

/// Analyze one day's unanalyzed logs now.
pub async fn cmd_analyze(settings: &Settings, day: Option<&str>) -> anyhow::Result<()> {
    let day = parse_optional_day(day)?
        .unwrap_or_else(|| last_complete_day(chrono::Utc::now()));

    if !settings.llm.enabled {
        println!(
            "{} Log analysis is disabled in configuration",
            style("!").yellow()
        );
        println!("  Set analysis.enabled = true in your errtriage config");
        return Ok(());
    }

    println!(
        "{} Analyzing logs for {} (model: {})",
        style("→").cyan(),
        day,
        settings.llm.model
    );

    let (event_tx, event_rx) = mpsc::channel::<PipelineEvent>(100);
    let orchestrator = open_orchestrator(settings).await?.with_events(event_tx);
    let event_handler = tokio::spawn(render_progress(event_rx));

    let result = orchestrator.run_for_day(day, RunKind::Manual).await;
    drop(orchestrator);
    let _ = event_handler.await;

    let summary = result?;
    if summary.attempted == 0 {
        println!("{} No unanalyzed logs for {}", style("!").yellow(), day);
        return Ok(());
    }

    println!(
        "{} Analysis complete: {} succeeded, {} failed",
        style("✓").green(),
        summary.succeeded,
        summary.failed
    );
    if summary.abandoned > 0 {
        println!(
            "  {} {} logs reached the retry limit and were abandoned",
            style("→").dim(),
            summary.abandoned
        );
    }
    Ok(())
}

/// Run one retry pass over recent failures.
pub async fn cmd_retry(settings: &Settings) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator(settings).await?;
    let retry = RetryCoordinator::new(orchestrator, settings.schedule.max_retry_attempts);
    let pass = retry.run_pass(utc_today()).await;
    if pass.runs.is_empty() && pass.busy_days.is_empty() {
        println!("{} No pending retries", style("✓").green());
    } else {
        println!(
            "{} Retried {} day(s): {} succeeded, {} failed",
            style("✓").green(),
            pass.runs.len(),
            pass.succeeded(),
            pass.failed()
        );
    }
    if pass.expired > 0 {
        println!(
            "  {} {} entries fell outside the retry window",
            style("→").dim(),
            pass.expired
        );
    }
    Ok(())
}

/// List ledger entries.
pub async fn cmd_retry_status(settings: &Settings) -> anyhow::Result<()> {
    let ledger =
        FailureLedger::open(&settings.logs_path, settings.schedule.max_retry_attempts).await?;
    let entries = ledger.entries().await;

    if entries.is_empty() {
        println!("{} No failed analyses on record", style("✓").green());
        return Ok(());
    }

    println!(
        "{:<10} {:<38} {:>8} {:<10} {}",
        "DAY", "ID", "ATTEMPTS", "STATUS", "LAST ERROR"
    );
    println!("{}", "-".repeat(100));
    for entry in &entries {
        let status = match entry.status {
            RetryStatus::Pending => style(entry.status.as_str()).yellow(),
            RetryStatus::Abandoned => style(entry.status.as_str()).red(),
        };
        println!(
            "{:<10} {:<38} {:>8} {:<10} {}",
            entry.day,
            truncate(&entry.id, 38),
            format!("{}/{}", entry.attempts, ledger.max_attempts()),
            status,
            truncate(&entry.last_error, 40)
        );
    }

    let pending = entries
        .iter()
        .filter(|e| e.status == RetryStatus::Pending)
        .count();
    println!();
    println!(
        "{} pending, {} abandoned",
        pending,
        entries.len() - pending
    );
    Ok(())
}

async fn render_progress(mut event_rx: mpsc::Receiver<PipelineEvent>) {
    let mut progress: Option<ProgressBar> = None;

    while let Some(event) = event_rx.recv().await {
        match event {
            PipelineEvent::RunStarted { total, .. } => {
                if total > 0 {
                    let bar = ProgressBar::new(total as u64);
                    bar.set_style(progress_style());
                    bar.set_message("Analyzing...");
                    progress = Some(bar);
                }
            }
            PipelineEvent::LogAnalyzed { id, severity } => {
                if let Some(ref bar) = progress {
                    bar.set_message(format!("{} {}", severity, truncate(&id, 36)));
                    bar.inc(1);
                }
            }
            PipelineEvent::LogFailed { id, error, .. } => {
                if let Some(ref bar) = progress {
                    bar.println(format!("{} {}: {}", style("✗").red(), id, error));
                    bar.inc(1);
                }
            }
            PipelineEvent::RunCompleted(_) => {
                if let Some(bar) = progress.take() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}
