//! Scheduler daemon command.

use console::style;

use crate::cli::helpers::open_orchestrator;
use crate::config::Settings;
use crate::pipeline::{next_daily_run, AnalysisScheduler};

/// Run the daily and retry timers until Ctrl+C.
pub async fn cmd_serve(settings: &Settings) -> anyhow::Result<()> {
    if !settings.llm.enabled {
        println!(
            "{} Log analysis is disabled; runs will record every log as failed",
            style("!").yellow()
        );
    }

    let orchestrator = open_orchestrator(settings).await?;
    let schedule = settings.schedule.clone();
    let next = next_daily_run(chrono::Utc::now(), schedule.daily_time, schedule.time_zone);

    println!(
        "{} Daily analysis at {} {} (next: {})",
        style("→").cyan(),
        schedule.daily_time,
        schedule.time_zone,
        next.with_timezone(&schedule.time_zone)
    );
    println!(
        "{} Retrying failures every {} minutes (limit: {} attempts)",
        style("→").cyan(),
        schedule.retry_interval.as_secs() / 60,
        schedule.max_retry_attempts
    );
    println!("  Logs: {}", settings.logs_path.display());
    println!("  Press Ctrl+C to stop");

    let handle = AnalysisScheduler::new(orchestrator, schedule).start();

    tokio::signal::ctrl_c().await?;
    println!("{} Shutting down...", style("→").cyan());
    handle.shutdown().await;
    Ok(())
}
