//! Query, statistics, resolution and export commands.

use std::io::Write;
use std::path::Path;

use console::style;

use super::RangeArgs;
use crate::cli::helpers::{parse_optional_day, style_severity, truncate, utc_today};
use crate::config::Settings;
use crate::models::{Priority, ResolutionStatus, Severity};
use crate::services::{export_logs, ExportFormat, LogFilter, LogQueryService};
use crate::storage::DailyStore;

fn query_service(settings: &Settings) -> LogQueryService {
    LogQueryService::new(
        DailyStore::new(&settings.logs_path),
        settings.find_window_days,
    )
}

fn range_filter(range: &RangeArgs) -> anyhow::Result<LogFilter> {
    Ok(LogFilter {
        from: parse_optional_day(range.from.as_deref())?,
        to: parse_optional_day(range.to.as_deref())?,
        ..Default::default()
    })
}

/// List logs.
#[allow(clippy::too_many_arguments)]
pub async fn cmd_ls(
    settings: &Settings,
    range: &RangeArgs,
    severity: Option<&str>,
    priority: Option<&str>,
    unanalyzed: bool,
    source: Option<String>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let mut filter = range_filter(range)?;
    filter.severity = severity
        .map(|s| Severity::from_str(s).ok_or_else(|| anyhow::anyhow!("Unknown severity '{}'", s)))
        .transpose()?;
    filter.priority = priority
        .map(|p| Priority::from_str(p).ok_or_else(|| anyhow::anyhow!("Unknown priority '{}'", p)))
        .transpose()?;
    filter.analyzed = unanalyzed.then_some(false);
    filter.source = source;
    filter.limit = Some(limit);

    let logs = query_service(settings).query(&filter, utc_today()).await?;

    if json {
        let stdout = std::io::stdout();
        export_logs(&logs, ExportFormat::Json, &mut stdout.lock())?;
        return Ok(());
    }

    if logs.is_empty() {
        println!("{} No logs found", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<6} {:<16} {}",
        "TIMESTAMP", "SEVERITY", "PRIO", "SOURCE", "MESSAGE"
    );
    println!("{}", "-".repeat(100));
    for log in &logs {
        println!(
            "{:<20} {} {:<6} {:<16} {}",
            log.timestamp.format("%Y-%m-%d %H:%M:%S"),
            style_severity(log.severity),
            log.priority.map(|p| p.as_str()).unwrap_or("-"),
            truncate(&log.source, 16),
            truncate(&log.message, 50)
        );
        println!("  {}", style(&log.id).dim());
    }
    println!();
    println!("{} logs", logs.len());
    Ok(())
}

/// Show statistics over a range.
pub async fn cmd_stats(settings: &Settings, range: &RangeArgs, json: bool) -> anyhow::Result<()> {
    let (from, to) = range_filter(range)?.range(utc_today());
    let stats = query_service(settings)
        .statistics(from, to, chrono::Utc::now())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} Statistics for {} to {}", style("→").cyan(), from, to);
    println!();
    println!("  Total logs:     {}", stats.total_logs);
    println!(
        "  Analyzed:       {} ({} pending)",
        stats.analyzed_count, stats.unanalyzed_count
    );
    println!();
    println!("  {}", style("Severity").bold());
    println!("    Critical:     {}", style(stats.critical_count).red().bold());
    println!("    High:         {}", style(stats.high_count).red());
    println!("    Medium:       {}", style(stats.medium_count).yellow());
    println!("    Low:          {}", style(stats.low_count).green());
    println!();
    println!("  {}", style("Priority").bold());
    println!("    High:         {}", stats.high_priority_count);
    println!("    Medium:       {}", stats.medium_priority_count);
    println!("    Low:          {}", stats.low_priority_count);
    println!();
    println!("  {}", style("Recency").bold());
    println!("    Today:        {}", stats.today_count);
    println!("    This week:    {}", stats.this_week_count);
    println!("    This month:   {}", stats.this_month_count);
    Ok(())
}

/// Update a log's resolution status.
pub async fn cmd_resolve(
    settings: &Settings,
    id: &str,
    status: &str,
    by: &str,
) -> anyhow::Result<()> {
    let status = ResolutionStatus::from_str(status).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown status '{}' (expected open, in-progress, resolved or ignored)",
            status
        )
    })?;

    let updated = query_service(settings)
        .update_resolution(id, status, by, chrono::Utc::now())
        .await;

    if updated {
        println!(
            "{} Marked {} as {} by {}",
            style("✓").green(),
            id,
            status.as_str(),
            by
        );
        Ok(())
    } else {
        anyhow::bail!(
            "Could not update {} (not found in the last {} days, or invalid input)",
            id,
            settings.find_window_days
        )
    }
}

/// Export logs to a file or stdout.
pub async fn cmd_export(
    settings: &Settings,
    range: &RangeArgs,
    format: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let format = ExportFormat::from_str(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown export format '{}' (json, jsonl, csv)", format))?;
    let filter = range_filter(range)?;
    let logs = query_service(settings).query(&filter, utc_today()).await?;

    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            export_logs(&logs, format, &mut writer)?;
            writer.flush()?;
            eprintln!(
                "{} Exported {} logs to {}",
                style("✓").green(),
                logs.len(),
                path.display()
            );
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            export_logs(&logs, format, &mut lock)?;
            lock.flush()?;
        }
    }
    Ok(())
}
