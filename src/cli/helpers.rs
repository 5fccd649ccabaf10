//! Shared helper functions for CLI commands.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use console::{style, StyledObject};
use indicatif::ProgressStyle;

use crate::config::Settings;
use crate::llm::LlmClient;
use crate::models::Severity;
use crate::pipeline::{AnalysisOrchestrator, FailureLedger};
use crate::storage::{DailyStore, RunLogStore};

/// Parse a `YYYY-MM-DD` argument.
pub fn parse_day(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{}', expected YYYY-MM-DD", s))
}

pub fn parse_optional_day(s: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    s.map(parse_day).transpose()
}

/// Today's partition date (UTC).
pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

pub fn style_severity(severity: Option<Severity>) -> StyledObject<String> {
    let label = format!("{:<8}", severity.map(|s| s.as_str()).unwrap_or("-"));
    match severity {
        Some(Severity::Critical) => style(label).red().bold(),
        Some(Severity::High) => style(label).red(),
        Some(Severity::Medium) => style(label).yellow(),
        Some(Severity::Low) => style(label).green(),
        None => style(label).dim(),
    }
}

pub fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Wire the store, ledger, run log and analysis client into an orchestrator.
pub async fn open_orchestrator(settings: &Settings) -> anyhow::Result<AnalysisOrchestrator> {
    let store = DailyStore::new(&settings.logs_path);
    let ledger =
        FailureLedger::open(&settings.logs_path, settings.schedule.max_retry_attempts).await?;
    let run_log = RunLogStore::new(&settings.logs_path);
    let analyzer = Arc::new(LlmClient::new(settings.llm.clone())?);

    Ok(AnalysisOrchestrator::new(
        store,
        analyzer,
        ledger,
        run_log,
        settings.schedule.max_concurrent_analysis,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(parse_day("15/01/2024").is_err());
        assert_eq!(parse_optional_day(None).unwrap(), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer message", 10), "a much ...");
        assert_eq!(truncate("first line\nsecond", 20), "first line");
    }
}
