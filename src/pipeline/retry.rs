//! Retry coordinator.
//!
//! Re-dispatches pending ledger entries from the most recent days through
//! the orchestrator. Entries from older days are abandoned first.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use super::orchestrator::AnalysisOrchestrator;
use super::types::{PipelineError, RunSummary};

/// Outcome of one retry pass.
#[derive(Debug, Clone, Default)]
pub struct RetryPassSummary {
    pub runs: Vec<RunSummary>,
    /// Days skipped because another run held them.
    pub busy_days: Vec<NaiveDate>,
    /// Entries abandoned for falling outside the window.
    pub expired: usize,
    /// A shutdown interrupted the pass.
    pub cancelled: bool,
}

impl RetryPassSummary {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().map(|r| r.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.runs.iter().map(|r| r.failed).sum()
    }
}

#[derive(Clone)]
pub struct RetryCoordinator {
    orchestrator: AnalysisOrchestrator,
    window_days: u32,
}

impl RetryCoordinator {
    /// `window_days` recent days are eligible for retry, counted back from today.
    pub fn new(orchestrator: AnalysisOrchestrator, window_days: u32) -> Self {
        Self {
            orchestrator,
            window_days: window_days.max(1),
        }
    }

    /// Oldest day still inside the retry window.
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.window_days as i64)
    }

    pub async fn run_pass(&self, today: NaiveDate) -> RetryPassSummary {
        let ledger = self.orchestrator.ledger();
        let oldest = self.window_start(today);
        let mut pass = RetryPassSummary::default();

        match ledger.abandon_before(oldest).await {
            Ok(n) => pass.expired = n,
            Err(e) => warn!(error = %e, "Failed to expire retry ledger entries"),
        }

        let days: Vec<NaiveDate> = ledger
            .pending_days()
            .await
            .into_iter()
            .filter(|d| *d >= oldest && *d <= today)
            .collect();

        if days.is_empty() {
            debug!("No pending retries");
            return pass;
        }

        for day in days {
            let ids = ledger.pending_ids(day).await;
            if ids.is_empty() {
                continue;
            }
            debug!(day = %day, count = ids.len(), "Retrying failed analyses");

            match self.orchestrator.run_for_ids(day, ids).await {
                Ok(summary) => pass.runs.push(summary),
                Err(PipelineError::DayBusy(day)) => {
                    debug!(day = %day, "Day busy, retrying next pass");
                    pass.busy_days.push(day);
                }
                Err(PipelineError::Cancelled(_)) => {
                    pass.cancelled = true;
                    break;
                }
                Err(e) => warn!(day = %day, error = %e, "Retry run failed"),
            }
        }

        info!(
            days = pass.runs.len(),
            succeeded = pass.succeeded(),
            failed = pass.failed(),
            expired = pass.expired,
            "Retry pass complete"
        );
        pass
    }
}
