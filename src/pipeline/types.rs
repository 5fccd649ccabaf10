//! Shared pipeline types: run summaries, progress events and errors.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Severity;
use crate::storage::StorageError;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Daily timer.
    Scheduled,
    /// Retry pass over the failure ledger.
    Retry,
    /// Operator-triggered (`analyze`).
    Manual,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one orchestrator run, appended to the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub kind: RunKind,
    pub day: NaiveDate,
    /// Distinct records sent to the analysis service.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Unanalyzed records left out of this run (abandoned by retry).
    pub skipped: usize,
    /// Records that reached the attempt limit during this run.
    #[serde(default)]
    pub abandoned: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the run aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(kind: RunKind, day: NaiveDate, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            day,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            abandoned: 0,
            started_at,
            finished_at: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Progress events emitted while a run executes.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Dispatch is about to start
    RunStarted {
        kind: RunKind,
        day: NaiveDate,
        total: usize,
    },
    /// One record classified
    LogAnalyzed { id: String, severity: Severity },
    /// One record failed analysis
    LogFailed {
        id: String,
        error: String,
        attempts: u32,
    },
    /// Run finished (successfully or not)
    RunCompleted(RunSummary),
}

/// Result of asking the scheduler to run.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Completed(RunSummary),
    /// Another run for the job or day is still in progress; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Loading or saving the partition failed; the run aborted without changes.
    #[error("storage failure for {day}: {source}")]
    Storage {
        day: NaiveDate,
        #[source]
        source: StorageError,
    },

    /// Shutdown arrived before results were persisted.
    #[error("run for {0} cancelled before persist")]
    Cancelled(NaiveDate),

    #[error("a run for {0} is already in progress")]
    DayBusy(NaiveDate),
}

impl PipelineError {
    pub fn storage(day: NaiveDate, source: StorageError) -> Self {
        Self::Storage { day, source }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
