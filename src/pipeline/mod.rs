//! Analysis pipeline: orchestrated daily runs, the failure ledger, retries
//! and the background scheduler that drives them.

mod ledger;
mod orchestrator;
mod retry;
mod scheduler;
mod types;

pub use ledger::{FailureLedger, FailureRecord, LedgerEntry, RetryStatus};
pub use orchestrator::AnalysisOrchestrator;
pub use retry::{RetryCoordinator, RetryPassSummary};
pub use scheduler::{
    last_complete_day, next_daily_run, sweep_window, AnalysisScheduler, ScheduledPass,
    SchedulerHandle,
};
pub use types::{
    PipelineError, PipelineEvent, PipelineResult, RunKind, RunSummary, TriggerOutcome,
};
