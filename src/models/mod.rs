//! Domain models for collected error logs.

mod error_log;
mod statistics;

pub use error_log::{ErrorLog, IncomingLog, Priority, ResolutionStatus, Severity};
pub use statistics::LogStatistics;

/// Classification returned by the analysis service for one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub severity: Severity,
    pub priority: Priority,
    pub ai_reasoning: String,
    pub potential_fix: String,
}
