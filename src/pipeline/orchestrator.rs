//! Analysis orchestrator.
//!
//! A run loads one day's partition, sends its unanalyzed records to the
//! analysis service with bounded concurrency, and merges the results back
//! in a single locked update. Merging re-reads the partition, so records
//! collected while the run was dispatching are kept.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::ledger::{FailureLedger, FailureRecord};
use super::types::{PipelineError, PipelineEvent, PipelineResult, RunKind, RunSummary};
use crate::llm::{AnalysisFailure, LogAnalyzer};
use crate::models::{AnalysisResult, ErrorLog};
use crate::storage::{DailyStore, RunLogStore};

/// Which unanalyzed records a run picks up.
#[derive(Debug, Clone)]
enum Selection {
    /// Every unanalyzed record; abandoned ones only when requested.
    Unanalyzed { include_abandoned: bool },
    /// Only these ids (retry pass).
    Ids(HashSet<String>),
}

/// Runs analysis for one day at a time.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    store: DailyStore,
    analyzer: Arc<dyn LogAnalyzer>,
    ledger: FailureLedger,
    run_log: RunLogStore,
    max_concurrent: usize,
    active_days: Arc<Mutex<HashSet<NaiveDate>>>,
    events: Option<mpsc::Sender<PipelineEvent>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: DailyStore,
        analyzer: Arc<dyn LogAnalyzer>,
        ledger: FailureLedger,
        run_log: RunLogStore,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            analyzer,
            ledger,
            run_log,
            max_concurrent: max_concurrent.max(1),
            active_days: Arc::new(Mutex::new(HashSet::new())),
            events: None,
            shutdown: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Abort runs (without persisting) once `rx` reads `true`.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn store(&self) -> &DailyStore {
        &self.store
    }

    /// Analyze every unanalyzed record of `day`.
    ///
    /// Scheduled runs leave abandoned records alone; manual runs reprocess them.
    pub async fn run_for_day(&self, day: NaiveDate, kind: RunKind) -> PipelineResult<RunSummary> {
        let selection = Selection::Unanalyzed {
            include_abandoned: kind == RunKind::Manual,
        };
        self.run(day, kind, selection).await
    }

    /// Re-analyze specific records of `day`.
    pub async fn run_for_ids(
        &self,
        day: NaiveDate,
        ids: impl IntoIterator<Item = String>,
    ) -> PipelineResult<RunSummary> {
        let selection = Selection::Ids(ids.into_iter().collect());
        self.run(day, RunKind::Retry, selection).await
    }

    async fn run(
        &self,
        day: NaiveDate,
        kind: RunKind,
        selection: Selection,
    ) -> PipelineResult<RunSummary> {
        let _active = ActiveDay::claim(&self.active_days, day).ok_or(PipelineError::DayBusy(day))?;

        let mut summary = RunSummary::new(kind, day, Utc::now());
        let result = self.execute(&mut summary, selection).await;

        summary.finished_at = Some(Utc::now());
        if let Err(ref e) = result {
            summary.error = Some(e.to_string());
            warn!(day = %day, kind = %kind, error = %e, "Analysis run aborted");
        } else {
            info!(
                day = %day,
                kind = %kind,
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                abandoned = summary.abandoned,
                "Analysis run complete"
            );
        }

        if let Err(e) = self.run_log.append(&summary).await {
            warn!(error = %e, "Failed to append run log");
        }
        self.emit(PipelineEvent::RunCompleted(summary.clone())).await;

        result.map(|()| summary)
    }

    async fn execute(&self, summary: &mut RunSummary, selection: Selection) -> PipelineResult<()> {
        let day = summary.day;
        let logs = self
            .store
            .load(day)
            .await
            .map_err(|e| PipelineError::storage(day, e))?;

        let candidates = self.select(day, logs, &selection, summary).await;
        summary.attempted = candidates.len();

        self.emit(PipelineEvent::RunStarted {
            kind: summary.kind,
            day,
            total: candidates.len(),
        })
        .await;

        if candidates.is_empty() {
            debug!(day = %day, "Nothing to analyze");
            return Ok(());
        }

        let outcomes = match self.shutdown.clone() {
            Some(mut rx) => {
                tokio::select! {
                    outcomes = self.dispatch(candidates) => outcomes,
                    _ = wait_for_shutdown(&mut rx) => return Err(PipelineError::Cancelled(day)),
                }
            }
            None => self.dispatch(candidates).await,
        };

        if self.is_shutting_down() {
            return Err(PipelineError::Cancelled(day));
        }

        let mut results: HashMap<String, AnalysisResult> = HashMap::new();
        let mut failures = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    results.insert(id, result);
                }
                Err(failure) => failures.push(FailureRecord {
                    id,
                    attempts: failure.attempts,
                    error: failure.error.to_string(),
                }),
            }
        }

        let analyzed_at = Utc::now();
        let merged = self
            .store
            .update(day, |logs| merge_results(logs, &results, analyzed_at))
            .await
            .map_err(|e| PipelineError::storage(day, e))?;
        debug!(day = %day, merged, "Merged analysis results");

        summary.succeeded = results.len();
        summary.failed = failures.len();

        let succeeded: Vec<String> = results.into_keys().collect();
        match self
            .ledger
            .record_outcomes(day, &succeeded, &failures, analyzed_at)
            .await
        {
            Ok(abandoned) => summary.abandoned = abandoned,
            Err(e) => warn!(day = %day, error = %e, "Failed to update retry ledger"),
        }

        Ok(())
    }

    /// Unanalyzed records for this run, one per id.
    async fn select(
        &self,
        day: NaiveDate,
        logs: Vec<ErrorLog>,
        selection: &Selection,
        summary: &mut RunSummary,
    ) -> Vec<ErrorLog> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let abandoned = match selection {
            Selection::Unanalyzed {
                include_abandoned: false,
            } => self.ledger.abandoned_ids(day).await,
            _ => HashSet::new(),
        };

        for log in logs {
            if log.is_analyzed || !seen.insert(log.id.clone()) {
                continue;
            }
            let wanted = match selection {
                Selection::Unanalyzed { .. } => !abandoned.contains(&log.id),
                Selection::Ids(ids) => ids.contains(&log.id),
            };
            if wanted {
                candidates.push(log);
            } else if matches!(selection, Selection::Unanalyzed { .. }) {
                summary.skipped += 1;
            }
        }

        if let Selection::Ids(ids) = selection {
            let resolved: Vec<String> = ids
                .iter()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect();
            if !resolved.is_empty() {
                debug!(
                    day = %day,
                    count = resolved.len(),
                    "Clearing ledger entries with nothing left to analyze"
                );
                if let Err(e) = self.ledger.clear(day, &resolved).await {
                    warn!(day = %day, error = %e, "Failed to clear retry ledger entries");
                }
            }
        }

        candidates
    }

    async fn dispatch(
        &self,
        candidates: Vec<ErrorLog>,
    ) -> Vec<(String, Result<AnalysisResult, AnalysisFailure>)> {
        stream::iter(candidates)
            .map(|log| async move {
                let outcome = self.analyzer.analyze(&log).await;
                match outcome {
                    Ok(ref result) => {
                        self.emit(PipelineEvent::LogAnalyzed {
                            id: log.id.clone(),
                            severity: result.severity,
                        })
                        .await
                    }
                    Err(ref failure) => {
                        warn!(id = %log.id, error = %failure, "Analysis failed");
                        self.emit(PipelineEvent::LogFailed {
                            id: log.id.clone(),
                            error: failure.error.to_string(),
                            attempts: failure.attempts,
                        })
                        .await
                    }
                }
                (log.id, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Apply results by id to still-unanalyzed records. Duplicate ids share a result.
fn merge_results(
    logs: &mut [ErrorLog],
    results: &HashMap<String, AnalysisResult>,
    analyzed_at: chrono::DateTime<Utc>,
) -> usize {
    logs.iter_mut()
        .filter_map(|log| {
            let result = results.get(&log.id)?;
            log.apply_analysis(result, analyzed_at).then_some(())
        })
        .count()
}

/// Resolves once the watch reads `true`; never resolves if the sender is gone.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Marks a day as having a run in flight until dropped.
struct ActiveDay {
    days: Arc<Mutex<HashSet<NaiveDate>>>,
    day: NaiveDate,
}

impl ActiveDay {
    fn claim(days: &Arc<Mutex<HashSet<NaiveDate>>>, day: NaiveDate) -> Option<Self> {
        let mut guard = days.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(day).then(|| Self {
            days: days.clone(),
            day,
        })
    }
}

impl Drop for ActiveDay {
    fn drop(&mut self) {
        let mut guard = self.days.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.day);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Severity};
    use chrono::TimeZone;

    fn log(id: &str) -> ErrorLog {
        ErrorLog::new(
            id,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
            "svc",
            "boom",
            "",
        )
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            severity: Severity::High,
            priority: Priority::Medium,
            ai_reasoning: "r".to_string(),
            potential_fix: "f".to_string(),
        }
    }

    #[test]
    fn merge_applies_by_id_including_duplicates() {
        let mut logs = vec![log("a"), log("b"), log("a")];
        let results = HashMap::from([("a".to_string(), result())]);

        let applied = merge_results(&mut logs, &results, Utc::now());
        assert_eq!(applied, 2);
        assert!(logs[0].is_analyzed && logs[2].is_analyzed);
        assert!(!logs[1].is_analyzed);
        assert!(logs.iter().all(|l| l.analysis_consistent()));
    }

    #[test]
    fn merge_never_overwrites_analyzed_records() {
        let first = Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap();
        let mut logs = vec![log("a")];
        logs[0].apply_analysis(&result(), first);

        let results = HashMap::from([("a".to_string(), result())]);
        assert_eq!(merge_results(&mut logs, &results, Utc::now()), 0);
        assert_eq!(logs[0].analyzed_at, Some(first));
    }

    #[test]
    fn active_day_is_exclusive_until_dropped() {
        let days = Arc::new(Mutex::new(HashSet::new()));
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let guard = ActiveDay::claim(&days, day).unwrap();
        assert!(ActiveDay::claim(&days, day).is_none());
        assert!(ActiveDay::claim(&days, day.succ_opt().unwrap()).is_some());
        drop(guard);
        assert!(ActiveDay::claim(&days, day).is_some());
    }
}
