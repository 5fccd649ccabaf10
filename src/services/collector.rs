//! Ingestion of collected error logs into daily partitions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{ErrorLog, IncomingLog};
use crate::storage::{DailyStore, StorageError};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no logs supplied")]
    Empty,
    #[error("{count} logs exceeds the per-request limit of {max}")]
    TooMany { count: usize, max: usize },
    #[error("log at index {0} has no timestamp")]
    MissingTimestamp(usize),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Records stored per day by one collection call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub per_day: BTreeMap<NaiveDate, usize>,
}

impl CollectReport {
    pub fn total(&self) -> usize {
        self.per_day.values().sum()
    }
}

/// Appends incoming logs to the partition of their timestamp's day.
///
/// Collection does not de-duplicate: sending the same record twice stores it twice.
#[derive(Clone)]
pub struct LogCollector {
    store: DailyStore,
    max_logs_per_request: usize,
}

impl LogCollector {
    pub fn new(store: DailyStore, max_logs_per_request: usize) -> Self {
        Self {
            store,
            max_logs_per_request,
        }
    }

    /// Collect a batch, reporting only success or failure.
    pub async fn collect(&self, logs: Vec<IncomingLog>) -> bool {
        match self.collect_detailed(logs).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Rejected log batch");
                false
            }
        }
    }

    /// Validate the whole batch, then append each day's group under its day lock.
    pub async fn collect_detailed(
        &self,
        logs: Vec<IncomingLog>,
    ) -> Result<CollectReport, CollectError> {
        if logs.is_empty() {
            return Err(CollectError::Empty);
        }
        if logs.len() > self.max_logs_per_request {
            return Err(CollectError::TooMany {
                count: logs.len(),
                max: self.max_logs_per_request,
            });
        }

        let mut groups: BTreeMap<NaiveDate, Vec<ErrorLog>> = BTreeMap::new();
        for (index, incoming) in logs.into_iter().enumerate() {
            let log = incoming
                .into_error_log()
                .ok_or(CollectError::MissingTimestamp(index))?;
            groups.entry(log.day()).or_default().push(log);
        }

        let mut report = CollectReport::default();
        for (day, group) in groups {
            let count = group.len();
            self.store
                .update(day, move |existing| existing.extend(group))
                .await?;
            info!(day = %day, count, "Collected logs");
            report.per_day.insert(day, count);
        }
        Ok(report)
    }
}
