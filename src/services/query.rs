//! Read access to stored logs and in-place resolution updates.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::models::{ErrorLog, LogStatistics, Priority, ResolutionStatus, Severity};
use crate::storage::{DailyStore, StorageResult};

/// Days covered by a query with no explicit range.
pub const DEFAULT_QUERY_DAYS: i64 = 30;

/// Filter for [`LogQueryService::query`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub severity: Option<Severity>,
    pub priority: Option<Priority>,
    /// `Some(false)` for unanalyzed only, `Some(true)` for analyzed only.
    pub analyzed: Option<bool>,
    /// Case-insensitive substring match on `source`.
    pub source: Option<String>,
    pub limit: Option<usize>,
}

impl LogFilter {
    /// Effective inclusive day range, defaulting to the last 30 days ending `today`.
    pub fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to - Duration::days(DEFAULT_QUERY_DAYS - 1));
        (from, to)
    }

    fn matches(&self, log: &ErrorLog) -> bool {
        if self.severity.is_some() && log.severity != self.severity {
            return false;
        }
        if self.priority.is_some() && log.priority != self.priority {
            return false;
        }
        if let Some(analyzed) = self.analyzed {
            if log.is_analyzed != analyzed {
                return false;
            }
        }
        if let Some(ref source) = self.source {
            if !log.source.to_lowercase().contains(&source.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct LogQueryService {
    store: DailyStore,
    find_window_days: u32,
}

impl LogQueryService {
    pub fn new(store: DailyStore, find_window_days: u32) -> Self {
        Self {
            store,
            find_window_days,
        }
    }

    /// Matching logs, newest first.
    pub async fn query(
        &self,
        filter: &LogFilter,
        today: NaiveDate,
    ) -> StorageResult<Vec<ErrorLog>> {
        let (from, to) = filter.range(today);
        let mut logs: Vec<ErrorLog> = self
            .store
            .load_range(from, to)
            .await?
            .into_iter()
            .filter(|log| filter.matches(log))
            .collect();

        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            logs.truncate(limit);
        }
        debug!(from = %from, to = %to, results = logs.len(), "Queried logs");
        Ok(logs)
    }

    pub async fn statistics(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        now: DateTime<Utc>,
    ) -> StorageResult<LogStatistics> {
        let logs = self.store.load_range(from, to).await?;
        Ok(LogStatistics::compute(&logs, now))
    }

    pub async fn get_by_id(&self, id: &str, today: NaiveDate) -> StorageResult<Option<ErrorLog>> {
        self.store.find_by_id(id, today, self.find_window_days).await
    }

    /// Set a record's resolution in place.
    ///
    /// Returns `false` for invalid input, an id not found within the search
    /// window, or a storage failure.
    pub async fn update_resolution(
        &self,
        id: &str,
        status: ResolutionStatus,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> bool {
        let id = id.trim();
        let resolved_by = resolved_by.trim();
        if id.is_empty() || resolved_by.is_empty() {
            warn!("Resolution update requires an id and a resolver");
            return false;
        }

        let today = Utc::now().date_naive();
        let day = match self.get_by_id(id, today).await {
            Ok(Some(log)) => log.day(),
            Ok(None) => {
                debug!(id, "Resolution target not found");
                return false;
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to look up resolution target");
                return false;
            }
        };

        let updated = self
            .store
            .update(day, |logs| match logs.iter_mut().find(|l| l.id == id) {
                Some(log) => {
                    log.resolve(status, resolved_by, resolved_at);
                    true
                }
                None => false,
            })
            .await;

        match updated {
            Ok(true) => {
                info!(id, status = status.as_str(), resolved_by, "Updated resolution");
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(id, error = %e, "Failed to save resolution");
                false
            }
        }
    }
}
