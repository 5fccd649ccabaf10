//! Persisted failure set.
//!
//! One entry per (day, log id) that failed analysis and has not succeeded
//! since. Entries count analysis-service attempts; an entry that reaches the
//! limit, or whose day leaves the retry window, is abandoned and stays
//! listed until a later success clears it.
//!
//! The file is the source of truth. Every mutation re-reads it under
//! `retry_ledger.json.lock`, so `analyze` or `retry` run from the CLI and a
//! running `serve` each see the other's entries.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::storage::{atomic_write_file, lock_path_for, StorageError, StorageResult};
use crate::sync::FileLock;

const LEDGER_FILE: &str = "retry_ledger.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStatus {
    Pending,
    Abandoned,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub day: NaiveDate,
    /// Analysis-service attempts consumed so far.
    pub attempts: u32,
    pub last_error: String,
    pub status: RetryStatus,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

/// A failed analysis reported by a run.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub id: String,
    pub attempts: u32,
    pub error: String,
}

type EntryKey = (NaiveDate, String);
type Entries = BTreeMap<EntryKey, LedgerEntry>;

/// Failure ledger at `{root}/retry_ledger.json`.
#[derive(Clone)]
pub struct FailureLedger {
    path: PathBuf,
    lock_path: PathBuf,
    max_attempts: u32,
    /// Last contents read from disk. Reads fall back to it when the file
    /// cannot be read.
    entries: Arc<Mutex<Entries>>,
}

impl FailureLedger {
    /// Load the ledger under `root`; an absent file is an empty ledger.
    pub async fn open(root: &Path, max_attempts: u32) -> StorageResult<Self> {
        let path = root.join(LEDGER_FILE);
        let entries = read_entries(&path).await?;

        debug!(path = %path.display(), entries = entries.len(), "Opened retry ledger");
        Ok(Self {
            lock_path: lock_path_for(&path),
            path,
            max_attempts: max_attempts.max(1),
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Apply one run's outcome for `day`: successes clear their entries,
    /// failures add attempts. Returns how many entries became abandoned.
    pub async fn record_outcomes(
        &self,
        day: NaiveDate,
        succeeded: &[String],
        failed: &[FailureRecord],
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let max_attempts = self.max_attempts;
        self.mutate(|entries| {
            let mut changed = false;
            for id in succeeded {
                changed |= entries.remove(&(day, id.clone())).is_some();
            }

            let mut abandoned = 0;
            for failure in failed {
                let entry = entries
                    .entry((day, failure.id.clone()))
                    .or_insert_with(|| LedgerEntry {
                        id: failure.id.clone(),
                        day,
                        attempts: 0,
                        last_error: String::new(),
                        status: RetryStatus::Pending,
                        first_failed_at: now,
                        last_attempt_at: now,
                    });
                entry.attempts = entry.attempts.saturating_add(failure.attempts);
                entry.last_error = failure.error.clone();
                entry.last_attempt_at = now;
                if entry.status == RetryStatus::Pending && entry.attempts >= max_attempts {
                    entry.status = RetryStatus::Abandoned;
                    abandoned += 1;
                    info!(
                        id = %entry.id,
                        day = %day,
                        attempts = entry.attempts,
                        "Abandoning analysis retries"
                    );
                }
                changed = true;
            }
            (abandoned, changed)
        })
        .await
    }

    /// Drop entries whose record no longer needs analysis.
    pub async fn clear(&self, day: NaiveDate, ids: &[String]) -> StorageResult<()> {
        self.mutate(|entries| {
            let before = entries.len();
            for id in ids {
                entries.remove(&(day, id.clone()));
            }
            ((), entries.len() != before)
        })
        .await
    }

    /// Abandon pending entries for days before `oldest`.
    pub async fn abandon_before(&self, oldest: NaiveDate) -> StorageResult<usize> {
        self.mutate(|entries| {
            let mut abandoned = 0;
            for entry in entries.values_mut() {
                if entry.day < oldest && entry.status == RetryStatus::Pending {
                    entry.status = RetryStatus::Abandoned;
                    abandoned += 1;
                }
            }
            if abandoned > 0 {
                info!(
                    count = abandoned,
                    oldest = %oldest,
                    "Abandoned entries outside retry window"
                );
            }
            (abandoned, abandoned > 0)
        })
        .await
    }

    /// Days with pending entries, oldest first.
    pub async fn pending_days(&self) -> Vec<NaiveDate> {
        let entries = self.snapshot().await;
        let mut days: Vec<NaiveDate> = entries
            .values()
            .filter(|e| e.status == RetryStatus::Pending)
            .map(|e| e.day)
            .collect();
        days.dedup();
        days
    }

    pub async fn pending_ids(&self, day: NaiveDate) -> Vec<String> {
        let entries = self.snapshot().await;
        entries
            .values()
            .filter(|e| e.day == day && e.status == RetryStatus::Pending)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Ids of `day` that are no longer retried.
    pub async fn abandoned_ids(&self, day: NaiveDate) -> HashSet<String> {
        let entries = self.snapshot().await;
        entries
            .values()
            .filter(|e| e.day == day && e.status == RetryStatus::Abandoned)
            .map(|e| e.id.clone())
            .collect()
    }

    pub async fn is_abandoned(&self, day: NaiveDate, id: &str) -> bool {
        let entries = self.snapshot().await;
        entries
            .get(&(day, id.to_string()))
            .is_some_and(|e| e.status == RetryStatus::Abandoned)
    }

    pub async fn get(&self, day: NaiveDate, id: &str) -> Option<LedgerEntry> {
        let entries = self.snapshot().await;
        entries.get(&(day, id.to_string())).cloned()
    }

    /// Every entry, ordered by day then id.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        let entries = self.snapshot().await;
        entries.values().cloned().collect()
    }

    /// Reload from disk under the file lock, apply `f`, and write back if it
    /// reports a change.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Entries) -> (T, bool)) -> StorageResult<T> {
        let mut entries = self.entries.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::file_io(parent, e))?;
        }
        let _file_lock = FileLock::acquire(&self.lock_path)
            .await
            .map_err(|e| StorageError::file_io(&self.lock_path, e))?;

        *entries = read_entries(&self.path).await?;
        let (value, changed) = f(&mut entries);
        if changed {
            self.persist(&entries).await?;
        }
        Ok(value)
    }

    /// Current contents, refreshed from disk when readable.
    async fn snapshot(&self) -> MutexGuard<'_, Entries> {
        let mut entries = self.entries.lock().await;
        match read_entries(&self.path).await {
            Ok(fresh) => *entries = fresh,
            Err(e) => warn!(error = %e, "Failed to reload retry ledger, using last snapshot"),
        }
        entries
    }

    async fn persist(&self, entries: &Entries) -> StorageResult<()> {
        let list: Vec<&LedgerEntry> = entries.values().collect();
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        atomic_write_file(&self.path, &json).await
    }
}

async fn read_entries(path: &Path) -> StorageResult<Entries> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StorageError::file_io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let list: Vec<LedgerEntry> =
        serde_json::from_str(&content).map_err(|e| StorageError::corrupt(path, e.to_string()))?;
    Ok(list
        .into_iter()
        .map(|e| ((e.day, e.id.clone()), e))
        .collect())
}
