//! Daily partition store.
//!
//! Each calendar day (UTC) owns one file holding every record whose
//! timestamp falls on that day. Partitions are independent: writers lock a
//! single day and never hold more than one day lock at a time.
//!
//! A day lock is the in-process mutex plus `logs_YYYY-MM-DD.json.lock`, so a
//! `collect` process and a running `serve` never interleave writes to the
//! same partition.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::{atomic_write_file, lock_path_for, StorageError, StorageResult};
use crate::models::ErrorLog;
use crate::sync::{FileLock, PartitionLocks};

/// File name prefix for partition files.
pub const PARTITION_PREFIX: &str = "logs_";

/// Store of error logs partitioned by day.
#[derive(Clone)]
pub struct DailyStore {
    root: PathBuf,
    locks: PartitionLocks,
}

impl DailyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: PartitionLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The lock arena shared by every writer of this store.
    pub fn locks(&self) -> &PartitionLocks {
        &self.locks
    }

    /// Path of the file backing a day's partition.
    pub fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}{}.json", PARTITION_PREFIX, day.format("%Y-%m-%d")))
    }

    async fn ensure_root(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::file_io(&self.root, e))
    }

    /// Exclusive access to a day, across tasks and processes.
    async fn lock_day(&self, day: NaiveDate) -> StorageResult<DayGuard> {
        let local = self.locks.acquire(day).await;
        self.ensure_root().await?;
        let lock_path = lock_path_for(&self.partition_path(day));
        let file = FileLock::acquire(&lock_path)
            .await
            .map_err(|e| StorageError::file_io(&lock_path, e))?;
        Ok(DayGuard {
            _file: file,
            _local: local,
        })
    }

    /// Load every record of a day. An absent partition is empty, not an error.
    ///
    /// Reads take no lock: saves are atomic renames, so a reader sees either
    /// the previous or the new contents.
    pub async fn load(&self, day: NaiveDate) -> StorageResult<Vec<ErrorLog>> {
        let path = self.partition_path(day);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::corrupt(&path, e.to_string()))
    }

    /// Replace a day's partition with `logs`.
    pub async fn save(&self, day: NaiveDate, logs: &[ErrorLog]) -> StorageResult<()> {
        let _guard = self.lock_day(day).await?;
        self.write_partition(day, logs).await
    }

    /// Read-modify-write a partition as one critical section.
    ///
    /// The partition is saved only if `f` changed it.
    pub async fn update<T>(
        &self,
        day: NaiveDate,
        f: impl FnOnce(&mut Vec<ErrorLog>) -> T,
    ) -> StorageResult<T> {
        let _guard = self.lock_day(day).await?;

        let original = self.load(day).await?;
        let mut logs = original.clone();
        let value = f(&mut logs);

        if logs != original {
            self.write_partition(day, &logs).await?;
        } else {
            debug!(day = %day, "Partition unchanged, skipping write");
        }
        Ok(value)
    }

    /// Callers must hold the day lock.
    async fn write_partition(&self, day: NaiveDate, logs: &[ErrorLog]) -> StorageResult<()> {
        self.ensure_root().await?;

        let path = self.partition_path(day);
        let json = serde_json::to_vec_pretty(logs)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        atomic_write_file(&path, &json).await?;

        debug!(day = %day, records = logs.len(), "Saved partition");
        Ok(())
    }

    /// Union of every partition in `[from, to]`. Order is unspecified.
    ///
    /// Only days with a partition file are read, so a wide range costs one
    /// directory listing rather than a lookup per calendar day.
    pub async fn load_range(&self, from: NaiveDate, to: NaiveDate) -> StorageResult<Vec<ErrorLog>> {
        let mut logs = Vec::new();
        for day in self.list_days().await? {
            if day >= from && day <= to {
                logs.extend(self.load(day).await?);
            }
        }
        Ok(logs)
    }

    /// Find a record by id, scanning `window_days` partitions back from `today`.
    ///
    /// Records older than the window are not found.
    pub async fn find_by_id(
        &self,
        id: &str,
        today: NaiveDate,
        window_days: u32,
    ) -> StorageResult<Option<ErrorLog>> {
        for offset in 0..window_days.max(1) {
            let day = today - Duration::days(offset as i64);
            if let Some(log) = self.load(day).await?.into_iter().find(|l| l.id == id) {
                return Ok(Some(log));
            }
        }
        Ok(None)
    }

    /// Days that currently have a partition file, oldest first.
    pub async fn list_days(&self) -> StorageResult<Vec<NaiveDate>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.root, e)),
        };

        let mut days = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name
                .strip_prefix(PARTITION_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            match NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                Ok(day) => days.push(day),
                Err(_) => warn!(file = name, "Ignoring unrecognized partition file"),
            }
        }
        days.sort();
        Ok(days)
    }
}

/// Held for a day's critical section. Releases the file lock before the mutex.
struct DayGuard {
    _file: FileLock,
    _local: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn log(id: &str, d: u32) -> ErrorLog {
        ErrorLog::new(
            id,
            Utc.with_ymd_and_hms(2024, 1, d, 10, 0, 0).unwrap(),
            "svc",
            format!("failure {}", id),
            "",
        )
    }

    #[tokio::test]
    async fn load_absent_partition_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());
        assert!(store.load(day(15)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_returns_same_records() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path().join("nested"));
        let logs = vec![log("a", 15), log("b", 15)];

        store.save(day(15), &logs).await.unwrap();
        assert_eq!(store.load(day(15)).await.unwrap(), logs);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_partition_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());
        std::fs::write(store.partition_path(day(15)), "{not json").unwrap();

        assert!(matches!(
            store.load(day(15)).await,
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn update_skips_write_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());

        let count = store.update(day(15), |logs| logs.len()).await.unwrap();
        assert_eq!(count, 0);
        assert!(!store.partition_path(day(15)).exists());

        store.update(day(15), |logs| logs.push(log("a", 15))).await.unwrap();
        assert_eq!(store.load(day(15)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_range_unions_days() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());
        store.save(day(14), &[log("a", 14)]).await.unwrap();
        store.save(day(16), &[log("b", 16), log("c", 16)]).await.unwrap();
        store.save(day(20), &[log("d", 20)]).await.unwrap();

        assert_eq!(store.load_range(day(14), day(16)).await.unwrap().len(), 3);
        assert!(store.load_range(day(16), day(14)).await.unwrap().is_empty());

        let epoch = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        assert_eq!(store.load_range(epoch, day(31)).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn find_by_id_respects_window() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());
        store.save(day(10), &[log("old", 10)]).await.unwrap();
        store.save(day(14), &[log("recent", 14)]).await.unwrap();

        let found = store.find_by_id("recent", day(15), 3).await.unwrap();
        assert_eq!(found.map(|l| l.id), Some("recent".to_string()));

        assert!(store.find_by_id("old", day(15), 3).await.unwrap().is_none());
        assert!(store.find_by_id("old", day(15), 90).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_days_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::new(dir.path());
        store.save(day(16), &[log("b", 16)]).await.unwrap();
        store.save(day(14), &[log("a", 14)]).await.unwrap();
        std::fs::write(dir.path().join("runs.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("logs_garbage.json"), "[]").unwrap();
        std::fs::write(dir.path().join("logs_2024-01-17.json.1f2e.tmp"), "[").unwrap();

        assert_eq!(store.list_days().await.unwrap(), vec![day(14), day(16)]);
    }
}
