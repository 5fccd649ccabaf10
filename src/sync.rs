//! Per-partition locking.
//!
//! Every read-modify-write on a daily partition runs under that day's
//! mutex. Locks never span more than one day, so writers on different days
//! proceed in parallel while writers on the same day serialize.
//!
//! The mutex only orders tasks inside one process. Writers in other
//! processes (`collect` next to `serve`) are ordered by [`FileLock`], an
//! advisory lock on a sidecar file taken after the mutex.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Default max idle age before a day lock is dropped from the arena.
pub const DEFAULT_MAX_IDLE_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Maps a day to its lock and last access time.
type LockArena = DashMap<NaiveDate, (Arc<Mutex<()>>, Instant)>;

/// Arena of async mutexes indexed by partition day.
///
/// ```ignore
/// let locks = PartitionLocks::new();
/// let _guard = locks.acquire(day).await;
/// // load, modify, save
/// ```
#[derive(Clone, Default)]
pub struct PartitionLocks {
    locks: Arc<LockArena>,
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a day, refreshing its access time.
    pub fn get(&self, day: NaiveDate) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(day)
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    /// Wait for exclusive access to a day's partition.
    pub async fn acquire(&self, day: NaiveDate) -> OwnedMutexGuard<()> {
        self.get(day).lock_owned().await
    }

    /// Drop idle locks nobody holds or waits on.
    ///
    /// The check and the removal run under the entry's shard lock, so a
    /// concurrent `get` either keeps the entry alive or creates a new one
    /// after it is gone. Returns the number of entries removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<NaiveDate> = self.locks.iter().map(|entry| *entry.key()).collect();

        let removed = candidates
            .into_iter()
            .filter(|day| {
                self.locks
                    .remove_if(day, |_, (lock, last_access)| {
                        is_stale(lock, *last_access, now, max_age)
                    })
                    .is_some()
            })
            .count();
        if removed > 0 {
            debug!(removed, remaining = self.len(), "Dropped idle partition locks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

fn is_stale(lock: &Arc<Mutex<()>>, last_access: Instant, now: Instant, max_age: Duration) -> bool {
    Arc::strong_count(lock) == 1 && now.saturating_duration_since(last_access) > max_age
}

/// Exclusive advisory lock on a sidecar file, released on drop.
///
/// Blocks other processes (and other open handles in this process) that
/// lock the same path. The sidecar is never deleted; removing it while a
/// waiter holds an open handle would let two holders in.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Wait for the lock on `path`, creating the file if needed.
    pub async fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(io::Error::other)?
    }

    fn acquire_blocking(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        fs4::fs_std::FileExt::lock_exclusive(&file)?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn same_day_shares_lock() {
        let locks = PartitionLocks::new();
        assert!(Arc::ptr_eq(&locks.get(day(15)), &locks.get(day(15))));
        assert!(!Arc::ptr_eq(&locks.get(day(15)), &locks.get(day(16))));
    }

    #[tokio::test]
    async fn same_day_serializes() {
        let locks = PartitionLocks::new();
        let _guard = locks.acquire(day(15)).await;
        assert!(locks.get(day(15)).try_lock().is_err());
    }

    #[tokio::test]
    async fn different_days_lock_concurrently() {
        let locks = PartitionLocks::new();
        let _guard = locks.acquire(day(15)).await;
        assert!(locks.get(day(16)).try_lock().is_ok());
    }

    #[test]
    fn cleanup_removes_only_idle_unheld_entries() {
        let locks = PartitionLocks::new();
        let old = Instant::now() - Duration::from_secs(10);

        locks
            .locks
            .insert(day(1), (Arc::new(Mutex::new(())), old));

        let held = Arc::new(Mutex::new(()));
        locks.locks.insert(day(2), (Arc::clone(&held), old));

        locks.get(day(3));

        assert_eq!(locks.cleanup_stale(Duration::from_secs(5)), 1);
        assert_eq!(locks.len(), 2);
        assert!(!locks.locks.contains_key(&day(1)));
    }

    #[tokio::test]
    async fn cleanup_keeps_lock_handed_out_before_sweep() {
        let locks = PartitionLocks::new();
        let old = Instant::now() - Duration::from_secs(10);
        locks
            .locks
            .insert(day(15), (Arc::new(Mutex::new(())), old));

        // A writer grabbed the lock but has not refreshed the access time.
        let writer = locks.locks.get(&day(15)).map(|e| Arc::clone(&e.value().0)).unwrap();
        let _guard = writer.lock().await;

        assert_eq!(locks.cleanup_stale(Duration::from_secs(5)), 0);
        assert!(Arc::ptr_eq(&writer, &locks.get(day(15))));
        assert!(locks.get(day(15)).try_lock().is_err());
    }

    #[tokio::test]
    async fn file_lock_excludes_second_holder() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs_2024-01-15.json.lock");

        let first = FileLock::acquire(&path).await.unwrap();
        let waiter = tokio::spawn({
            let path = path.clone();
            async move { FileLock::acquire(path).await.map(|_| ()) }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap().unwrap();
        assert!(path.exists());
    }
}
