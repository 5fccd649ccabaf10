//! Append-only run history stored as JSONL.
//!
//! Appends and pruning hold `runs.jsonl.lock`, so a CLI run writing next to
//! the daemon cannot lose lines to a concurrent prune.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{atomic_write_file, lock_path_for, StorageError, StorageResult};
use crate::pipeline::RunSummary;
use crate::sync::FileLock;

/// Log file size that triggers pruning (1MB).
const MAX_LOG_SIZE: u64 = 1_024 * 1_024;

/// Entries kept after pruning.
const ENTRIES_TO_KEEP: usize = 1000;

/// Run history at `{root}/runs.jsonl`.
#[derive(Clone)]
pub struct RunLogStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl RunLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into().join("runs.jsonl"),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append(&self, summary: &RunSummary) -> StorageResult<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::file_io(parent, e))?;
        }
        let lock_path = lock_path_for(&self.path);
        let _file_lock = FileLock::acquire(&lock_path)
            .await
            .map_err(|e| StorageError::file_io(&lock_path, e))?;

        if let Ok(metadata) = fs::metadata(&self.path).await {
            if metadata.len() > MAX_LOG_SIZE {
                if let Err(e) = self.prune().await {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to prune run log"
                    );
                }
            }
        }

        let mut line = serde_json::to_string(summary)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))
    }

    /// The most recent `limit` summaries, oldest first. Unparseable lines are skipped.
    pub async fn recent(&self, limit: usize) -> StorageResult<Vec<RunSummary>> {
        let _guard = self.lock.lock().await;

        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.path, e)),
        };

        let entries: Vec<RunSummary> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }

    async fn prune(&self) -> StorageResult<()> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= ENTRIES_TO_KEEP {
            return Ok(());
        }

        let kept = lines[lines.len() - ENTRIES_TO_KEEP..].join("\n") + "\n";
        atomic_write_file(&self.path, kept.as_bytes()).await?;

        tracing::debug!(before = lines.len(), after = ENTRIES_TO_KEEP, "Pruned run log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunKind;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn summary(attempted: usize) -> RunSummary {
        let mut s = RunSummary::new(
            RunKind::Scheduled,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Utc::now(),
        );
        s.attempted = attempted;
        s
    }

    #[tokio::test]
    async fn append_and_read_tail() {
        let dir = TempDir::new().unwrap();
        let store = RunLogStore::new(dir.path());

        for n in 0..5 {
            store.append(&summary(n)).await.unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempted, 3);
        assert_eq!(recent[1].attempted, 4);
    }

    #[tokio::test]
    async fn missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RunLogStore::new(dir.path());
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_handles_on_one_root_keep_every_line() {
        let dir = TempDir::new().unwrap();
        let daemon = RunLogStore::new(dir.path());
        let cli = RunLogStore::new(dir.path());

        let mut handles = Vec::new();
        for n in 0..40 {
            let store = if n % 2 == 0 { daemon.clone() } else { cli.clone() };
            handles.push(tokio::spawn(async move { store.append(&summary(n)).await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(daemon.recent(100).await.unwrap().len(), 40);
    }
}
