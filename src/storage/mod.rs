//! File-based persistence.
//!
//! - One JSON array per day for error logs (`logs_YYYY-MM-DD.json`)
//! - JSONL for the append-only run log
//!
//! Whole-file writes go through [`atomic_write_file`] (temp file, fsync,
//! rename) so an interrupted write leaves the previous contents intact.
//! Each write gets its own temp file, so writers in different processes
//! never truncate each other's half-written output.

mod daily;
mod error;
mod run_log;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

pub use daily::{DailyStore, PARTITION_PREFIX};
pub use error::{StorageError, StorageResult};
pub use run_log::RunLogStore;

/// Suffix shared by every in-flight temp file.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Unique sibling of `final_path`: `{name}.{uuid}.tmp`.
fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!(".{}{}", uuid::Uuid::new_v4().simple(), TEMP_SUFFIX));
    final_path.with_file_name(name)
}

/// Sidecar lock file for `path`: `{name}.lock`.
pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Write `content` to a fresh temp file, fsync, then rename over `final_path`.
pub(crate) async fn atomic_write_file(final_path: &Path, content: &[u8]) -> StorageResult<()> {
    let temp_path = temp_path_for(final_path);
    let result = write_and_rename(&temp_path, final_path, content).await;
    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

async fn write_and_rename(
    temp_path: &Path,
    final_path: &Path,
    content: &[u8],
) -> StorageResult<()> {
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    drop(file);

    fs::rename(temp_path, final_path)
        .await
        .map_err(|e| StorageError::file_io(final_path, e))
}
