//! Removal of stale entries from the shared upload area.

use crate::config::StorageConfig;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio_util::sync::CancellationToken;

/// Delay before the first scheduled cleanup after startup.
pub const CLEANUP_INITIAL_DELAY: Duration = Duration::from_secs(2 * 60);

/// Interval between scheduled cleanups.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct UploadCleaner {
    cfg: Arc<StorageConfig>,
}

impl UploadCleaner {
    pub fn new(cfg: Arc<StorageConfig>) -> Self {
        Self { cfg }
    }

    /// Deletes every entry of the upload root last modified more than the configured age
    /// before `now`. Folders are removed recursively.
    ///
    /// Failures are logged and reported, never raised.
    pub fn delete_old_upload_folders(&self, now: SystemTime) -> CleanupReport {
        let root = self.cfg.upload().root();
        let max_age = self.cfg.upload_delete_age();
        let mut report = CleanupReport::default();

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot list upload area {}: {}", root.display(), e);
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("cannot read age of {}: {}", path.display(), e);
                    report.failed.push(path);
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match remove(&path) {
                Ok(()) => {
                    tracing::info!("deleted old upload {}", path.display());
                    report.deleted.push(path);
                }
                Err(e) => {
                    tracing::warn!("cannot delete old upload {}: {}", path.display(), e);
                    report.failed.push(path);
                }
            }
        }
        report
    }

    /// Runs the cleanup on the configured schedule until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + CLEANUP_INITIAL_DELAY;
        let mut ticker = tokio::time::interval_at(start, CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let cleaner = self.clone();
            let result =
                tokio::task::spawn_blocking(move || cleaner.delete_old_upload_folders(SystemTime::now()))
                    .await;
            match result {
                Ok(report) => tracing::debug!(
                    "upload cleanup deleted {} and failed on {} entries",
                    report.deleted.len(),
                    report.failed.len()
                ),
                Err(e) => tracing::error!("upload cleanup task failed: {}", e),
            }
        }
    }
}

fn remove(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
