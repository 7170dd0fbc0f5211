//! Upload staging.
//!
//! Two pieces of asynchronous machinery live here:
//!
//! - [`save_files`] copies (or moves) files into an entity's primary folder on a background
//!   task and returns a [`SaveFilesHandle`] the caller can await or cancel. Cancelling stops
//!   before the next file; files already saved are kept.
//! - [`RefreshLoop`] re-enumerates the upload area of one entity on a fixed interval and
//!   publishes the result over a `watch` channel. It carries the [`SessionIdentity`] it was
//!   started with and checks it on every tick. A [`StagingView`] owns at most one loop; opening
//!   a new one supersedes the previous.

use crate::auth::{Action, Authorizer, SessionIdentity};
use crate::config::StorageConfig;
use crate::constants::STAGING_REFRESH_INTERVAL;
use crate::entity::Entity;
use crate::enumerate::upload_files;
use crate::rename::move_file;
use crate::{StorageError, StorageResult};
use seqvault_types::FileName;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Maps a source file to the filename it is saved under.
pub type NameFn = Arc<dyn Fn(&Path) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transfer {
    #[default]
    Copy,
    /// Removes the source once saved, used when confirming staged uploads.
    Move,
}

#[derive(Debug, Default)]
pub struct SaveFilesReport {
    pub saved: Vec<PathBuf>,
    pub cancelled: bool,
}

/// Handle on a running [`save_files`] transfer.
#[derive(Debug)]
pub struct SaveFilesHandle {
    cancel: CancellationToken,
    task: JoinHandle<StorageResult<SaveFilesReport>>,
}

impl SaveFilesHandle {
    /// Stops the transfer before the next file.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> StorageResult<SaveFilesReport> {
        self.task
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Saves `files` into the primary folder of `entity` on a background task.
///
/// Each file keeps its name unless `name_fn` provides another. The folder is created when
/// missing. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Rejected synchronously with `StorageError::NotEditable` or `StorageError::NotSaved`. I/O
/// failures and invalid target names are returned by [`SaveFilesHandle::wait`]; files saved
/// before the failure are kept.
pub fn save_files(
    cfg: &StorageConfig,
    entity: &Entity,
    files: Vec<PathBuf>,
    name_fn: Option<NameFn>,
    transfer: Transfer,
) -> StorageResult<SaveFilesHandle> {
    if !entity.editable {
        return Err(StorageError::NotEditable(entity.to_string()));
    }
    if !entity.is_saved() {
        return Err(StorageError::NotSaved(entity.to_string()));
    }
    entity.folder_name()?;

    let folder = cfg.primary().folder(entity);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_save(
        folder,
        entity.to_string(),
        files,
        name_fn,
        transfer,
        cancel.clone(),
    ));

    Ok(SaveFilesHandle { cancel, task })
}

async fn run_save(
    folder: PathBuf,
    label: String,
    files: Vec<PathBuf>,
    name_fn: Option<NameFn>,
    transfer: Transfer,
    token: CancellationToken,
) -> StorageResult<SaveFilesReport> {
    let mut report = SaveFilesReport::default();
    for source in files {
        if token.is_cancelled() {
            tracing::info!(
                "saving files of {} cancelled after {} file(s)",
                label,
                report.saved.len()
            );
            report.cancelled = true;
            return Ok(report);
        }

        let name = match &name_fn {
            Some(name_fn) => name_fn(&source),
            None => source
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
                .ok_or_else(|| {
                    StorageError::InvalidInput(format!("{} has no filename", source.display()))
                })?,
        };
        let target = folder.join(FileName::new(name)?.as_str());

        let dir = folder.clone();
        let saved = target.clone();
        tokio::task::spawn_blocking(move || transfer_file(&dir, &source, &target, transfer))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;
        report.saved.push(saved);
    }
    tracing::info!("saved {} file(s) to {}", report.saved.len(), label);
    Ok(report)
}

fn transfer_file(folder: &Path, source: &Path, target: &Path, transfer: Transfer) -> StorageResult<()> {
    fs::create_dir_all(folder).map_err(|e| StorageError::FolderCreation {
        path: folder.to_path_buf(),
        source: e,
    })?;
    match transfer {
        Transfer::Copy => {
            fs::copy(source, target).map_err(|e| StorageError::FileCopy {
                from: source.to_path_buf(),
                to: target.to_path_buf(),
                source: e,
            })?;
        }
        Transfer::Move => move_file(source, target)?,
    }
    tracing::debug!("saved {} as {}", source.display(), target.display());
    Ok(())
}

/// Background refresh of one entity's upload area.
///
/// Dropping the loop stops it.
#[derive(Debug)]
pub struct RefreshLoop {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RefreshLoop {
    /// Starts refreshing the staged files of `entity` every `interval`.
    ///
    /// The first refresh happens immediately. The loop ends when stopped, when every receiver
    /// is dropped, or when `identity` loses read access to `entity`.
    pub fn spawn(
        cfg: Arc<StorageConfig>,
        entity: Entity,
        identity: SessionIdentity,
        authorizer: Arc<dyn Authorizer>,
        interval: Duration,
    ) -> (Self, watch::Receiver<Vec<PathBuf>>) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(Vec::new());
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !authorizer.has_permission(&identity, &entity, Action::Read) {
                    tracing::warn!("{} lost access to {}, stopping refresh", identity, entity);
                    break;
                }

                let cfg = cfg.clone();
                let target = entity.clone();
                let refresh = tokio::task::spawn_blocking(move || upload_files(&cfg, &target));
                let files = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    files = refresh => match files {
                        Ok(files) => files,
                        Err(e) => {
                            tracing::warn!("refreshing staged files of {} failed: {}", entity, e);
                            continue;
                        }
                    },
                };

                if tx.send(files).is_err() {
                    break;
                }
            }
            tracing::debug!("refresh loop {} for {} stopped", id, entity);
        });

        (Self { id, cancel, task }, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One interactive staging session.
pub struct StagingView {
    cfg: Arc<StorageConfig>,
    authorizer: Arc<dyn Authorizer>,
    identity: SessionIdentity,
    interval: Duration,
    current: Option<RefreshLoop>,
}

impl StagingView {
    pub fn new(
        cfg: Arc<StorageConfig>,
        authorizer: Arc<dyn Authorizer>,
        identity: SessionIdentity,
    ) -> Self {
        Self {
            cfg,
            authorizer,
            identity,
            interval: STAGING_REFRESH_INTERVAL,
            current: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts refreshing `entity`, superseding any loop this view was running.
    pub fn open(&mut self, entity: &Entity) -> watch::Receiver<Vec<PathBuf>> {
        self.close();
        let (refresh, rx) = RefreshLoop::spawn(
            self.cfg.clone(),
            entity.clone(),
            self.identity.clone(),
            self.authorizer.clone(),
            self.interval,
        );
        tracing::debug!("staging view of {} opened refresh loop {}", self.identity, refresh.id());
        self.current = Some(refresh);
        rx
    }

    pub fn close(&mut self) {
        if let Some(refresh) = self.current.take() {
            refresh.stop();
        }
    }

    pub fn current_loop(&self) -> Option<Uuid> {
        self.current.as_ref().map(RefreshLoop::id)
    }

    /// Moves staged files of `entity` into its primary folder.
    pub fn confirm(&self, entity: &Entity, files: Vec<PathBuf>) -> StorageResult<SaveFilesHandle> {
        if !self.authorizer.has_permission(&self.identity, entity, Action::Write) {
            return Err(StorageError::NotEditable(entity.to_string()));
        }
        save_files(&self.cfg, entity, files, None, Transfer::Move)
    }
}

impl Drop for StagingView {
    fn drop(&mut self) {
        self.close();
    }
}
