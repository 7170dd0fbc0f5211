//! Audit-logged single file deletion.
//!
//! Files are only ever deleted from the entity's primary folder. Each deletion appends one
//! tab-separated line to the folder's `.deleted` ledger:
//!
//! ```text
//! DS1_R1.fastq	2024-03-01T10:15:00.123	2024-05-02T08:00:00.456
//! ```
//!
//! The ledger is append-only. The physical delete is authoritative: a failed ledger append is
//! logged and reported as a warning, never rolled back.

use crate::config::StorageConfig;
use crate::constants::DELETED_FILENAME;
use crate::entity::Entity;
use crate::{StorageError, StorageResult};
use chrono::{DateTime, Local, NaiveDateTime};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Component, Path},
};

const LEDGER_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One line of a `.deleted` ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionLedgerEntry {
    pub filename: String,
    pub last_modified: NaiveDateTime,
    pub deleted_at: NaiveDateTime,
}

impl DeletionLedgerEntry {
    pub fn render(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.filename,
            self.last_modified.format(LEDGER_TIMESTAMP_FORMAT),
            self.deleted_at.format(LEDGER_TIMESTAMP_FORMAT)
        )
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let filename = fields.next()?.to_owned();
        let last_modified = parse_timestamp(fields.next()?)?;
        let deleted_at = parse_timestamp(fields.next()?)?;
        if fields.next().is_some() || filename.is_empty() {
            return None;
        }
        Some(Self {
            filename,
            last_modified,
            deleted_at,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, LEDGER_TIMESTAMP_FORMAT).ok()
}

/// Outcome of a successful deletion.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub entry: DeletionLedgerEntry,
    /// Set when the file was deleted but the ledger could not be appended to.
    pub ledger_warning: Option<String>,
}

/// Deletes `path` from the primary folder of `entity` and records it in the ledger.
///
/// A relative `path` is resolved against the primary folder.
///
/// # Errors
///
/// Rejected before any I/O with:
/// - `StorageError::NotEditable` if the entity is not editable,
/// - `StorageError::NotSaved` if the entity was never persisted,
/// - `StorageError::Text` if the entity name is not a plain folder name,
/// - `StorageError::OutsidePrimaryFolder` unless the file sits directly in the primary folder,
/// - `StorageError::InvalidInput` when asked to delete the ledger itself.
///
/// Then fails with `StorageError::FileNotFound`, `StorageError::FileMetadata` or
/// `StorageError::FileDelete` if the file cannot be removed.
pub fn delete_file(cfg: &StorageConfig, entity: &Entity, path: &Path) -> StorageResult<DeleteOutcome> {
    if !entity.editable {
        return Err(StorageError::NotEditable(entity.to_string()));
    }
    if !entity.is_saved() {
        return Err(StorageError::NotSaved(entity.to_string()));
    }
    entity.folder_name()?;

    let folder = cfg.primary().folder(entity);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(StorageError::OutsidePrimaryFolder {
            path: path.to_path_buf(),
            folder,
        });
    }
    let file = if path.is_absolute() {
        path.to_path_buf()
    } else {
        folder.join(path)
    };
    if !is_direct_child(&file, &folder) {
        return Err(StorageError::OutsidePrimaryFolder { path: file, folder });
    }
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| StorageError::InvalidInput(format!("{} has no filename", file.display())))?;
    if filename == DELETED_FILENAME {
        return Err(StorageError::InvalidInput(
            "the deletion ledger cannot be deleted".into(),
        ));
    }

    let metadata = match fs::symlink_metadata(&file) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(StorageError::FileNotFound(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::FileNotFound(file))
        }
        Err(source) => return Err(StorageError::FileMetadata { path: file, source }),
    };
    let last_modified = metadata
        .modified()
        .map_err(|source| StorageError::FileMetadata {
            path: file.clone(),
            source,
        })?;

    fs::remove_file(&file).map_err(|source| StorageError::FileDelete {
        path: file.clone(),
        source,
    })?;
    tracing::info!("deleted {} from {}", filename, entity);

    let entry = DeletionLedgerEntry {
        filename,
        last_modified: DateTime::<Local>::from(last_modified).naive_local(),
        deleted_at: Local::now().naive_local(),
    };
    let ledger_warning = match append_entry(&folder.join(DELETED_FILENAME), &entry) {
        Ok(()) => None,
        Err(e) => {
            let message = format!(
                "deleted {} but could not record it in {}: {}",
                entry.filename,
                folder.join(DELETED_FILENAME).display(),
                e
            );
            tracing::warn!("{}", message);
            Some(message)
        }
    };

    Ok(DeleteOutcome {
        entry,
        ledger_warning,
    })
}

/// Reads the ledger of `folder`. A missing ledger is empty; unparsable lines are skipped.
pub fn read_ledger(folder: &Path) -> StorageResult<Vec<DeletionLedgerEntry>> {
    let path = folder.join(DELETED_FILENAME);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(content.lines().filter_map(DeletionLedgerEntry::parse).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(StorageError::StoreRead { path, source }),
    }
}

fn append_entry(ledger: &Path, entry: &DeletionLedgerEntry) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(ledger)?;
    writeln!(file, "{}", entry.render())
}

/// Lexical containment check: `file` must be `folder/<name>`.
fn is_direct_child(file: &Path, folder: &Path) -> bool {
    file.parent() == Some(folder)
}
