//! File enumeration across storage locations.
//!
//! Enumeration is a read path: every I/O failure is logged and degrades to "no files from this
//! location" so a half-available archive never fails a listing. Results are best-effort
//! snapshots, since other tools may add or remove files between two calls.
//!
//! For each location, in configured order:
//!
//! 1. the entity's dedicated folder is listed (regular, non-hidden files only);
//! 2. if that contributes nothing, the location root is scanned for legacy files whose name
//!    contains the entity's canonical token, using the configured [`TokenMatch`] rule.
//!
//! The same filename in two locations yields two entries.

use crate::config::{StorageConfig, TokenMatch};
use crate::entity::Entity;
use crate::locations::{LocationKind, StorageLocation};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// A file found for an entity, tagged with the location it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFile {
    pub location: LocationKind,
    pub path: PathBuf,
}

impl EntityFile {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub fn is_primary(&self) -> bool {
        self.location.is_primary()
    }
}

/// Lists the files of `entity` across every configured location.
///
/// An unsaved entity yields an empty list without touching the filesystem.
pub fn files(cfg: &StorageConfig, entity: &Entity) -> Vec<EntityFile> {
    if !entity.is_saved() {
        return Vec::new();
    }

    let mut result = Vec::new();
    for location in cfg.locations() {
        let mut found = dedicated_files(location, entity);
        if found.is_empty() {
            found = legacy_files(location, entity.canonical_token(), cfg.token_match());
        }
        result.extend(found.into_iter().map(|path| EntityFile {
            location: location.kind(),
            path,
        }));
    }
    result
}

/// Lists the staged files of `entity` in the shared upload area.
///
/// This is the union of files in the upload root whose name starts with the entity name and
/// files inside the entity's upload subfolder.
pub fn upload_files(cfg: &StorageConfig, entity: &Entity) -> Vec<PathBuf> {
    if entity.name.is_empty() {
        return Vec::new();
    }

    let upload = cfg.upload();
    let mut result: Vec<PathBuf> = list_or_empty(upload.root())
        .into_iter()
        .filter(|path| file_name(path).is_some_and(|name| name.starts_with(&entity.name)))
        .collect();
    result.extend(list_or_empty(&upload.folder(entity)));
    result
}

/// Finds a regular file named `filename` in the dedicated folders of `entity`.
///
/// The legacy token scan is not consulted; the first location holding the file wins.
pub fn find_in_dedicated_folders(
    cfg: &StorageConfig,
    entity: &Entity,
    filename: &str,
) -> Option<PathBuf> {
    if filename.starts_with('.') {
        return None;
    }
    cfg.locations()
        .iter()
        .map(|location| location.folder(entity).join(filename))
        .find(|candidate| is_visible_file(candidate))
}

fn dedicated_files(location: &StorageLocation, entity: &Entity) -> Vec<PathBuf> {
    list_or_empty(&location.folder(entity))
}

fn legacy_files(location: &StorageLocation, token: &str, rule: TokenMatch) -> Vec<PathBuf> {
    if token.is_empty() {
        return Vec::new();
    }
    list_or_empty(location.root())
        .into_iter()
        .filter(|path| file_name(path).is_some_and(|name| rule.matches(name, token)))
        .collect()
}

fn list_or_empty(dir: &Path) -> Vec<PathBuf> {
    match list_visible_files(dir) {
        Ok(files) => files,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            tracing::warn!("cannot list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

/// Lists regular, non-hidden files directly inside `dir`, sorted by name.
pub(crate) fn list_visible_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::debug!("skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if is_visible_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_visible_file(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && !is_hidden(path, &metadata),
        Err(_) => false,
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

#[cfg(windows)]
fn is_hidden(path: &Path, metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
        || file_name(path).is_some_and(|name| name.starts_with('.'))
}

#[cfg(not(windows))]
fn is_hidden(path: &Path, _metadata: &fs::Metadata) -> bool {
    file_name(path).is_some_and(|name| name.starts_with('.'))
}
