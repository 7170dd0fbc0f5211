//! Rename/move synchronisation across storage locations.
//!
//! When an entity's name (or year folder) changes, every location is brought in line with a
//! sequence of idempotent "ensure renamed" steps:
//!
//! 1. move the old dedicated folder to the new one, merging file by file when the destination
//!    already exists;
//! 2. rename files carrying the old token, in the dedicated folder and in the legacy root,
//!    after checking that no target name is taken;
//! 3. rewrite checksum sidecars whose entries name a renamed file.
//!
//! Locations are independent. A failing archive is logged and reported; the loop carries on.
//! A failing primary location fails the whole operation once every location was attempted.
//! Re-running a partially applied rename finishes the remaining work.

use crate::config::{StorageConfig, TokenMatch};
use crate::enumerate::list_visible_files;
use crate::entity::Entity;
use crate::locations::StorageLocation;
use crate::{StorageError, StorageResult};
use seqvault_files::{is_sidecar, ChecksumSidecar};
use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

/// Archive locations that could not be brought in line with a rename.
#[derive(Debug, Default)]
pub struct RenameReport {
    pub failures: Vec<LocationFailure>,
}

impl RenameReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct LocationFailure {
    pub root: PathBuf,
    pub error: StorageError,
}

/// Applies the rename of `old` into `new` to every configured location.
///
/// # Errors
///
/// Returns `StorageError::Text` before any I/O if either name is not a plain folder name, and
/// `StorageError::PrimaryRename` wrapping the primary location's failure. Archive failures
/// never fail the call; they are returned in the [`RenameReport`].
pub fn synchronize_rename(
    cfg: &StorageConfig,
    old: &Entity,
    new: &Entity,
) -> StorageResult<RenameReport> {
    old.folder_name()?;
    new.folder_name()?;
    let mut report = RenameReport::default();
    let mut primary_failure = None;

    for location in cfg.locations() {
        match ensure_renamed(location, old, new, cfg.token_match()) {
            Ok(()) => {}
            Err(error) if location.is_primary() => {
                tracing::error!(
                    "renaming {} to {} failed in primary location {}: {}",
                    old.name,
                    new.name,
                    location.root().display(),
                    error
                );
                primary_failure = Some(error);
            }
            Err(error) => {
                tracing::warn!(
                    "renaming {} to {} failed in archive location {}: {}",
                    old.name,
                    new.name,
                    location.root().display(),
                    error
                );
                report.failures.push(LocationFailure {
                    root: location.root().to_path_buf(),
                    error,
                });
            }
        }
    }

    match primary_failure {
        Some(error) => Err(StorageError::PrimaryRename(Box::new(error))),
        None => Ok(report),
    }
}

fn ensure_renamed(
    location: &StorageLocation,
    old: &Entity,
    new: &Entity,
    rule: TokenMatch,
) -> StorageResult<()> {
    let old_folder = location.folder(old);
    let new_folder = location.folder(new);
    if old_folder != new_folder && old_folder.is_dir() {
        move_folder(&old_folder, &new_folder)?;
    }

    let old_token = old.canonical_token();
    let new_token = new.canonical_token();
    if old_token.is_empty() || old_token == new_token {
        return Ok(());
    }

    if new_folder.is_dir() {
        rename_files(&new_folder, old_token, new_token, TokenMatch::Substring)?;
    }
    if location.root().is_dir() {
        rename_files(location.root(), old_token, new_token, rule)?;
    }
    Ok(())
}

/// Moves `from` to `to`, creating missing parents.
///
/// An existing destination is merged into file by file; files are never overwritten.
///
/// # Errors
///
/// Returns `StorageError::MergeConflict` listing files left behind because the destination
/// already held a file of the same name, or the I/O error that stopped the move.
pub(crate) fn move_folder(from: &Path, to: &Path) -> StorageResult<()> {
    if !to.exists() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::FolderCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        match fs::rename(from, to) {
            Ok(()) => {
                tracing::debug!("moved folder {} to {}", from.display(), to.display());
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(
                    "folder rename {} to {} failed, merging file by file: {}",
                    from.display(),
                    to.display(),
                    e
                );
            }
        }
    }

    let mut conflicts = Vec::new();
    merge_folder(from, to, &mut conflicts)?;
    if conflicts.is_empty() {
        tracing::debug!("merged folder {} into {}", from.display(), to.display());
        Ok(())
    } else {
        Err(StorageError::MergeConflict {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            files: conflicts,
        })
    }
}

fn merge_folder(from: &Path, to: &Path, conflicts: &mut Vec<PathBuf>) -> StorageResult<()> {
    fs::create_dir_all(to).map_err(|source| StorageError::FolderCreation {
        path: to.to_path_buf(),
        source,
    })?;

    let entries = fs::read_dir(from).map_err(|source| folder_move_error(from, to, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| folder_move_error(from, to, source))?;
        let source_path = entry.path();
        let target_path = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|source| folder_move_error(from, to, source))?;

        if file_type.is_dir() {
            merge_folder(&source_path, &target_path, conflicts)?;
        } else if target_path.exists() {
            conflicts.push(source_path);
        } else {
            move_file(&source_path, &target_path)?;
        }
    }

    // Only succeeds once everything was moved out.
    if let Err(e) = fs::remove_dir(from) {
        tracing::debug!("keeping folder {}: {}", from.display(), e);
    }
    Ok(())
}

pub(crate) fn move_file(from: &Path, to: &Path) -> StorageResult<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|source| StorageError::FileCopy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    fs::remove_file(from).map_err(|source| StorageError::FileDelete {
        path: from.to_path_buf(),
        source,
    })
}

fn folder_move_error(from: &Path, to: &Path, source: io::Error) -> StorageError {
    StorageError::FolderMove {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

/// Renames files of `dir` carrying `old_token`, then points checksum sidecars at the new names.
///
/// Every target is checked before the first rename, so a collision leaves the folder untouched.
fn rename_files(dir: &Path, old_token: &str, new_token: &str, rule: TokenMatch) -> StorageResult<()> {
    let files = list_visible_files(dir).map_err(|source| StorageError::FolderMove {
        from: dir.to_path_buf(),
        to: dir.to_path_buf(),
        source,
    })?;

    let renames: Vec<(PathBuf, PathBuf)> = files
        .iter()
        .filter_map(|path| {
            let name = file_name(path)?;
            // Already renamed when the new token extends the old one.
            if new_token.contains(old_token) && name.contains(new_token) {
                return None;
            }
            let renamed = rule.replace_first(name, old_token, new_token)?;
            Some((path.clone(), dir.join(renamed)))
        })
        .collect();

    let mut targets = HashSet::new();
    for (_, to) in &renames {
        if to.exists() || !targets.insert(to) {
            return Err(StorageError::RenameTargetExists(to.clone()));
        }
    }

    for (from, to) in &renames {
        fs::rename(from, to).map_err(|source| StorageError::FileRename {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        tracing::debug!("renamed {} to {}", from.display(), to.display());
    }

    rewrite_sidecars(dir, old_token, new_token, rule)
}

/// Rewrites sidecar entries of `dir` that name a missing file whose renamed counterpart exists.
///
/// Hashes are kept. Entries naming files that still exist are never touched, so running this
/// again after a partial rename only finishes the remaining work.
fn rewrite_sidecars(dir: &Path, old_token: &str, new_token: &str, rule: TokenMatch) -> StorageResult<()> {
    let files = list_visible_files(dir).map_err(|source| StorageError::FolderMove {
        from: dir.to_path_buf(),
        to: dir.to_path_buf(),
        source,
    })?;

    for sidecar_path in files.iter().filter(|path| is_sidecar(path)) {
        let mut sidecar = ChecksumSidecar::read(sidecar_path)?;
        let moved: Vec<(String, String)> = sidecar
            .entries()
            .filter(|entry| !dir.join(&entry.filename).exists())
            .filter_map(|entry| {
                let renamed = rule.replace_first(&entry.filename, old_token, new_token)?;
                dir.join(&renamed)
                    .is_file()
                    .then(|| (entry.filename.clone(), renamed))
            })
            .collect();

        let mut changed = false;
        for (old_name, new_name) in &moved {
            changed |= sidecar.rename_file(old_name, new_name);
        }
        if changed {
            sidecar.write(sidecar_path)?;
            tracing::debug!("rewrote sidecar {}", sidecar_path.display());
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::UploadArea;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> StorageConfig {
        StorageConfig::new(
            vec![
                StorageLocation::primary(tmp.path().join("home")),
                StorageLocation::archive(tmp.path().join("archive"), 1),
            ],
            UploadArea::new(tmp.path().join("upload")),
            "",
        )
        .unwrap()
    }

    fn dataset(name: &str) -> Entity {
        let mut entity = Entity::dataset(name, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        entity.id = Some(7);
        entity
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_rename_moves_folder_and_rewrites_sidecar() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let old_folder = cfg.primary().folder(&ds1);
        write(&old_folder.join("DS1_R1.fastq"), "reads");
        write(&old_folder.join("DS1_R1.fastq.md5"), "abcd  DS1_R1.fastq");

        let report = synchronize_rename(&cfg, &ds1, &ds2).unwrap();
        assert!(report.is_complete());

        let new_folder = cfg.primary().folder(&ds2);
        assert!(!old_folder.exists());
        assert_eq!(fs::read_to_string(new_folder.join("DS2_R1.fastq")).unwrap(), "reads");
        assert_eq!(
            fs::read_to_string(new_folder.join("DS2_R1.fastq.md5"))
                .unwrap()
                .trim_end(),
            "abcd  DS2_R1.fastq"
        );
        assert!(!new_folder.join("DS1_R1.fastq").exists());
        assert!(!new_folder.join("DS1_R1.fastq.md5").exists());
    }

    #[test]
    fn test_rename_round_trip_restores_names_and_sidecar() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let folder = cfg.primary().folder(&ds1);
        write(&folder.join("DS1_R1.fastq"), "reads");
        write(&folder.join("DS1_R1.fastq.md5"), "abcd  DS1_R1.fastq\n");

        synchronize_rename(&cfg, &ds1, &ds2).unwrap();
        synchronize_rename(&cfg, &ds2, &ds1).unwrap();

        assert_eq!(
            fs::read_to_string(folder.join("DS1_R1.fastq.md5")).unwrap(),
            "abcd  DS1_R1.fastq\n"
        );
        assert!(folder.join("DS1_R1.fastq").is_file());
    }

    #[test]
    fn test_rename_applies_to_archives_and_legacy_root() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let archive = &cfg.archives()[0];
        write(&archive.folder(&ds1).join("DS1.bw"), "track");
        write(&archive.root().join("DS1_legacy.bam"), "bam");

        synchronize_rename(&cfg, &ds1, &ds2).unwrap();

        assert!(archive.folder(&ds2).join("DS2.bw").is_file());
        assert!(archive.root().join("DS2_legacy.bam").is_file());
        assert!(!archive.root().join("DS1_legacy.bam").exists());
    }

    #[test]
    fn test_rename_merges_into_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        write(&cfg.primary().folder(&ds1).join("a.txt"), "a");
        write(&cfg.primary().folder(&ds2).join("b.txt"), "b");

        synchronize_rename(&cfg, &ds1, &ds2).unwrap();

        let new_folder = cfg.primary().folder(&ds2);
        assert!(new_folder.join("a.txt").is_file());
        assert!(new_folder.join("b.txt").is_file());
        assert!(!cfg.primary().folder(&ds1).exists());
    }

    #[test]
    fn test_primary_merge_conflict_fails_but_archives_are_renamed() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        write(&cfg.primary().folder(&ds1).join("same.txt"), "old");
        write(&cfg.primary().folder(&ds2).join("same.txt"), "new");
        write(&cfg.archives()[0].folder(&ds1).join("DS1.bw"), "track");

        let result = synchronize_rename(&cfg, &ds1, &ds2);
        match result {
            Err(StorageError::PrimaryRename(inner)) => {
                assert!(matches!(*inner, StorageError::MergeConflict { .. }))
            }
            other => panic!("expected primary failure, got {other:?}"),
        }

        assert_eq!(
            fs::read_to_string(cfg.primary().folder(&ds2).join("same.txt")).unwrap(),
            "new"
        );
        assert!(cfg.primary().folder(&ds1).join("same.txt").is_file());
        assert!(cfg.archives()[0].folder(&ds2).join("DS2.bw").is_file());
    }

    #[test]
    fn test_archive_failure_is_reported_not_raised() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let archive = &cfg.archives()[0];
        write(&archive.folder(&ds1).join("DS1.bw"), "one");
        write(&archive.folder(&ds1).join("DS2.bw"), "two");

        let report = synchronize_rename(&cfg, &ds1, &ds2).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            StorageError::RenameTargetExists(_)
        ));
        assert_eq!(
            fs::read_to_string(archive.folder(&ds2).join("DS2.bw")).unwrap(),
            "two"
        );
    }

    #[test]
    fn test_rename_collision_leaves_files_and_sidecars_untouched() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        write(&cfg.primary().folder(&ds1).join("DS1.bw"), "one");
        write(&cfg.primary().folder(&ds1).join("DS1.bw.md5"), "abcd  DS1.bw\n");
        write(&cfg.primary().folder(&ds1).join("DS2.bw"), "two");

        let result = synchronize_rename(&cfg, &ds1, &ds2);
        match result {
            Err(StorageError::PrimaryRename(inner)) => {
                assert!(matches!(*inner, StorageError::RenameTargetExists(_)))
            }
            other => panic!("expected primary failure, got {other:?}"),
        }

        let folder = cfg.primary().folder(&ds2);
        assert_eq!(fs::read_to_string(folder.join("DS1.bw")).unwrap(), "one");
        assert_eq!(fs::read_to_string(folder.join("DS2.bw")).unwrap(), "two");
        assert_eq!(
            fs::read_to_string(folder.join("DS1.bw.md5")).unwrap(),
            "abcd  DS1.bw\n"
        );
        assert!(!folder.join("DS2.bw.md5").exists());
    }

    #[test]
    fn test_rename_rewrites_combined_sidecar() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let folder = cfg.primary().folder(&ds1);
        write(&folder.join("DS1_R1.fastq"), "r1");
        write(&folder.join("DS1_R2.fastq"), "r2");
        write(&folder.join("notes.txt"), "notes");
        write(
            &folder.join("checksums.md5"),
            "aaaa  DS1_R1.fastq\nbbbb  DS1_R2.fastq\ncccc  notes.txt\n",
        );

        synchronize_rename(&cfg, &ds1, &ds2).unwrap();

        assert_eq!(
            fs::read_to_string(cfg.primary().folder(&ds2).join("checksums.md5")).unwrap(),
            "aaaa  DS2_R1.fastq\nbbbb  DS2_R2.fastq\ncccc  notes.txt\n"
        );
    }

    #[test]
    fn test_rerun_repairs_sidecar_left_behind() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (ds1, ds2) = (dataset("DS1"), dataset("DS2"));
        let folder = cfg.primary().folder(&ds2);
        // Data file renamed by an interrupted run, sidecar not yet rewritten.
        write(&folder.join("DS2.bw"), "track");
        write(&folder.join("DS2.bw.md5"), "abcd  DS1.bw\n");

        synchronize_rename(&cfg, &ds1, &ds2).unwrap();

        assert_eq!(
            fs::read_to_string(folder.join("DS2.bw.md5")).unwrap(),
            "abcd  DS2.bw\n"
        );
    }

    #[test]
    fn test_rename_is_idempotent_when_new_token_extends_old() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let (old, new) = (dataset("DS1"), dataset("DS1_v2"));
        write(&cfg.primary().folder(&old).join("DS1_R1.fastq"), "reads");

        synchronize_rename(&cfg, &old, &new).unwrap();
        synchronize_rename(&cfg, &old, &new).unwrap();

        let names: Vec<_> = list_visible_files(&cfg.primary().folder(&new))
            .unwrap()
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["DS1_v2_R1.fastq"]);
    }

    #[test]
    fn test_year_change_moves_folder_only() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let old = dataset("DS1");
        let mut new = dataset("DS1");
        new.date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        write(&cfg.primary().folder(&old).join("DS1.bw"), "track");

        synchronize_rename(&cfg, &old, &new).unwrap();

        assert!(cfg.primary().folder(&new).join("DS1.bw").is_file());
        assert!(cfg.primary().folder(&new).ends_with("datasets/2025/DS1"));
    }
}
