//! Storage service.
//!
//! [`StorageService`] is the entry point used by the HTTP boundary and the CLI. It combines the
//! resolved configuration with the two persistence collaborators (entities and grants) and
//! exposes every storage operation of an entity:
//!
//! - read paths ([`files`](StorageService::files), [`public_file`](StorageService::public_file),
//!   listings) degrade to empty results instead of failing;
//! - mutations ([`save`](StorageService::save), [`delete_file`](StorageService::delete_file),
//!   grants) reject preconditions before any I/O and surface I/O failures.
//!
//! Mutations of one entity are not serialised here. Callers run one interactive session per
//! entity at a time; two concurrent renames or deletes of the same entity race.

use crate::auth::{Authorizer, SessionIdentity};
use crate::config::StorageConfig;
use crate::constants::{ENTITIES_FILENAME, GRANTS_FILENAME};
use crate::entity::{Entity, EntityKind};
use crate::enumerate::{self, EntityFile};
use crate::grants::{GrantKey, GrantStore, PublicAccessGrant, YamlGrantStore};
use crate::ledger::{self, DeleteOutcome, DeletionLedgerEntry};
use crate::public_files::{self, PublicFile, PublicFileFilter};
use crate::rename::{synchronize_rename, RenameReport};
use crate::repository::{EntityRepository, YamlEntityRepository};
use crate::staging::{self, NameFn, SaveFilesHandle, StagingView, Transfer};
use crate::{StorageError, StorageResult};
use chrono::{Local, NaiveDate};
use seqvault_files::{is_sidecar, sidecar_path, verify_against_sidecar, FilesResult};
use seqvault_types::FileName;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Result of [`StorageService::save`].
#[derive(Debug)]
pub struct SavedEntity {
    pub entity: Entity,
    /// Present when the save renamed or moved the entity's folders.
    pub rename: Option<RenameReport>,
}

/// Result of [`StorageService::save_dataset`].
#[derive(Debug)]
pub struct SavedDataset {
    pub dataset: SavedEntity,
    /// Editable samples, in the order given.
    pub samples: Vec<SavedEntity>,
}

/// Result of checking one primary file against its `.md5` sidecar.
#[derive(Debug)]
pub struct ChecksumCheck {
    pub path: PathBuf,
    /// `Ok(false)` when the digest differs from the recorded one.
    pub result: FilesResult<bool>,
}

#[derive(Clone)]
pub struct StorageService {
    cfg: Arc<StorageConfig>,
    entities: Arc<dyn EntityRepository>,
    grants: Arc<dyn GrantStore>,
}

impl StorageService {
    pub fn new(
        cfg: Arc<StorageConfig>,
        entities: Arc<dyn EntityRepository>,
        grants: Arc<dyn GrantStore>,
    ) -> Self {
        Self {
            cfg,
            entities,
            grants,
        }
    }

    /// Service backed by the YAML catalogs kept in `state_dir`.
    pub fn with_state_dir(cfg: Arc<StorageConfig>, state_dir: &Path) -> Self {
        Self::new(
            cfg,
            Arc::new(YamlEntityRepository::new(state_dir.join(ENTITIES_FILENAME))),
            Arc::new(YamlGrantStore::new(state_dir.join(GRANTS_FILENAME))),
        )
    }

    pub fn config(&self) -> &Arc<StorageConfig> {
        &self.cfg
    }

    pub fn entities(&self) -> &dyn EntityRepository {
        self.entities.as_ref()
    }

    /// Primary folder of `entity`.
    pub fn folder(&self, entity: &Entity) -> PathBuf {
        self.cfg.primary().folder(entity)
    }

    /// Display labels of the entity folder, one per location.
    pub fn folder_labels(&self, entity: &Entity, posix: bool) -> Vec<String> {
        self.cfg
            .locations()
            .iter()
            .map(|location| location.label(entity, posix))
            .collect()
    }

    pub fn upload_label(&self, entity: &Entity, posix: bool) -> String {
        self.cfg.upload().label(entity, posix)
    }

    /// Creates the primary folder of `entity` ahead of an upload.
    pub fn create_folder(&self, entity: &Entity) -> StorageResult<PathBuf> {
        entity.folder_name()?;
        create_dir(self.folder(entity))
    }

    /// Creates the upload subfolder of `entity`.
    pub fn create_upload_folder(&self, entity: &Entity) -> StorageResult<PathBuf> {
        entity.folder_name()?;
        create_dir(self.cfg.upload().folder(entity))
    }

    pub fn files(&self, entity: &Entity) -> Vec<EntityFile> {
        enumerate::files(&self.cfg, entity)
    }

    pub fn upload_files(&self, entity: &Entity) -> Vec<PathBuf> {
        enumerate::upload_files(&self.cfg, entity)
    }

    /// Verifies every primary file of `entity` that has a checksum sidecar beside it.
    pub fn verify_checksums(&self, entity: &Entity) -> Vec<ChecksumCheck> {
        self.files(entity)
            .into_iter()
            .filter(|file| file.is_primary() && !is_sidecar(&file.path))
            .filter(|file| sidecar_path(&file.path).is_ok_and(|sidecar| sidecar.is_file()))
            .map(|file| {
                let result = verify_against_sidecar(&file.path);
                if let Err(e) = &result {
                    tracing::warn!("cannot verify {}: {}", file.path.display(), e);
                }
                ChecksumCheck {
                    path: file.path,
                    result,
                }
            })
            .collect()
    }

    /// Persists `entity`, regenerating its name and synchronising folders on rename.
    ///
    /// New entities are made editable and stamped with a creation date. When the primary
    /// location cannot be renamed the previous record is restored, so saving again retries the
    /// rename. Grants on renamed files follow them to their new names; a grant that cannot be
    /// moved is logged and left on the old name.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidInput` if a sample lists samples of its own,
    /// - `StorageError::NotEditable` if the stored entity is not editable,
    /// - `StorageError::NotSaved` if `entity` has an id that is not stored,
    /// - `StorageError::Text` if the generated name is not a plain folder name,
    /// - `StorageError::PrimaryRename` if the primary folder could not be renamed,
    /// - any repository error.
    pub fn save(&self, mut entity: Entity) -> StorageResult<SavedEntity> {
        if entity.kind == EntityKind::Sample && !entity.samples.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "{} is a sample and cannot list samples",
                entity
            )));
        }
        let previous = match entity.id {
            Some(id) => Some(
                self.entities
                    .get(entity.kind, id)?
                    .ok_or_else(|| StorageError::NotSaved(entity.to_string()))?,
            ),
            None => None,
        };

        match &previous {
            Some(previous) if !previous.editable => {
                return Err(StorageError::NotEditable(previous.to_string()));
            }
            Some(_) => {}
            None => {
                entity.editable = true;
                entity
                    .creation_date
                    .get_or_insert_with(|| Local::now().naive_local());
            }
        }
        entity.generate_name();
        entity.folder_name()?;
        let saved = self.entities.save(entity)?;
        tracing::info!("saved {}", saved);

        let Some(previous) = previous else {
            return Ok(SavedEntity {
                entity: saved,
                rename: None,
            });
        };
        if previous.name == saved.name && self.folder(&previous) == self.folder(&saved) {
            return Ok(SavedEntity {
                entity: saved,
                rename: None,
            });
        }

        match synchronize_rename(&self.cfg, &previous, &saved) {
            Ok(report) => {
                self.rekey_grants(&previous, &saved);
                Ok(SavedEntity {
                    entity: saved,
                    rename: Some(report),
                })
            }
            Err(error) => {
                if let Err(restore) = self.entities.save(previous) {
                    tracing::error!("could not restore {} after failed rename: {}", saved, restore);
                }
                Err(error)
            }
        }
    }

    /// Saves the editable `samples` of `dataset`, then the dataset linked to all of them.
    ///
    /// Every editable sample goes through [`save`](Self::save), so a sample whose metadata
    /// changed gets its folders and files renamed. Non-editable samples are linked as stored.
    /// Samples saved before a later failure stay saved.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidInput` if `dataset` is not a dataset or a sample is not a sample,
    /// - `StorageError::NotSaved` if a non-editable sample has no id,
    /// - the first error of [`save`](Self::save) for a sample or the dataset.
    pub fn save_dataset(
        &self,
        mut dataset: Entity,
        samples: Vec<Entity>,
    ) -> StorageResult<SavedDataset> {
        if dataset.kind != EntityKind::Dataset {
            return Err(StorageError::InvalidInput(format!("{} is not a dataset", dataset)));
        }
        if let Some(other) = samples.iter().find(|s| s.kind != EntityKind::Sample) {
            return Err(StorageError::InvalidInput(format!("{} is not a sample", other)));
        }
        if let Some(unsaved) = samples.iter().find(|s| !s.editable && s.id.is_none()) {
            return Err(StorageError::NotSaved(unsaved.to_string()));
        }

        let mut ids = Vec::with_capacity(samples.len());
        let mut saved_samples = Vec::new();
        for sample in samples {
            if !sample.editable {
                ids.extend(sample.id);
                continue;
            }
            let saved = self.save(sample)?;
            ids.extend(saved.entity.id);
            saved_samples.push(saved);
        }
        dataset.samples = ids;
        let saved = self.save(dataset)?;
        Ok(SavedDataset {
            dataset: saved,
            samples: saved_samples,
        })
    }

    /// Moves the grants of `previous` onto the file names given by its rename to `saved`.
    fn rekey_grants(&self, previous: &Entity, saved: &Entity) {
        let Some(id) = saved.id else { return };
        if previous.name == saved.name {
            return;
        }
        let grants = match self.grants.all() {
            Ok(grants) => grants,
            Err(e) => {
                tracing::warn!("could not read grants of renamed {}: {}", saved, e);
                return;
            }
        };
        for grant in grants
            .into_iter()
            .filter(|g| g.key.entity_kind == saved.kind && g.key.entity_id == id)
        {
            let Some(key) = grant.key.renamed(&previous.name, &saved.name) else {
                continue;
            };
            let moved = PublicAccessGrant {
                key: key.clone(),
                expiry_date: grant.expiry_date,
            };
            match self
                .grants
                .upsert(moved)
                .and_then(|()| self.grants.remove(&grant.key))
            {
                Ok(_) => tracing::debug!(
                    "grant {} moved to {}",
                    grant.key.relative_path,
                    key.relative_path
                ),
                Err(e) => tracing::warn!(
                    "grant {} of {} not moved: {}",
                    grant.key.relative_path,
                    saved,
                    e
                ),
            }
        }
    }

    /// Deletes `entity`, its grants and its primary folder. Archive folders are kept.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotEditable`, `StorageError::NotSaved` or `StorageError::Text`
    /// before any change, or a repository error. Failing to remove the folder is only logged.
    pub fn delete(&self, entity: &Entity) -> StorageResult<()> {
        if !entity.editable {
            return Err(StorageError::NotEditable(entity.to_string()));
        }
        let id = entity
            .id
            .ok_or_else(|| StorageError::NotSaved(entity.to_string()))?;
        entity.folder_name()?;

        self.entities.delete(entity.kind, id)?;
        let revoked = self.grants.remove_entity(entity.kind, id)?;
        tracing::info!("deleted {} and revoked {} grant(s)", entity, revoked);

        let folder = self.folder(entity);
        match fs::remove_dir_all(&folder) {
            Ok(()) => tracing::debug!("deleted folder {}", folder.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("could not delete folder {}: {}", folder.display(), e),
        }
        Ok(())
    }

    pub fn delete_file(&self, entity: &Entity, path: &Path) -> StorageResult<DeleteOutcome> {
        ledger::delete_file(&self.cfg, entity, path)
    }

    /// Deletion ledger of the entity's primary folder.
    pub fn deleted_files(&self, entity: &Entity) -> StorageResult<Vec<DeletionLedgerEntry>> {
        ledger::read_ledger(&self.folder(entity))
    }

    /// Grants public access to `path` until `expiry_date`, overwriting any previous expiry.
    pub fn allow_public_file_access(
        &self,
        entity: &Entity,
        path: &Path,
        expiry_date: NaiveDate,
    ) -> StorageResult<()> {
        let key = GrantKey::for_path(&self.cfg, entity, path)?;
        tracing::info!(
            "public access to {} of {} until {}",
            key.relative_path,
            entity,
            expiry_date
        );
        self.grants.upsert(PublicAccessGrant { key, expiry_date })
    }

    /// Revokes public access to `path`. Revoking a missing grant does nothing.
    pub fn revoke_public_file_access(&self, entity: &Entity, path: &Path) -> StorageResult<()> {
        let key = GrantKey::for_path(&self.cfg, entity, path)?;
        if self.grants.remove(&key)? {
            tracing::info!("revoked public access to {} of {}", key.relative_path, entity);
        }
        Ok(())
    }

    /// Whether `path` has an active grant today. The file itself is not consulted.
    pub fn is_file_public(&self, entity: &Entity, path: &Path) -> StorageResult<bool> {
        self.is_file_public_on(entity, path, today())
    }

    pub fn is_file_public_on(
        &self,
        entity: &Entity,
        path: &Path,
        today: NaiveDate,
    ) -> StorageResult<bool> {
        let key = GrantKey::for_path(&self.cfg, entity, path)?;
        Ok(self
            .grants
            .find(&key)?
            .is_some_and(|grant| grant.is_active(today)))
    }

    /// Resolves an anonymous request for `filename` of the entity named `entity_name`.
    ///
    /// Returns the first dedicated-folder file with that name when its grant is active today.
    /// Any failure resolves to `None`.
    pub fn public_file(&self, kind: EntityKind, entity_name: &str, filename: &str) -> Option<PathBuf> {
        self.public_file_on(kind, entity_name, filename, today())
    }

    pub fn public_file_on(
        &self,
        kind: EntityKind,
        entity_name: &str,
        filename: &str,
        today: NaiveDate,
    ) -> Option<PathBuf> {
        let filename = FileName::new(filename).ok()?;
        let entity = match self.entities.find_by_name(kind, entity_name) {
            Ok(entity) => entity?,
            Err(e) => {
                tracing::warn!("cannot look up {} {}: {}", kind, entity_name, e);
                return None;
            }
        };
        match self.is_file_public_on(&entity, Path::new(filename.as_str()), today) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!("cannot check grant of {} in {}: {}", filename, entity, e);
                return None;
            }
        }
        enumerate::find_in_dedicated_folders(&self.cfg, &entity, filename.as_str())
    }

    /// Every grant, active or expired, joined with its entity.
    pub fn public_files(&self) -> StorageResult<Vec<PublicFile>> {
        public_files::public_files(self.grants.all()?, self.entities.as_ref())
    }

    /// Download links of the public files accepted by `filter`, one URL per line.
    pub fn download_links(&self, filter: &PublicFileFilter) -> StorageResult<String> {
        let files = filter.apply(self.public_files()?);
        Ok(public_files::download_links(&self.cfg, &files))
    }

    /// Copies `files` into the primary folder of `entity` on a background task.
    pub fn save_files(
        &self,
        entity: &Entity,
        files: Vec<PathBuf>,
        name_fn: Option<NameFn>,
    ) -> StorageResult<SaveFilesHandle> {
        staging::save_files(&self.cfg, entity, files, name_fn, Transfer::Copy)
    }

    /// Opens an interactive staging session running as `identity`.
    pub fn staging_view(
        &self,
        authorizer: Arc<dyn Authorizer>,
        identity: SessionIdentity,
    ) -> StagingView {
        StagingView::new(self.cfg.clone(), authorizer, identity)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn create_dir(folder: PathBuf) -> StorageResult<PathBuf> {
    fs::create_dir_all(&folder).map_err(|source| StorageError::FolderCreation {
        path: folder.clone(),
        source,
    })?;
    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityMetadata;
    use crate::grants::InMemoryGrantStore;
    use crate::locations::{StorageLocation, UploadArea};
    use crate::repository::InMemoryEntityRepository;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        service: StorageService,
        grants: Arc<InMemoryGrantStore>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let cfg = StorageConfig::new(
            vec![
                StorageLocation::primary(tmp.path().join("home")),
                StorageLocation::archive(tmp.path().join("archive1"), 1),
                StorageLocation::archive(tmp.path().join("archive2"), 2),
            ],
            UploadArea::new(tmp.path().join("upload")),
            "https://lanaseq.example.org",
        )
        .unwrap();
        let grants = Arc::new(InMemoryGrantStore::new());
        let service = StorageService::new(
            Arc::new(cfg),
            Arc::new(InMemoryEntityRepository::new()),
            grants.clone(),
        );
        Fixture {
            _tmp: tmp,
            service,
            grants,
        }
    }

    fn new_dataset(name: &str) -> Entity {
        Entity::dataset(name, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn names(files: &[EntityFile]) -> Vec<String> {
        files
            .iter()
            .filter_map(|file| file.file_name().map(str::to_owned))
            .collect()
    }

    #[test]
    fn test_save_new_entity_is_editable_with_creation_date() {
        let f = fixture();
        let mut entity = new_dataset("DS1");
        entity.editable = false;

        let saved = f.service.save(entity).unwrap();
        assert!(saved.entity.editable);
        assert!(saved.entity.creation_date.is_some());
        assert!(saved.entity.id.is_some());
        assert!(saved.rename.is_none());
        assert!(f.service.files(&saved.entity).is_empty());
    }

    #[test]
    fn test_save_rename_updates_files_and_sidecars() {
        let f = fixture();
        let ds1 = f.service.save(new_dataset("DS1")).unwrap().entity;
        let folder = f.service.folder(&ds1);
        write(&folder.join("DS1_R1.fastq"), "reads");
        write(&folder.join("DS1_R1.fastq.md5"), "abcd  DS1_R1.fastq");

        let mut renamed = ds1.clone();
        renamed.name = "DS2".into();
        let saved = f.service.save(renamed).unwrap();
        assert!(saved.rename.unwrap().is_complete());

        let files = f.service.files(&saved.entity);
        assert_eq!(names(&files), vec!["DS2_R1.fastq", "DS2_R1.fastq.md5"]);
        assert_eq!(
            fs::read_to_string(f.service.folder(&saved.entity).join("DS2_R1.fastq.md5"))
                .unwrap()
                .trim_end(),
            "abcd  DS2_R1.fastq"
        );
        assert!(!folder.join("DS1_R1.fastq").exists());
        assert!(!folder.join("DS1_R1.fastq.md5").exists());
    }

    #[test]
    fn test_save_regenerates_name_from_metadata() {
        let f = fixture();
        let mut entity = new_dataset("placeholder");
        entity.metadata = EntityMetadata {
            assay: Some("ChIP-seq".into()),
            target: Some("Spt16".into()),
            strain: Some("yFR101".into()),
            date: NaiveDate::from_ymd_opt(2018, 12, 8),
            ..Default::default()
        };

        let saved = f.service.save(entity).unwrap().entity;
        assert_eq!(saved.name, "ChIPseq_Spt16_yFR101_20181208");
    }

    #[test]
    fn test_save_rejects_non_editable_entity() {
        let f = fixture();
        let mut saved = f.service.save(new_dataset("DS1")).unwrap().entity;
        saved.editable = false;
        f.service.entities().save(saved.clone()).unwrap();

        saved.name = "DS2".into();
        assert!(matches!(
            f.service.save(saved),
            Err(StorageError::NotEditable(_))
        ));
    }

    #[test]
    fn test_failed_primary_rename_restores_record() {
        let f = fixture();
        let ds1 = f.service.save(new_dataset("DS1")).unwrap().entity;
        write(&f.service.folder(&ds1).join("same.txt"), "old");
        let mut renamed = ds1.clone();
        renamed.name = "DS2".into();
        write(&f.service.folder(&renamed).join("same.txt"), "new");

        let result = f.service.save(renamed);
        assert!(matches!(result, Err(StorageError::PrimaryRename(_))));
        assert!(f
            .service
            .entities()
            .exists(EntityKind::Dataset, "DS1")
            .unwrap());
    }

    #[test]
    fn test_unsafe_entity_names_are_rejected_before_io() {
        let f = fixture();
        for name in ["", "..", "a/b"] {
            assert!(
                matches!(f.service.save(new_dataset(name)), Err(StorageError::Text(_))),
                "{name:?}"
            );
            assert!(!f.service.entities().exists(EntityKind::Dataset, name).unwrap());
        }

        let other = f.service.save(new_dataset("OTHER")).unwrap().entity;
        let precious = f.service.folder(&other).join("precious.fastq");
        write(&precious, "reads");

        let mut blank = new_dataset("");
        blank.id = other.id;
        assert!(matches!(
            f.service.delete(&blank),
            Err(StorageError::Text(_))
        ));
        assert!(precious.is_file());
        assert!(f
            .service
            .entities()
            .exists(EntityKind::Dataset, "OTHER")
            .unwrap());

        let mut parent = other.clone();
        parent.name = "..".into();
        assert!(matches!(
            f.service.save(parent),
            Err(StorageError::Text(_))
        ));
        assert!(precious.is_file());
        assert!(f
            .service
            .entities()
            .exists(EntityKind::Dataset, "OTHER")
            .unwrap());
    }

    #[test]
    fn test_rename_moves_grants_to_renamed_files() {
        let f = fixture();
        let ds1 = f.service.save(new_dataset("DS1")).unwrap().entity;
        let folder = f.service.folder(&ds1);
        write(&folder.join("DS1_R1.fastq"), "reads");
        write(&folder.join("notes.txt"), "notes");
        let expiry = today() + Duration::days(7);
        for file in ["DS1_R1.fastq", "notes.txt"] {
            f.service
                .allow_public_file_access(&ds1, Path::new(file), expiry)
                .unwrap();
        }

        let mut renamed = ds1.clone();
        renamed.name = "DS2".into();
        let ds2 = f.service.save(renamed).unwrap().entity;

        assert!(f
            .service
            .is_file_public(&ds2, Path::new("DS2_R1.fastq"))
            .unwrap());
        assert!(!f
            .service
            .is_file_public(&ds2, Path::new("DS1_R1.fastq"))
            .unwrap());
        assert!(f.service.is_file_public(&ds2, Path::new("notes.txt")).unwrap());
        assert_eq!(f.grants.all().unwrap().len(), 2);
        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS2", "DS2_R1.fastq"),
            Some(f.service.folder(&ds2).join("DS2_R1.fastq"))
        );
    }

    #[test]
    fn test_save_dataset_saves_and_renames_samples() {
        let f = fixture();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut locked = f.service.save(Entity::sample("LOCKED", date)).unwrap().entity;
        locked.editable = false;
        f.service.entities().save(locked.clone()).unwrap();

        let first = f
            .service
            .save_dataset(
                new_dataset("DS1"),
                vec![Entity::sample("S1", date), locked.clone()],
            )
            .unwrap();
        assert_eq!(first.samples.len(), 1);
        let s1 = first.samples[0].entity.clone();
        assert_eq!(
            first.dataset.entity.samples,
            vec![s1.id.unwrap(), locked.id.unwrap()]
        );

        let folder = f.service.folder(&s1);
        write(&folder.join("S1_R1.fastq"), "reads");
        let mut renamed = s1.clone();
        renamed.name = "S2".into();
        let mut relabelled = locked.clone();
        relabelled.name = "UNLOCKED".into();

        let second = f
            .service
            .save_dataset(first.dataset.entity.clone(), vec![renamed, relabelled])
            .unwrap();
        let s2 = &second.samples[0];
        assert!(s2.rename.as_ref().unwrap().is_complete());
        assert_eq!(names(&f.service.files(&s2.entity)), vec!["S2_R1.fastq"]);
        assert!(!folder.join("S1_R1.fastq").exists());
        assert!(f
            .service
            .entities()
            .exists(EntityKind::Sample, "LOCKED")
            .unwrap());
        assert!(!f
            .service
            .entities()
            .exists(EntityKind::Sample, "UNLOCKED")
            .unwrap());
        assert_eq!(second.dataset.entity.samples, first.dataset.entity.samples);
    }

    #[test]
    fn test_save_dataset_rejects_wrong_kinds() {
        let f = fixture();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches!(
            f.service.save_dataset(Entity::sample("S1", date), Vec::new()),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            f.service
                .save_dataset(new_dataset("DS1"), vec![new_dataset("DS2")]),
            Err(StorageError::InvalidInput(_))
        ));
        let mut unsaved = Entity::sample("S1", date);
        unsaved.editable = false;
        assert!(matches!(
            f.service.save_dataset(new_dataset("DS1"), vec![unsaved]),
            Err(StorageError::NotSaved(_))
        ));
        assert!(f.service.entities().all().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_primary_folder_and_grants_only() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        let primary = f.service.folder(&entity).join("a.bw");
        let archived = f.service.config().archives()[0].folder(&entity).join("a.bw");
        write(&primary, "a");
        write(&archived, "a");
        f.service
            .allow_public_file_access(&entity, Path::new("a.bw"), NaiveDate::MAX)
            .unwrap();

        f.service.delete(&entity).unwrap();

        assert!(!primary.exists());
        assert!(archived.is_file());
        assert!(f.grants.all().unwrap().is_empty());
        assert!(!f
            .service
            .entities()
            .exists(EntityKind::Dataset, "DS1")
            .unwrap());
    }

    #[test]
    fn test_same_filename_in_three_locations() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        for location in f.service.config().locations() {
            write(&location.folder(&entity).join("run_R1.fastq"), "reads");
        }

        let files = f.service.files(&entity);
        assert_eq!(files.len(), 3);
        let paths: std::collections::HashSet<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_delete_file_then_files_and_ledger() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        write(&f.service.folder(&entity).join("DS1_R1.fastq"), "reads");
        write(&f.service.folder(&entity).join("DS1_R2.fastq"), "reads");

        f.service
            .delete_file(&entity, Path::new("DS1_R1.fastq"))
            .unwrap();

        assert_eq!(names(&f.service.files(&entity)), vec!["DS1_R2.fastq"]);
        let ledger = f.service.deleted_files(&entity).unwrap();
        assert_eq!(ledger.last().unwrap().filename, "DS1_R1.fastq");
    }

    #[test]
    fn test_grant_lifecycle_is_metadata_only() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        let today = today();
        let path = f.service.folder(&entity).join("missing.bw");

        f.service
            .allow_public_file_access(&entity, &path, today)
            .unwrap();
        assert!(f.service.is_file_public(&entity, &path).unwrap());
        assert!(f
            .service
            .is_file_public(&entity, Path::new("missing.bw"))
            .unwrap());

        f.service
            .allow_public_file_access(&entity, &path, today - Duration::days(1))
            .unwrap();
        assert!(!f.service.is_file_public(&entity, &path).unwrap());

        f.service
            .allow_public_file_access(&entity, &path, today + Duration::days(3))
            .unwrap();
        f.service.revoke_public_file_access(&entity, &path).unwrap();
        assert!(!f.service.is_file_public(&entity, &path).unwrap());
        f.service.revoke_public_file_access(&entity, &path).unwrap();

        let existing = f.service.folder(&entity).join("present.bw");
        write(&existing, "x");
        assert!(!f.service.is_file_public(&entity, &existing).unwrap());
    }

    #[test]
    fn test_public_file_follows_grant_expiry() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        let file = f.service.folder(&entity).join("run_R1.fastq");
        write(&file, "reads");
        let today = today();

        f.service
            .allow_public_file_access(&entity, Path::new("run_R1.fastq"), today)
            .unwrap();
        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS1", "run_R1.fastq"),
            Some(file)
        );

        let key = GrantKey::for_path(
            f.service.config(),
            &entity,
            Path::new("run_R1.fastq"),
        )
        .unwrap();
        f.grants
            .upsert(PublicAccessGrant {
                key,
                expiry_date: today - Duration::days(1),
            })
            .unwrap();
        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS1", "run_R1.fastq"),
            None
        );
    }

    #[test]
    fn test_public_file_rejects_unknown_and_unsafe_requests() {
        let f = fixture();
        let entity = f.service.save(new_dataset("DS1")).unwrap().entity;
        let legacy = f.service.config().primary().root().join("DS1_legacy.bw");
        write(&legacy, "x");
        f.service
            .allow_public_file_access(&entity, Path::new("DS1_legacy.bw"), NaiveDate::MAX)
            .unwrap();

        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS1", "DS1_legacy.bw"),
            None
        );
        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS1", "../DS1_legacy.bw"),
            None
        );
        assert_eq!(
            f.service
                .public_file(EntityKind::Sample, "DS1", "DS1_legacy.bw"),
            None
        );
        assert_eq!(
            f.service
                .public_file(EntityKind::Dataset, "DS9", "DS1_legacy.bw"),
            None
        );
    }

    #[test]
    fn test_download_links_use_filter() {
        let f = fixture();
        let ds1 = f.service.save(new_dataset("DS1")).unwrap().entity;
        let ds2 = f.service.save(new_dataset("DS2")).unwrap().entity;
        f.service
            .allow_public_file_access(&ds1, Path::new("a.bw"), NaiveDate::MAX)
            .unwrap();
        f.service
            .allow_public_file_access(&ds2, Path::new("b.bw"), NaiveDate::MAX)
            .unwrap();

        let filter = PublicFileFilter {
            entity_name_contains: Some("ds2".into()),
            ..Default::default()
        };
        assert_eq!(
            f.service.download_links(&filter).unwrap(),
            "https://lanaseq.example.org/dataset-file/DS2/b.bw"
        );
        assert_eq!(f.service.public_files().unwrap().len(), 2);
    }

    #[test]
    fn test_verify_checksums_reports_mismatches() {
        let f = fixture();
        let ds1 = f.service.save(new_dataset("DS1")).unwrap().entity;
        let folder = f.service.folder(&ds1);
        write(&folder.join("DS1_R1.fastq"), "reads");
        write(&folder.join("DS1_R2.fastq"), "reads");
        write(&folder.join("DS1.bw"), "track");
        seqvault_files::write_sidecar(&folder.join("DS1_R1.fastq")).unwrap();
        seqvault_files::write_sidecar(&folder.join("DS1_R2.fastq")).unwrap();
        fs::write(folder.join("DS1_R2.fastq"), "tampered").unwrap();

        let checks = f.service.verify_checksums(&ds1);
        let outcomes: Vec<(String, bool)> = checks
            .iter()
            .map(|check| {
                (
                    check.path.file_name().unwrap().to_string_lossy().into_owned(),
                    *check.result.as_ref().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("DS1_R1.fastq".to_string(), true),
                ("DS1_R2.fastq".to_string(), false)
            ]
        );
    }

    #[test]
    fn test_state_dir_catalogs_survive_restart() {
        let f = fixture();
        let state = TempDir::new().unwrap();
        let service = StorageService::with_state_dir(f.service.config().clone(), state.path());
        let entity = service.save(new_dataset("DS1")).unwrap().entity;
        service
            .allow_public_file_access(
                &entity,
                Path::new("a.bw"),
                NaiveDate::from_ymd_opt(2999, 12, 31).unwrap(),
            )
            .unwrap();

        let reopened = StorageService::with_state_dir(f.service.config().clone(), state.path());
        assert!(reopened.entities().exists(EntityKind::Dataset, "DS1").unwrap());
        assert!(reopened
            .is_file_public(&entity, Path::new("a.bw"))
            .unwrap());
        assert!(state.path().join(ENTITIES_FILENAME).is_file());
        assert!(state.path().join(GRANTS_FILENAME).is_file());
    }

    #[test]
    fn test_labels() {
        let f = fixture();
        let entity = new_dataset("DS1");
        let labels = f.service.folder_labels(&entity, true);
        assert_eq!(labels.len(), 3);
        assert!(labels[0].ends_with("home/datasets/2024/DS1"));
        assert!(f.service.upload_label(&entity, true).ends_with("upload/DS1"));
    }
}
