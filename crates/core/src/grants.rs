//! Public access grants.
//!
//! A grant makes one file of one entity downloadable without authentication until its expiry
//! date. Grants are keyed by `(entity kind, entity id, entity-relative path)`; granting again
//! overwrites the expiry. Expired grants are inactive but stay listed until revoked.

use crate::config::{StorageConfig, TokenMatch};
use crate::entity::{Entity, EntityId, EntityKind};
use crate::persist::{load_yaml, store_yaml};
use crate::{StorageError, StorageResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantKey {
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    /// Path relative to the entity folder, `/` separated.
    pub relative_path: String,
}

impl GrantKey {
    /// Builds the key of `path` for a saved `entity`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotSaved` if the entity has no id.
    pub fn for_path(cfg: &StorageConfig, entity: &Entity, path: &Path) -> StorageResult<Self> {
        let entity_id = entity
            .id
            .ok_or_else(|| StorageError::NotSaved(entity.to_string()))?;
        Ok(Self {
            entity_kind: entity.kind,
            entity_id,
            relative_path: relative_path(cfg, entity, path),
        })
    }

    /// Key of the same file after the entity token `old` became `new`.
    ///
    /// Only files directly in the entity folder are renamed, so nested paths and names already
    /// carrying `new` give `None`.
    pub fn renamed(&self, old: &str, new: &str) -> Option<Self> {
        if self.relative_path.contains('/') {
            return None;
        }
        if new.contains(old) && self.relative_path.contains(new) {
            return None;
        }
        let relative_path = TokenMatch::Substring.replace_first(&self.relative_path, old, new)?;
        Some(Self {
            relative_path,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessGrant {
    #[serde(flatten)]
    pub key: GrantKey,
    pub expiry_date: NaiveDate,
}

impl PublicAccessGrant {
    /// A grant is active up to and including its expiry date.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.expiry_date >= today
    }
}

/// Normalises `path` to a string relative to the entity folder.
///
/// The entity folder of any configured location is stripped. Relative or unrecognised paths
/// pass through unchanged.
pub fn relative_path(cfg: &StorageConfig, entity: &Entity, path: &Path) -> String {
    let relative = cfg
        .locations()
        .iter()
        .find_map(|location| path.strip_prefix(location.folder(entity)).ok())
        .unwrap_or(path);
    to_slash(relative)
}

fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_string_lossy().into_owned(),
            other => other.as_os_str().to_string_lossy().into_owned(),
        })
        .collect();
    if path.has_root() && parts.first().is_some_and(|p| p == "/") {
        format!("/{}", parts[1..].join("/"))
    } else {
        parts.join("/")
    }
}

/// Persistence of public access grants.
///
/// Upsert must be a single read-modify-write so concurrent grants do not lose each other.
pub trait GrantStore: Send + Sync {
    fn find(&self, key: &GrantKey) -> StorageResult<Option<PublicAccessGrant>>;

    /// Inserts `grant`, or overwrites the expiry of the grant with the same key.
    fn upsert(&self, grant: PublicAccessGrant) -> StorageResult<()>;

    /// Returns `false` if no grant had that key.
    fn remove(&self, key: &GrantKey) -> StorageResult<bool>;

    /// Removes every grant of one entity and returns how many were removed.
    fn remove_entity(&self, kind: EntityKind, id: EntityId) -> StorageResult<usize>;

    fn all(&self) -> StorageResult<Vec<PublicAccessGrant>>;
}

type GrantTable = BTreeMap<GrantKey, NaiveDate>;

fn remove_entity_from(table: &mut GrantTable, kind: EntityKind, id: EntityId) -> usize {
    let before = table.len();
    table.retain(|key, _| !(key.entity_kind == kind && key.entity_id == id));
    before - table.len()
}

fn to_grants(table: &GrantTable) -> Vec<PublicAccessGrant> {
    table
        .iter()
        .map(|(key, expiry_date)| PublicAccessGrant {
            key: key.clone(),
            expiry_date: *expiry_date,
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    table: Mutex<GrantTable>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut GrantTable) -> T) -> StorageResult<T> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| StorageError::StoreLockPoisoned)?;
        Ok(f(&mut table))
    }
}

impl GrantStore for InMemoryGrantStore {
    fn find(&self, key: &GrantKey) -> StorageResult<Option<PublicAccessGrant>> {
        self.with_table(|t| {
            t.get(key).map(|expiry_date| PublicAccessGrant {
                key: key.clone(),
                expiry_date: *expiry_date,
            })
        })
    }

    fn upsert(&self, grant: PublicAccessGrant) -> StorageResult<()> {
        self.with_table(|t| {
            t.insert(grant.key, grant.expiry_date);
        })
    }

    fn remove(&self, key: &GrantKey) -> StorageResult<bool> {
        self.with_table(|t| t.remove(key).is_some())
    }

    fn remove_entity(&self, kind: EntityKind, id: EntityId) -> StorageResult<usize> {
        self.with_table(|t| remove_entity_from(t, kind, id))
    }

    fn all(&self) -> StorageResult<Vec<PublicAccessGrant>> {
        self.with_table(|t| to_grants(t))
    }
}

/// Grants persisted as a YAML list.
#[derive(Debug)]
pub struct YamlGrantStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlGrantStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> StorageResult<GrantTable> {
        let grants: Vec<PublicAccessGrant> = load_yaml(&self.path)?;
        Ok(grants
            .into_iter()
            .map(|grant| (grant.key, grant.expiry_date))
            .collect())
    }

    fn read<T>(&self, f: impl FnOnce(&GrantTable) -> T) -> StorageResult<T> {
        let _guard = self.lock.lock().map_err(|_| StorageError::StoreLockPoisoned)?;
        Ok(f(&self.load()?))
    }

    fn update<T>(&self, f: impl FnOnce(&mut GrantTable) -> T) -> StorageResult<T> {
        let _guard = self.lock.lock().map_err(|_| StorageError::StoreLockPoisoned)?;
        let mut table = self.load()?;
        let result = f(&mut table);
        store_yaml(&self.path, &to_grants(&table))?;
        Ok(result)
    }
}

impl GrantStore for YamlGrantStore {
    fn find(&self, key: &GrantKey) -> StorageResult<Option<PublicAccessGrant>> {
        self.read(|t| {
            t.get(key).map(|expiry_date| PublicAccessGrant {
                key: key.clone(),
                expiry_date: *expiry_date,
            })
        })
    }

    fn upsert(&self, grant: PublicAccessGrant) -> StorageResult<()> {
        tracing::debug!(
            "granting public access to {}/{} until {}",
            grant.key.entity_id,
            grant.key.relative_path,
            grant.expiry_date
        );
        self.update(|t| {
            t.insert(grant.key, grant.expiry_date);
        })
    }

    fn remove(&self, key: &GrantKey) -> StorageResult<bool> {
        self.update(|t| t.remove(key).is_some())
    }

    fn remove_entity(&self, kind: EntityKind, id: EntityId) -> StorageResult<usize> {
        self.update(|t| remove_entity_from(t, kind, id))
    }

    fn all(&self) -> StorageResult<Vec<PublicAccessGrant>> {
        self.read(to_grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::{StorageLocation, UploadArea};
    use tempfile::TempDir;

    fn config() -> StorageConfig {
        StorageConfig::new(
            vec![
                StorageLocation::primary("/lanaseq/home"),
                StorageLocation::archive("/lanaseq/archive", 1),
            ],
            UploadArea::new("/lanaseq/upload"),
            "",
        )
        .unwrap()
    }

    fn dataset() -> Entity {
        let mut entity = Entity::dataset("DS1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        entity.id = Some(4);
        entity
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_relative_path_strips_any_location_folder() {
        let cfg = config();
        let entity = dataset();

        assert_eq!(
            relative_path(&cfg, &entity, Path::new("/lanaseq/home/datasets/2024/DS1/run.bw")),
            "run.bw"
        );
        assert_eq!(
            relative_path(
                &cfg,
                &entity,
                Path::new("/lanaseq/archive/datasets/2024/DS1/tracks/run.bw")
            ),
            "tracks/run.bw"
        );
        assert_eq!(relative_path(&cfg, &entity, Path::new("run.bw")), "run.bw");
        assert_eq!(
            relative_path(&cfg, &entity, Path::new("/elsewhere/run.bw")),
            "/elsewhere/run.bw"
        );
    }

    #[test]
    fn test_grant_key_requires_saved_entity() {
        let mut entity = dataset();
        entity.id = None;
        let result = GrantKey::for_path(&config(), &entity, Path::new("run.bw"));
        assert!(matches!(result, Err(StorageError::NotSaved(_))));
    }

    #[test]
    fn test_renamed_key_follows_file_rename() {
        let key = GrantKey {
            entity_kind: EntityKind::Dataset,
            entity_id: 4,
            relative_path: "DS1_R1.fastq".into(),
        };
        let renamed = key.renamed("DS1", "DS2").unwrap();
        assert_eq!(renamed.relative_path, "DS2_R1.fastq");
        assert_eq!(renamed.entity_id, 4);

        assert!(key.renamed("other", "DS2").is_none());
        assert!(key.renamed("DS1", "DS1_v2").is_some());
        assert!(renamed.renamed("DS2", "DS2_v2").is_some());
        let extended = GrantKey {
            relative_path: "DS1_v2_R1.fastq".into(),
            ..key.clone()
        };
        assert!(extended.renamed("DS1", "DS1_v2").is_none());
        let nested = GrantKey {
            relative_path: "qc/DS1_report.html".into(),
            ..key
        };
        assert!(nested.renamed("DS1", "DS2").is_none());
    }

    #[test]
    fn test_is_active_includes_expiry_day() {
        let grant = PublicAccessGrant {
            key: GrantKey::for_path(&config(), &dataset(), Path::new("run.bw")).unwrap(),
            expiry_date: date(2024, 5, 1),
        };
        assert!(grant.is_active(date(2024, 4, 30)));
        assert!(grant.is_active(date(2024, 5, 1)));
        assert!(!grant.is_active(date(2024, 5, 2)));
    }

    fn exercise(store: &dyn GrantStore) {
        let key = GrantKey::for_path(&config(), &dataset(), Path::new("run.bw")).unwrap();
        let other = GrantKey {
            relative_path: "other.bw".into(),
            ..key.clone()
        };

        store
            .upsert(PublicAccessGrant {
                key: key.clone(),
                expiry_date: date(2024, 5, 1),
            })
            .unwrap();
        store
            .upsert(PublicAccessGrant {
                key: key.clone(),
                expiry_date: date(2024, 6, 1),
            })
            .unwrap();
        store
            .upsert(PublicAccessGrant {
                key: other.clone(),
                expiry_date: date(2024, 1, 1),
            })
            .unwrap();

        assert_eq!(store.all().unwrap().len(), 2);
        assert_eq!(
            store.find(&key).unwrap().map(|g| g.expiry_date),
            Some(date(2024, 6, 1))
        );

        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert_eq!(store.find(&key).unwrap(), None);

        assert_eq!(store.remove_entity(EntityKind::Sample, 4).unwrap(), 0);
        assert_eq!(store.remove_entity(EntityKind::Dataset, 4).unwrap(), 1);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryGrantStore::new());
    }

    #[test]
    fn test_yaml_store() {
        let tmp = TempDir::new().unwrap();
        exercise(&YamlGrantStore::new(tmp.path().join("grants.yaml")));
    }

    #[test]
    fn test_yaml_store_persists_expired_grants() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("grants.yaml");
        let grant = PublicAccessGrant {
            key: GrantKey::for_path(&config(), &dataset(), Path::new("run.bw")).unwrap(),
            expiry_date: date(2000, 1, 1),
        };
        YamlGrantStore::new(&path).upsert(grant.clone()).unwrap();

        assert_eq!(YamlGrantStore::new(&path).all().unwrap(), vec![grant]);
    }
}
