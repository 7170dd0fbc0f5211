//! Entity persistence collaborator.
//!
//! The engine needs very little from entity persistence: lookups by id and by name, a save that
//! assigns ids, and a delete. Two implementations are provided, one in memory for tests and one
//! backed by a YAML catalog for the binaries.

use crate::entity::{Entity, EntityId, EntityKind};
use crate::persist::{load_yaml, store_yaml};
use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait EntityRepository: Send + Sync {
    fn get(&self, kind: EntityKind, id: EntityId) -> StorageResult<Option<Entity>>;

    fn find_by_name(&self, kind: EntityKind, name: &str) -> StorageResult<Option<Entity>>;

    fn exists(&self, kind: EntityKind, name: &str) -> StorageResult<bool> {
        Ok(self.find_by_name(kind, name)?.is_some())
    }

    /// Persists `entity`, assigning an id to new entities, and returns the stored value.
    fn save(&self, entity: Entity) -> StorageResult<Entity>;

    /// Returns `false` if no such entity was stored.
    fn delete(&self, kind: EntityKind, id: EntityId) -> StorageResult<bool>;

    fn all(&self) -> StorageResult<Vec<Entity>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntityCatalog {
    #[serde(default)]
    next_id: EntityId,
    #[serde(default)]
    entities: Vec<Entity>,
}

impl EntityCatalog {
    fn get(&self, kind: EntityKind, id: EntityId) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.kind == kind && e.id == Some(id))
    }

    fn find_by_name(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.kind == kind && e.name == name)
    }

    fn save(&mut self, mut entity: Entity) -> StorageResult<Entity> {
        if let Some(other) = self.find_by_name(entity.kind, &entity.name) {
            if other.id != entity.id {
                return Err(StorageError::InvalidInput(format!(
                    "{} {} already exists",
                    entity.kind, entity.name
                )));
            }
        }

        match entity.id {
            Some(id) => {
                let slot = self
                    .entities
                    .iter_mut()
                    .find(|e| e.kind == entity.kind && e.id == Some(id))
                    .ok_or_else(|| StorageError::NotSaved(entity.to_string()))?;
                *slot = entity.clone();
            }
            None => {
                self.next_id += 1;
                entity.id = Some(self.next_id);
                self.entities.push(entity.clone());
            }
        }
        Ok(entity)
    }

    fn delete(&mut self, kind: EntityKind, id: EntityId) -> bool {
        let before = self.entities.len();
        self.entities.retain(|e| !(e.kind == kind && e.id == Some(id)));
        self.entities.len() != before
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntityRepository {
    catalog: Mutex<EntityCatalog>,
}

impl InMemoryEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_catalog<T>(&self, f: impl FnOnce(&mut EntityCatalog) -> StorageResult<T>) -> StorageResult<T> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StorageError::StoreLockPoisoned)?;
        f(&mut catalog)
    }
}

impl EntityRepository for InMemoryEntityRepository {
    fn get(&self, kind: EntityKind, id: EntityId) -> StorageResult<Option<Entity>> {
        self.with_catalog(|c| Ok(c.get(kind, id).cloned()))
    }

    fn find_by_name(&self, kind: EntityKind, name: &str) -> StorageResult<Option<Entity>> {
        self.with_catalog(|c| Ok(c.find_by_name(kind, name).cloned()))
    }

    fn save(&self, entity: Entity) -> StorageResult<Entity> {
        self.with_catalog(|c| c.save(entity))
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> StorageResult<bool> {
        self.with_catalog(|c| Ok(c.delete(kind, id)))
    }

    fn all(&self) -> StorageResult<Vec<Entity>> {
        self.with_catalog(|c| Ok(c.entities.clone()))
    }
}

/// Entity catalog persisted as a YAML file.
#[derive(Debug)]
pub struct YamlEntityRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlEntityRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&EntityCatalog) -> T) -> StorageResult<T> {
        let _guard = self.lock.lock().map_err(|_| StorageError::StoreLockPoisoned)?;
        let catalog: EntityCatalog = load_yaml(&self.path)?;
        Ok(f(&catalog))
    }

    fn update<T>(&self, f: impl FnOnce(&mut EntityCatalog) -> StorageResult<T>) -> StorageResult<T> {
        let _guard = self.lock.lock().map_err(|_| StorageError::StoreLockPoisoned)?;
        let mut catalog: EntityCatalog = load_yaml(&self.path)?;
        let result = f(&mut catalog)?;
        store_yaml(&self.path, &catalog)?;
        Ok(result)
    }
}

impl EntityRepository for YamlEntityRepository {
    fn get(&self, kind: EntityKind, id: EntityId) -> StorageResult<Option<Entity>> {
        self.read(|c| c.get(kind, id).cloned())
    }

    fn find_by_name(&self, kind: EntityKind, name: &str) -> StorageResult<Option<Entity>> {
        self.read(|c| c.find_by_name(kind, name).cloned())
    }

    fn save(&self, entity: Entity) -> StorageResult<Entity> {
        self.update(|c| c.save(entity))
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> StorageResult<bool> {
        self.update(|c| Ok(c.delete(kind, id)))
    }

    fn all(&self) -> StorageResult<Vec<Entity>> {
        self.read(|c| c.entities.clone())
    }
}
