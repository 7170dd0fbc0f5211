//! Public files listing, filtering and download links.

use crate::config::StorageConfig;
use crate::entity::{EntityId, EntityKind, Owner};
use crate::grants::PublicAccessGrant;
use crate::repository::EntityRepository;
use crate::StorageResult;
use chrono::NaiveDate;
use serde::Serialize;
use std::ops::{Bound, RangeBounds};

/// A granted file joined with the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicFile {
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub entity_name: String,
    pub owner: Option<Owner>,
    pub path: String,
    pub expiry_date: NaiveDate,
}

impl PublicFile {
    /// `/{kind}-file/{name}/{path}`, percent-encoded per segment.
    pub fn url_path(&self) -> String {
        let path: Vec<String> = self
            .path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "/{}-file/{}/{}",
            self.entity_kind.resource(),
            urlencoding::encode(&self.entity_name),
            path.join("/")
        )
    }

    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.expiry_date >= today
    }
}

/// Joins every grant, active or expired, with its entity.
///
/// Grants whose entity no longer exists are skipped. Sorted by entity name then path.
pub fn public_files(
    grants: Vec<PublicAccessGrant>,
    entities: &dyn EntityRepository,
) -> StorageResult<Vec<PublicFile>> {
    let mut files = Vec::with_capacity(grants.len());
    for grant in grants {
        let Some(entity) = entities.get(grant.key.entity_kind, grant.key.entity_id)? else {
            tracing::debug!(
                "skipping grant on missing {} {}",
                grant.key.entity_kind,
                grant.key.entity_id
            );
            continue;
        };
        files.push(PublicFile {
            entity_kind: entity.kind,
            entity_id: grant.key.entity_id,
            entity_name: entity.name,
            owner: entity.owner,
            path: grant.key.relative_path,
            expiry_date: grant.expiry_date,
        });
    }
    files.sort_by(|a, b| {
        (&a.entity_name, &a.path, a.entity_kind).cmp(&(&b.entity_name, &b.path, b.entity_kind))
    });
    Ok(files)
}

/// Case-insensitive filter of the public files listing. Unset criteria accept everything.
#[derive(Debug, Clone)]
pub struct PublicFileFilter {
    pub filename_contains: Option<String>,
    pub entity_name_contains: Option<String>,
    /// Matches the owner's email or name.
    pub owner_contains: Option<String>,
    pub expiry_range: (Bound<NaiveDate>, Bound<NaiveDate>),
}

impl Default for PublicFileFilter {
    fn default() -> Self {
        Self {
            filename_contains: None,
            entity_name_contains: None,
            owner_contains: None,
            expiry_range: (Bound::Unbounded, Bound::Unbounded),
        }
    }
}

impl PublicFileFilter {
    pub fn test(&self, file: &PublicFile) -> bool {
        contains(&self.filename_contains, &file.path)
            && contains(&self.entity_name_contains, &file.entity_name)
            && self.owner_contains.as_ref().map_or(true, |needle| {
                file.owner.as_ref().is_some_and(|owner| {
                    contains_ignore_case(&owner.email, needle)
                        || contains_ignore_case(&owner.name, needle)
                })
            })
            && self.expiry_range.contains(&file.expiry_date)
    }

    pub fn apply(&self, files: Vec<PublicFile>) -> Vec<PublicFile> {
        files.into_iter().filter(|file| self.test(file)).collect()
    }
}

fn contains(needle: &Option<String>, value: &str) -> bool {
    needle
        .as_deref()
        .map_or(true, |needle| contains_ignore_case(value, needle))
}

fn contains_ignore_case(value: &str, needle: &str) -> bool {
    value.to_lowercase().contains(&needle.to_lowercase())
}

/// One public URL per file, newline separated.
pub fn download_links(cfg: &StorageConfig, files: &[PublicFile]) -> String {
    files
        .iter()
        .map(|file| cfg.url(&file.url_path()))
        .collect::<Vec<_>>()
        .join("\n")
}
