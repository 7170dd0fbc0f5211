//! Datasets and samples, as far as file storage is concerned.
//!
//! The storage engine only needs a handful of fields from an entity: its identity, its name
//! (which doubles as the canonical filename token), the date that picks its year folder, the
//! `editable` flag, and its owner for the public files listing. Everything else about datasets
//! and samples lives with the persistence collaborator.
//!
//! ## Canonical token
//!
//! The name is generated from descriptive metadata, joined by `_`:
//!
//! ```text
//! sampleId_assay_type_target_strain_strainDescription_treatment_replicate_yyyymmdd
//! ```
//!
//! Absent fields are skipped. The result is stripped of accents and of every character other
//! than ASCII letters, digits, `_` and `-`, so it is safe as a folder name and as a substring
//! key for legacy file discovery.

use crate::constants::{DATASETS_DIR_NAME, SAMPLES_DIR_NAME};
use chrono::{NaiveDate, NaiveDateTime};
use seqvault_types::{FileName, TextError};
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Persistence identifier of an entity, unique per [`EntityKind`].
pub type EntityId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Dataset,
    Sample,
}

impl EntityKind {
    /// Folder holding all entities of this kind inside a storage location.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityKind::Dataset => DATASETS_DIR_NAME,
            EntityKind::Sample => SAMPLES_DIR_NAME,
        }
    }

    /// Resource name used in public URLs (`/{resource}-file/...`).
    pub fn resource(&self) -> &'static str {
        match self {
            EntityKind::Dataset => "dataset",
            EntityKind::Sample => "sample",
        }
    }

    /// Parses the resource name used in public URLs.
    pub fn from_resource(resource: &str) -> Option<Self> {
        match resource {
            "dataset" => Some(EntityKind::Dataset),
            "sample" => Some(EntityKind::Sample),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// Owner of an entity, shown and filtered on in the public files listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub email: String,
    pub name: String,
}

/// Descriptive metadata the canonical token is generated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assay: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub sample_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strain_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl EntityMetadata {
    /// Builds the canonical token, or `None` when no descriptive field is set.
    pub fn canonical_token(&self) -> Option<String> {
        let assay = self
            .assay
            .as_deref()
            .map(|assay| assay.chars().filter(|c| is_word_char(*c)).collect::<String>());
        let date = self.date.map(|date| date.format("%Y%m%d").to_string());

        let parts: Vec<&str> = [
            self.sample_id.as_deref(),
            assay.as_deref(),
            self.sample_type.as_deref(),
            self.target.as_deref(),
            self.strain.as_deref(),
            self.strain_description.as_deref(),
            self.treatment.as_deref(),
            self.replicate.as_deref(),
            date.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect();

        if parts.is_empty() {
            return None;
        }
        let token = normalize_token(&parts.join("_"));
        (!token.is_empty()).then_some(token)
    }
}

/// A dataset or sample whose files this engine manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// `None` until the entity is persisted.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// Folder name and canonical filename token.
    pub name: String,
    /// Picks the year folder the entity is stored under.
    pub date: NaiveDate,
    #[serde(default)]
    pub metadata: EntityMetadata,
    #[serde(default = "default_editable")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<NaiveDateTime>,
    /// Samples of a dataset. Always empty for samples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<EntityId>,
}

fn default_editable() -> bool {
    true
}

impl Entity {
    /// Creates an unsaved, editable entity.
    pub fn new(kind: EntityKind, name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            kind,
            id: None,
            name: name.into(),
            date,
            metadata: EntityMetadata::default(),
            editable: true,
            owner: None,
            creation_date: None,
            samples: Vec::new(),
        }
    }

    pub fn dataset(name: impl Into<String>, date: NaiveDate) -> Self {
        Self::new(EntityKind::Dataset, name, date)
    }

    pub fn sample(name: impl Into<String>, date: NaiveDate) -> Self {
        Self::new(EntityKind::Sample, name, date)
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Token used for foldering and legacy discovery.
    pub fn canonical_token(&self) -> &str {
        &self.name
    }

    /// Checks that `name` is a single path segment, so the entity folder stays
    /// `<root>/<kind>/<year>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` or `TextError::NotAFilename` for names such as `""`, `.`,
    /// `..` or `a/b`.
    pub fn folder_name(&self) -> Result<FileName, TextError> {
        FileName::new(&self.name)
    }

    /// Regenerates `name` from metadata. Entities without descriptive metadata keep their name.
    pub fn generate_name(&mut self) {
        if let Some(token) = self.metadata.canonical_token() {
            self.name = token;
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {} ({})", self.kind, id, self.name),
            None => write!(f, "new {} ({})", self.kind, self.name),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Strips accents and keeps only `[A-Za-z0-9_-]`.
pub fn normalize_token(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| is_word_char(*c) || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_canonical_token_full_metadata() {
        let metadata = EntityMetadata {
            sample_id: Some("FR1".into()),
            assay: Some("ChIP-seq".into()),
            sample_type: Some("IMMUNO_PRECIPITATION".into()),
            target: Some("polr2a".into()),
            strain: Some("yFR100".into()),
            strain_description: Some("WT".into()),
            treatment: Some("Rappa".into()),
            replicate: Some("R1".into()),
            date: Some(date(2018, 10, 20)),
        };

        assert_eq!(
            metadata.canonical_token().as_deref(),
            Some("FR1_ChIPseq_IMMUNO_PRECIPITATION_polr2a_yFR100_WT_Rappa_R1_20181020")
        );
    }

    #[test]
    fn test_canonical_token_skips_missing_fields() {
        let metadata = EntityMetadata {
            sample_id: Some("FR1".into()),
            assay: Some("MNase-seq".into()),
            replicate: Some("R2".into()),
            ..Default::default()
        };

        assert_eq!(metadata.canonical_token().as_deref(), Some("FR1_MNaseseq_R2"));
    }

    #[test]
    fn test_canonical_token_strips_accents_and_unsafe_chars() {
        let metadata = EntityMetadata {
            sample_id: Some("Émile".into()),
            target: Some("pol/2 a".into()),
            treatment: Some("heat-shock".into()),
            ..Default::default()
        };

        assert_eq!(
            metadata.canonical_token().as_deref(),
            Some("Emile_pol2a_heat-shock")
        );
    }

    #[test]
    fn test_folder_name_rejects_unsafe_names() {
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let entity = Entity::dataset(name, date(2024, 1, 1));
            assert!(entity.folder_name().is_err(), "{name:?} was accepted");
        }
        let entity = Entity::dataset("DS1", date(2024, 1, 1));
        assert_eq!(entity.folder_name().unwrap().as_str(), "DS1");
    }

    #[test]
    fn test_canonical_token_empty_metadata() {
        assert_eq!(EntityMetadata::default().canonical_token(), None);
    }

    #[test]
    fn test_generate_name_keeps_name_without_metadata() {
        let mut entity = Entity::dataset("DS1", date(2024, 1, 15));
        entity.generate_name();
        assert_eq!(entity.name, "DS1");

        entity.metadata.sample_id = Some("DS2".into());
        entity.generate_name();
        assert_eq!(entity.name, "DS2");
        assert_eq!(entity.canonical_token(), "DS2");
    }

    #[test]
    fn test_kind_resources() {
        assert_eq!(EntityKind::Dataset.dir_name(), "datasets");
        assert_eq!(EntityKind::Sample.resource(), "sample");
        assert_eq!(
            EntityKind::from_resource("dataset"),
            Some(EntityKind::Dataset)
        );
        assert_eq!(EntityKind::from_resource("protocol"), None);
    }
}
