//! Storage engine configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into the storage services as `Arc<StorageConfig>`. Services never read environment
//! variables or configuration files during request handling.
//!
//! ## YAML format
//!
//! ```yaml
//! server_url: https://lanaseq.example.org
//! token_match: substring        # or whole_token
//! locations:
//!   - kind: primary
//!     root: /lanaseq/home
//!     labels:
//!       windows: '\\lanaseq01\home'
//!       unix: smb://lanaseq01/home
//!   - kind: archive
//!     priority: 1
//!     root: /lanaseq/archives
//! upload:
//!   root: /lanaseq/upload
//!   delete_age_hours: 48
//! ```

use crate::constants::DEFAULT_UPLOAD_DELETE_AGE_HOURS;
use crate::locations::{LocationKind, NetworkLabels, StorageLocation, UploadArea};
use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the legacy discovery scan matches filenames against an entity's canonical token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMatch {
    /// The token may appear anywhere in the filename.
    #[default]
    Substring,
    /// The token must be delimited by the start/end of the name or a non-alphanumeric character,
    /// so `DS1` matches `DS1_R1.fastq` but not `DS10_R1.fastq`.
    WholeToken,
}

impl TokenMatch {
    pub fn matches(&self, filename: &str, token: &str) -> bool {
        self.find(filename, token).is_some()
    }

    /// Byte offset of the first occurrence of `token` accepted by this rule.
    pub fn find(&self, filename: &str, token: &str) -> Option<usize> {
        if token.is_empty() {
            return None;
        }
        match self {
            TokenMatch::Substring => filename.find(token),
            TokenMatch::WholeToken => filename
                .match_indices(token)
                .map(|(start, _)| start)
                .find(|&start| {
                    let end = start + token.len();
                    let before = filename[..start].chars().next_back();
                    let after = filename[end..].chars().next();
                    before.map_or(true, |c| !c.is_alphanumeric())
                        && after.map_or(true, |c| !c.is_alphanumeric())
                }),
        }
    }

    /// Replaces the first occurrence of `old` accepted by this rule with `new`.
    pub fn replace_first(&self, filename: &str, old: &str, new: &str) -> Option<String> {
        let start = self.find(filename, old)?;
        let mut renamed = String::with_capacity(filename.len() + new.len());
        renamed.push_str(&filename[..start]);
        renamed.push_str(new);
        renamed.push_str(&filename[start + old.len()..]);
        Some(renamed)
    }
}

/// Storage configuration resolved at startup.
///
/// Locations are held primary first, then archives by ascending priority; archives with equal
/// priority keep their configured order.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    locations: Vec<StorageLocation>,
    upload: UploadArea,
    upload_delete_age: Duration,
    server_url: String,
    token_match: TokenMatch,
}

impl StorageConfig {
    /// Create a new `StorageConfig`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidConfig` if:
    /// - there is not exactly one primary location,
    /// - a location or the upload area has an empty root,
    /// - two locations share the same root.
    pub fn new(
        locations: Vec<StorageLocation>,
        upload: UploadArea,
        server_url: impl Into<String>,
    ) -> StorageResult<Self> {
        let primaries = locations.iter().filter(|l| l.is_primary()).count();
        if primaries != 1 {
            return Err(StorageError::InvalidConfig(format!(
                "exactly one primary location is required, found {primaries}"
            )));
        }

        let mut roots = HashSet::new();
        for location in &locations {
            if location.root().as_os_str().is_empty() {
                return Err(StorageError::InvalidConfig(
                    "storage location root cannot be empty".into(),
                ));
            }
            if !roots.insert(location.root().to_path_buf()) {
                return Err(StorageError::InvalidConfig(format!(
                    "storage location {} is configured twice",
                    location.root().display()
                )));
            }
        }
        if upload.root().as_os_str().is_empty() {
            return Err(StorageError::InvalidConfig(
                "upload root cannot be empty".into(),
            ));
        }

        let mut locations = locations;
        locations.sort_by_key(|location| match location.kind() {
            LocationKind::Primary => (0, 0),
            LocationKind::Archive { priority } => (1, priority),
        });

        Ok(Self {
            locations,
            upload,
            upload_delete_age: Duration::from_secs(DEFAULT_UPLOAD_DELETE_AGE_HOURS * 3600),
            server_url: server_url.into().trim_end_matches('/').to_owned(),
            token_match: TokenMatch::default(),
        })
    }

    pub fn with_token_match(mut self, token_match: TokenMatch) -> Self {
        self.token_match = token_match;
        self
    }

    pub fn with_upload_delete_age(mut self, age: Duration) -> Self {
        self.upload_delete_age = age;
        self
    }

    /// All locations, primary first.
    pub fn locations(&self) -> &[StorageLocation] {
        &self.locations
    }

    pub fn primary(&self) -> &StorageLocation {
        // `new` guarantees exactly one primary, sorted first.
        &self.locations[0]
    }

    pub fn archives(&self) -> &[StorageLocation] {
        &self.locations[1..]
    }

    pub fn upload(&self) -> &UploadArea {
        &self.upload
    }

    pub fn upload_delete_age(&self) -> Duration {
        self.upload_delete_age
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns `url_end` prefixed with the public server URL.
    pub fn url(&self, url_end: &str) -> String {
        format!("{}{}", self.server_url, url_end)
    }

    pub fn token_match(&self) -> TokenMatch {
        self.token_match
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> StorageResult<Self> {
        let file: StorageConfigFile =
            serde_yaml::from_str(yaml).map_err(StorageError::YamlDeserialization)?;
        file.try_into()
    }

    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| StorageError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[derive(Debug, Deserialize)]
struct StorageConfigFile {
    locations: Vec<LocationFile>,
    upload: UploadFile,
    #[serde(default)]
    server_url: String,
    #[serde(default)]
    token_match: TokenMatch,
}

#[derive(Debug, Deserialize)]
struct LocationFile {
    #[serde(flatten)]
    kind: LocationKind,
    root: PathBuf,
    #[serde(default)]
    labels: NetworkLabels,
}

#[derive(Debug, Deserialize)]
struct UploadFile {
    root: PathBuf,
    #[serde(default)]
    labels: NetworkLabels,
    #[serde(default = "default_delete_age_hours")]
    delete_age_hours: u64,
}

fn default_delete_age_hours() -> u64 {
    DEFAULT_UPLOAD_DELETE_AGE_HOURS
}

impl TryFrom<StorageConfigFile> for StorageConfig {
    type Error = StorageError;

    fn try_from(file: StorageConfigFile) -> StorageResult<Self> {
        let locations = file
            .locations
            .into_iter()
            .map(|l| StorageLocation::new(l.kind, l.root).with_labels(l.labels))
            .collect();
        let upload = UploadArea::new(file.upload.root).with_labels(file.upload.labels);

        Ok(StorageConfig::new(locations, upload, file.server_url)?
            .with_token_match(file.token_match)
            .with_upload_delete_age(Duration::from_secs(
                file.upload.delete_age_hours.saturating_mul(3600),
            )))
    }
}
