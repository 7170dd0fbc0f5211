//! Storage locations and the per-entity folder resolver.
//!
//! Every location stores entities under the same relative layout:
//!
//! ```text
//! <root>/
//! ├── datasets/
//! │   └── <year>/
//! │       └── <dataset name>/
//! └── samples/
//!     └── <year>/
//!         └── <sample name>/
//! ```
//!
//! Resolution is a pure function of the entity and the location root; nothing here touches
//! the filesystem. Labels render the same folder for display, using the network share prefix
//! users mount on their workstation when one is configured.

use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Role of a storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationKind {
    /// The single authoritative, writable location.
    Primary,
    /// A read-discoverable mirror. Lower priority values are tried first.
    Archive {
        #[serde(default)]
        priority: u32,
    },
}

impl LocationKind {
    pub fn is_primary(&self) -> bool {
        matches!(self, LocationKind::Primary)
    }
}

/// Optional display prefixes for a location's root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLabels {
    /// Root as seen from Windows, e.g. `\\server\lanaseq`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<String>,
    /// Root as seen from macOS/Linux, e.g. `smb://server/lanaseq`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix: Option<String>,
}

impl NetworkLabels {
    /// Renders `relative` under the configured prefix (or `root` when none is configured).
    fn render(&self, root: &Path, relative: &Path, posix: bool) -> String {
        let (prefix, separator) = if posix {
            (self.unix.clone(), '/')
        } else {
            (self.windows.clone(), '\\')
        };
        let prefix = prefix.unwrap_or_else(|| root.display().to_string());
        let prefix = prefix.trim_end_matches(['/', '\\']);

        let mut label = prefix.to_owned();
        for segment in segments(relative) {
            label.push(separator);
            label.push_str(&segment);
        }
        label
    }
}

/// A configured storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    kind: LocationKind,
    root: PathBuf,
    labels: NetworkLabels,
}

impl StorageLocation {
    pub fn new(kind: LocationKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
            labels: NetworkLabels::default(),
        }
    }

    pub fn primary(root: impl Into<PathBuf>) -> Self {
        Self::new(LocationKind::Primary, root)
    }

    pub fn archive(root: impl Into<PathBuf>, priority: u32) -> Self {
        Self::new(LocationKind::Archive { priority }, root)
    }

    pub fn with_labels(mut self, labels: NetworkLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.kind.is_primary()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dedicated folder of `entity` in this location.
    pub fn folder(&self, entity: &Entity) -> PathBuf {
        self.root.join(relative_folder(entity))
    }

    /// Human-readable rendering of [`Self::folder`], for display only.
    pub fn label(&self, entity: &Entity, posix: bool) -> String {
        self.labels
            .render(&self.root, &relative_folder(entity), posix)
    }
}

/// The shared upload inbox.
///
/// Users drop files either directly into the root (prefixed with the entity name) or into a
/// subfolder named after the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArea {
    root: PathBuf,
    labels: NetworkLabels,
}

impl UploadArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            labels: NetworkLabels::default(),
        }
    }

    pub fn with_labels(mut self, labels: NetworkLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging subfolder of `entity`.
    pub fn folder(&self, entity: &Entity) -> PathBuf {
        self.root.join(&entity.name)
    }

    pub fn label(&self, entity: &Entity, posix: bool) -> String {
        self.labels
            .render(&self.root, Path::new(&entity.name), posix)
    }
}

/// `<datasets|samples>/<year>/<name>`
pub fn relative_folder(entity: &Entity) -> PathBuf {
    use chrono::Datelike;

    PathBuf::from(entity.kind.dir_name())
        .join(entity.date.year().to_string())
        .join(&entity.name)
}

fn segments(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
        _ => None,
    })
}
