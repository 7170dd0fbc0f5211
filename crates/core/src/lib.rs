//! # seqvault core
//!
//! File storage and synchronisation engine for sequencing datasets and samples.
//!
//! This crate keeps the physical files of an entity consistent across one primary storage
//! location and any number of archive mirrors:
//! - per-entity folder resolution and display labels (`locations`)
//! - file enumeration with a legacy token scan (`enumerate`)
//! - rename/move synchronisation that keeps `.md5` sidecars valid (`rename`)
//! - audit-logged deletion with a `.deleted` ledger (`ledger`)
//! - time-limited public access grants and their listing (`grants`, `public_files`)
//! - upload staging with cancellable saves and refresh loops (`staging`, `cleanup`)
//!
//! **No API concerns**: HTTP routing and command-line parsing belong in `api-rest` and
//! `seqvault-cli`. Entity persistence and authorisation are consumed through the
//! [`EntityRepository`], [`GrantStore`] and [`Authorizer`] traits.

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod constants;
pub mod entity;
pub mod enumerate;
pub mod error;
pub mod grants;
pub mod ledger;
pub mod locations;
mod persist;
pub mod public_files;
pub mod rename;
pub mod repository;
pub mod service;
pub mod staging;

pub use auth::{Action, AllowAll, Authorizer, SessionIdentity};
pub use cleanup::{CleanupReport, UploadCleaner};
pub use config::{StorageConfig, TokenMatch};
pub use entity::{Entity, EntityId, EntityKind, EntityMetadata, Owner};
pub use enumerate::EntityFile;
pub use error::{StorageError, StorageResult};
pub use grants::{
    GrantKey, GrantStore, InMemoryGrantStore, PublicAccessGrant, YamlGrantStore,
};
pub use ledger::{DeleteOutcome, DeletionLedgerEntry};
pub use locations::{LocationKind, NetworkLabels, StorageLocation, UploadArea};
pub use public_files::{PublicFile, PublicFileFilter};
pub use rename::{LocationFailure, RenameReport};
pub use repository::{EntityRepository, InMemoryEntityRepository, YamlEntityRepository};
pub use service::{ChecksumCheck, SavedDataset, SavedEntity, StorageService};
pub use staging::{
    NameFn, RefreshLoop, SaveFilesHandle, SaveFilesReport, StagingView, Transfer,
};
