//! seqvault checksum sidecars
//!
//! Sequencing files travel with a companion `<datafile>.md5` whose content follows the
//! `md5sum` convention:
//!
//! ```text
//! d41d8cd98f00b204e9800998ecf8427e  DS1_R1.fastq
//! ```
//!
//! ## Invariants
//!
//! - The hash field is never rewritten by this crate once read
//! - Renaming a data file only rewrites the filename field of its sidecar
//! - Lines that do not parse as sidecar entries are preserved verbatim
//!
//! ## Example Usage
//!
//! ```no_run
//! use seqvault_files::ChecksumSidecar;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sidecar_path = Path::new("datasets/2024/DS2/DS2_R1.fastq.md5");
//! let mut sidecar = ChecksumSidecar::read(sidecar_path)?;
//! sidecar.rename_token("DS1", "DS2");
//! sidecar.write(sidecar_path)?;
//! # Ok(())
//! # }
//! ```

mod constants;
mod digest;
mod sidecar;

pub use constants::{MD5_SUFFIX, SIDECAR_SEPARATOR};
pub use digest::{md5_hex, verify_against_sidecar, write_sidecar};
pub use sidecar::{is_sidecar, sidecar_path, ChecksumEntry, ChecksumSidecar};

/// Errors that can occur during checksum operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Path has no usable filename component
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Sidecar content is not valid UTF-8
    #[error("Sidecar {0} is not valid UTF-8")]
    NotUtf8(String),

    /// Sidecar does not reference the data file it sits beside
    #[error("Sidecar {sidecar} has no entry for {filename}")]
    MissingEntry { sidecar: String, filename: String },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FilesResult<T> = Result<T, FilesError>;
