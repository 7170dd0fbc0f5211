//! MD5 digests of data files.
//!
//! Files are streamed through the hasher in fixed-size chunks; sequencing files are routinely
//! tens of gigabytes and must never be read into memory whole.

use crate::sidecar::{sidecar_path, ChecksumEntry, ChecksumSidecar};
use crate::{FilesError, FilesResult};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes the lowercase hex MD5 digest of the file at `path`.
///
/// # Errors
///
/// Returns `FilesError::Io` if the file cannot be opened or read.
pub fn md5_hex(path: &Path) -> FilesResult<String> {
    let mut file = File::open(path).map_err(|e| {
        FilesError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the digest of `data_file` and writes `<data_file>.md5` beside it.
///
/// Returns the sidecar path.
pub fn write_sidecar(data_file: &Path) -> FilesResult<PathBuf> {
    let filename = data_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FilesError::InvalidPath(data_file.display().to_string()))?;
    let hash = md5_hex(data_file)?;
    let path = sidecar_path(data_file)?;
    ChecksumSidecar::single(ChecksumEntry::new(hash, filename)).write(&path)?;
    tracing::debug!("wrote checksum sidecar {}", path.display());
    Ok(path)
}

/// Checks `data_file` against the entry for its filename in its sidecar.
///
/// # Errors
///
/// - `FilesError::Io` if either file cannot be read
/// - `FilesError::MissingEntry` if the sidecar does not list the data file's current name
pub fn verify_against_sidecar(data_file: &Path) -> FilesResult<bool> {
    let filename = data_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FilesError::InvalidPath(data_file.display().to_string()))?;
    let path = sidecar_path(data_file)?;
    let sidecar = ChecksumSidecar::read(&path)?;
    let entry = sidecar
        .entry_for(filename)
        .ok_or_else(|| FilesError::MissingEntry {
            sidecar: path.display().to_string(),
            filename: filename.to_owned(),
        })?;
    let actual = md5_hex(data_file)?;
    Ok(entry.hash.eq_ignore_ascii_case(&actual))
}
