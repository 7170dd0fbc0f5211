//! YAML catalog files shared by the file-backed stores.
//!
//! Writes go to a sibling temporary file that is then renamed over the catalog, so a reader
//! never observes a half-written file.

use crate::{StorageError, StorageResult};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io::ErrorKind, path::Path};

/// Loads `path`, returning `T::default()` when the file does not exist yet.
pub(crate) fn load_yaml<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path) {
        Ok(yaml) if yaml.trim().is_empty() => Ok(T::default()),
        Ok(yaml) => serde_yaml::from_str(&yaml).map_err(StorageError::YamlDeserialization),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StorageError::StoreRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Atomically replaces `path` with the YAML rendering of `value`.
pub(crate) fn store_yaml<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let yaml = serde_yaml::to_string(value).map_err(StorageError::YamlSerialization)?;
    let write_error = |source| StorageError::StoreWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, yaml).map_err(write_error)?;
    fs::rename(&tmp, path).map_err(write_error)?;
    Ok(())
}
