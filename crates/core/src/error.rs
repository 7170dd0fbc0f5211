use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0} cannot be edited")]
    NotEditable(String),
    #[error("{0} has not been saved")]
    NotSaved(String),
    #[error("file {} is not in folder {}", .path.display(), .folder.display())]
    OutsidePrimaryFolder { path: PathBuf, folder: PathBuf },
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to create folder {}: {source}", .path.display())]
    FolderCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to move folder {} to {}: {source}", .from.display(), .to.display())]
    FolderMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "could not merge {} into {}: {} file(s) already exist at the destination",
        .from.display(),
        .to.display(),
        .files.len()
    )]
    MergeConflict {
        from: PathBuf,
        to: PathBuf,
        files: Vec<PathBuf>,
    },
    #[error("failed to rename file {} to {}: {source}", .from.display(), .to.display())]
    FileRename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rename target {} already exists", .0.display())]
    RenameTargetExists(PathBuf),
    #[error("failed to copy file {} to {}: {source}", .from.display(), .to.display())]
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to delete file {}: {source}", .path.display())]
    FileDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read file metadata {}: {source}", .path.display())]
    FileMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum sidecar error: {0}")]
    Sidecar(#[from] seqvault_files::FilesError),
    #[error("primary location rename failed: {0}")]
    PrimaryRename(#[source] Box<StorageError>),

    #[error("failed to read configuration {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("failed to read store {}: {source}", .path.display())]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write store {}: {source}", .path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store lock poisoned")]
    StoreLockPoisoned,

    #[error("invalid text: {0}")]
    Text(#[from] seqvault_types::TextError),
    #[error("background task failed: {0}")]
    Task(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
