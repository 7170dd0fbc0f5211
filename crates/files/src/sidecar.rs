//! Parsing and rewriting of `.md5` sidecar files.
//!
//! A sidecar is a list of lines. Lines shaped like `<hex hash><two spaces><filename>` (or the
//! binary-mode form `<hex hash> *<filename>`) are entries; anything else (blank lines, comments,
//! foreign formats) is kept as-is so a rewrite never loses content it does not understand.

use crate::{FilesError, FilesResult, MD5_SUFFIX, SIDECAR_SEPARATOR};
use std::fs;
use std::path::{Path, PathBuf};

/// One `hash  filename` line of a sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// Hexadecimal digest, stored exactly as read.
    pub hash: String,
    /// Filename the digest was computed for.
    pub filename: String,
    /// Whether the line used the binary-mode `*` marker.
    pub binary: bool,
}

impl ChecksumEntry {
    pub fn new(hash: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            filename: filename.into(),
            binary: false,
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let (hash, rest) = line.split_once(' ')?;
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let (binary, filename) = if let Some(name) = rest.strip_prefix('*') {
            (true, name)
        } else if let Some(name) = rest.strip_prefix(' ') {
            (false, name)
        } else {
            return None;
        };
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            hash: hash.to_owned(),
            filename: filename.to_owned(),
            binary,
        })
    }

    fn render(&self) -> String {
        if self.binary {
            format!("{} *{}", self.hash, self.filename)
        } else {
            format!("{}{}{}", self.hash, SIDECAR_SEPARATOR, self.filename)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry(ChecksumEntry),
    Other(String),
}

/// In-memory view of a sidecar file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumSidecar {
    lines: Vec<Line>,
}

impl ChecksumSidecar {
    /// Builds a sidecar holding a single entry.
    pub fn single(entry: ChecksumEntry) -> Self {
        Self {
            lines: vec![Line::Entry(entry)],
        }
    }

    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|line| match ChecksumEntry::parse(line) {
                Some(entry) => Line::Entry(entry),
                None => Line::Other(line.to_owned()),
            })
            .collect();
        Self { lines }
    }

    /// Reads and parses the sidecar at `path`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the file cannot be read, or `FilesError::NotUtf8` if the
    /// content is not text.
    pub fn read(path: &Path) -> FilesResult<Self> {
        let bytes = fs::read(path)?;
        let content =
            String::from_utf8(bytes).map_err(|_| FilesError::NotUtf8(path.display().to_string()))?;
        Ok(Self::parse(&content))
    }

    /// Renders the sidecar, one line per entry, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry(entry) => out.push_str(&entry.render()),
                Line::Other(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> FilesResult<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChecksumEntry> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry),
            Line::Other(_) => None,
        })
    }

    /// Returns the entry whose filename is exactly `filename`.
    pub fn entry_for(&self, filename: &str) -> Option<&ChecksumEntry> {
        self.entries().find(|entry| entry.filename == filename)
    }

    /// Points every entry recorded for `old_filename` at `new_filename`, keeping its hash.
    ///
    /// Returns `true` if any entry changed.
    pub fn rename_file(&mut self, old_filename: &str, new_filename: &str) -> bool {
        let mut changed = false;
        for line in &mut self.lines {
            if let Line::Entry(entry) = line {
                if entry.filename == old_filename && old_filename != new_filename {
                    entry.filename = new_filename.to_owned();
                    changed = true;
                }
            }
        }
        changed
    }

    /// Replaces the first occurrence of `old_token` with `new_token` in every entry's filename.
    ///
    /// Hash fields are never touched. Returns `true` if any entry changed.
    pub fn rename_token(&mut self, old_token: &str, new_token: &str) -> bool {
        if old_token.is_empty() || old_token == new_token {
            return false;
        }
        let mut changed = false;
        for line in &mut self.lines {
            if let Line::Entry(entry) = line {
                if entry.filename.contains(old_token) {
                    entry.filename = entry.filename.replacen(old_token, new_token, 1);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Returns `true` if `path` names a checksum sidecar.
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > MD5_SUFFIX.len() && name.ends_with(MD5_SUFFIX))
}

/// Returns the sidecar path for a data file: `<datafile>.md5` in the same folder.
///
/// # Errors
///
/// Returns `FilesError::InvalidPath` if `data_file` has no filename.
pub fn sidecar_path(data_file: &Path) -> FilesResult<PathBuf> {
    let filename = data_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FilesError::InvalidPath(data_file.display().to_string()))?;
    Ok(data_file.with_file_name(format!("{filename}{MD5_SUFFIX}")))
}
