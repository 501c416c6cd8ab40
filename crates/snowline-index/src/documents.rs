//! A directory of JSON documents keyed by id.

use crate::error::IndexError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";
const MAX_ID_LEN: usize = 128;

/// One `<id>.json` file per document under a root directory.
#[derive(Debug, Clone)]
pub struct DocumentDir {
    root: PathBuf,
}

impl DocumentDir {
    /// Open (and create if needed) a document directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| IndexError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of a document. Fails for ids that are not safe file names.
    pub fn path_for(&self, id: &str) -> Result<PathBuf, IndexError> {
        validate_id(id)?;
        Ok(self.root.join(format!("{}.{}", id, EXTENSION)))
    }

    /// Write a document, replacing any previous version atomically.
    pub fn write<T: Serialize>(&self, id: &str, document: &T) -> Result<PathBuf, IndexError> {
        let path = self.path_for(id)?;
        let body = serde_json::to_vec_pretty(document)?;

        let mut temp = NamedTempFile::new_in(&self.root).map_err(|e| IndexError::io(&self.root, e))?;
        temp.write_all(&body).map_err(|e| IndexError::io(temp.path(), e))?;
        temp.persist(&path)
            .map_err(|e| IndexError::io(&path, e.error))?;
        Ok(path)
    }

    /// Read a document. `Ok(None)` when it does not exist.
    pub fn read<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, IndexError> {
        let path = self.path_for(id)?;
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexError::io(&path, e)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Remove a document. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool, IndexError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IndexError::io(&path, e)),
        }
    }

    /// Every readable document, in no particular order.
    ///
    /// Unreadable or malformed files are logged and skipped; the scan itself
    /// only fails if the directory cannot be listed.
    pub fn scan<T: DeserializeOwned>(&self) -> Result<Vec<T>, IndexError> {
        let entries = fs::read_dir(&self.root).map_err(|e| IndexError::io(&self.root, e))?;

        let mut documents = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), error = %e, "Skipping unreadable index entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_slice::<T>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed index document");
                }
            }
        }
        Ok(documents)
    }
}

/// Whether `id` can name a document: ASCII alphanumerics, `-`, `_` and `.`
/// only, not starting with a dot.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_id(id: &str) -> Result<(), IndexError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(IndexError::InvalidId(id.to_string()))
    }
}
