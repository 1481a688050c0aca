pub mod json;
pub mod markup;

use std::fs;
use std::path::{Path, PathBuf};

use crate::editing::snapshot::Snapshot;
use json::SerializedDocument;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid document {path}: {source}")]
    InvalidDocument {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read an exported document from disk.
pub fn read_document(path: &Path) -> Result<SerializedDocument, IoError> {
    if !path.exists() {
        return Err(IoError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| IoError::InvalidDocument {
        path: path.to_path_buf(),
        source,
    })
}

/// Export `snapshot` and write it to disk
pub fn write_document(path: &Path, snapshot: &Snapshot) -> crate::error::Result<()> {
    let document = json::export_document(snapshot)?;
    let content = json::to_string(&document)?;

    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(IoError::Io)?;
    }
    fs::write(path, content).map_err(IoError::Io)?;
    Ok(())
}
