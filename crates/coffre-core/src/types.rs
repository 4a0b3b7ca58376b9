use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file tracked by the vault: its name in the remote store and its
/// path on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name the file is stored under remotely
    pub name: String,
    /// Local filesystem path
    pub path: PathBuf,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}
