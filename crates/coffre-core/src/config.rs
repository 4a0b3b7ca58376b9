use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoffreError, CoffreResult};

/// Top-level client configuration (loaded from coffre.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoffreConfig {
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint the vault objects live on
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix all vault objects are stored under
    pub prefix: String,
    /// Enforce HTTPS for storage connections (warn on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Read/write chunk size in bytes (default: 64 KiB)
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "coffre".into(),
            prefix: "vault".into(),
            enforce_tls: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CoffreConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// built-in defaults so the CLI works out of the box.
    pub fn load(path: &Path) -> CoffreResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            CoffreError::Config(format!("parsing {}: {e}", path.display()))
        })
    }
}
