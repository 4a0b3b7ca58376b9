//! Precondition gates run before a transfer pipeline is spawned.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::fs::File;

/// The source must exist, be a regular file, and be readable.
pub async fn check_file_for_read(path: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("source not found: {}", path.display()))?;
    if !meta.is_file() {
        bail!("source is not a regular file: {}", path.display());
    }
    // Open probe: catches permission problems before any stage spawns.
    File::open(path)
        .await
        .with_context(|| format!("source not readable: {}", path.display()))?;
    Ok(())
}

/// The destination must not already exist (collision check). Callers that
/// allow overwriting simply skip this gate.
pub async fn check_file_for_write(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking destination: {}", path.display()))?
    {
        bail!("destination already exists: {}", path.display());
    }
    Ok(())
}
