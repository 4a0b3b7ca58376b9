//! Local-disk chunk adapters: plain chunked reads, temp-file + rename writes.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{ChunkSink, ChunkSource};

/// Reads a local file in fixed-size chunks.
pub struct LocalFileReader {
    file: File,
    size: u64,
    chunk_size: usize,
}

impl LocalFileReader {
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening source file: {}", path.display()))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("stat source file: {}", path.display()))?
            .len();
        Ok(Self {
            file,
            size,
            chunk_size,
        })
    }
}

impl ChunkSource for LocalFileReader {
    fn file_size(&self) -> u64 {
        self.size
    }

    async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self
            .file
            .read(&mut buf)
            .await
            .context("reading source file")?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// Writes a local file transactionally: all bytes go to `{dest}.part`, and
/// only `commit` renames it to the final name. No partially-written file is
/// ever visible under the destination name.
pub struct LocalFileWriter {
    file: File,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl LocalFileWriter {
    pub async fn create(dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating directory: {}", parent.display()))?;
            }
        }
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("destination has no file name: {}", dest.display()))?;
        let tmp_path = dest.with_file_name(format!("{file_name}.part"));
        let file = File::create(&tmp_path)
            .await
            .with_context(|| format!("creating temp file: {}", tmp_path.display()))?;
        Ok(Self {
            file,
            tmp_path,
            final_path: dest.to_path_buf(),
        })
    }

    /// Path of the in-flight temp file (visible until commit or rollback).
    pub fn temp_path(&self) -> &Path {
        &self.tmp_path
    }
}

impl ChunkSink for LocalFileWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .with_context(|| format!("writing temp file: {}", self.tmp_path.display()))
    }

    async fn commit(mut self) -> Result<()> {
        self.file.flush().await.context("flushing temp file")?;
        self.file.sync_all().await.context("syncing temp file")?;
        drop(self.file);
        tokio::fs::rename(&self.tmp_path, &self.final_path)
            .await
            .with_context(|| format!("renaming to: {}", self.final_path.display()))?;
        tracing::debug!(path = %self.final_path.display(), "local write committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        drop(self.file);
        match tokio::fs::remove_file(&self.tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("removing temp file: {}", self.tmp_path.display()))
            }
        }
        tracing::debug!(path = %self.final_path.display(), "local write rolled back");
        Ok(())
    }
}
