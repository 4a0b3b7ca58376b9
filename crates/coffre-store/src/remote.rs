//! Remote chunk adapters over an OpenDAL operator.
//!
//! Object layout:
//!   `{prefix}/objects/{name}/{seq:08}` — staged ciphertext chunks, in order
//!   `{prefix}/manifests/{name}`       — JSON manifest, written on commit
//!
//! The manifest is the commit point: a file exists remotely iff its manifest
//! does. Rollback deletes staged chunk objects and never touches manifests,
//! so a failed upload can overwrite its own leftovers on retry.

use anyhow::{Context, Result};
use opendal::Operator;
use serde::{Deserialize, Serialize};

use crate::{ChunkSink, ChunkSource};

/// Manifest object describing one stored file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub version: u32,
    pub name: String,
    /// Stored (ciphertext) size in bytes
    pub size: u64,
    /// Chunk object keys, in stream order
    pub chunks: Vec<String>,
}

impl RemoteManifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serializing manifest")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parsing manifest")
    }
}

fn manifest_key(prefix: &str, name: &str) -> String {
    format!("{}/manifests/{name}", prefix.trim_end_matches('/'))
}

fn chunk_key(prefix: &str, name: &str, seq: usize) -> String {
    format!("{}/objects/{name}/{seq:08}", prefix.trim_end_matches('/'))
}

/// Reads a stored file chunk-object by chunk-object, in manifest order.
pub struct RemoteFileReader {
    op: Operator,
    chunks: Vec<String>,
    size: u64,
    next_idx: usize,
}

impl RemoteFileReader {
    pub async fn open(op: Operator, prefix: &str, name: &str) -> Result<Self> {
        let key = manifest_key(prefix, name);
        let raw = op
            .read(&key)
            .await
            .with_context(|| format!("reading manifest: {key}"))?;
        let manifest = RemoteManifest::from_bytes(&raw.to_bytes())?;
        Ok(Self {
            op,
            chunks: manifest.chunks,
            size: manifest.size,
            next_idx: 0,
        })
    }
}

impl ChunkSource for RemoteFileReader {
    fn file_size(&self) -> u64 {
        self.size
    }

    async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(key) = self.chunks.get(self.next_idx) else {
            return Ok(None);
        };
        let data = self
            .op
            .read(key)
            .await
            .with_context(|| format!("downloading chunk {}: {key}", self.next_idx))?;
        self.next_idx += 1;
        Ok(Some(data.to_bytes().to_vec()))
    }
}

/// Stages chunk objects remotely; `commit` publishes the manifest.
pub struct RemoteFileWriter {
    op: Operator,
    prefix: String,
    name: String,
    staged: Vec<String>,
    bytes: u64,
}

impl RemoteFileWriter {
    pub fn create(op: Operator, prefix: &str, name: &str) -> Self {
        Self {
            op,
            prefix: prefix.to_string(),
            name: name.to_string(),
            staged: Vec::new(),
            bytes: 0,
        }
    }
}

impl ChunkSink for RemoteFileWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let seq = self.staged.len();
        let key = chunk_key(&self.prefix, &self.name, seq);
        self.op
            .write(&key, chunk.to_vec())
            .await
            .with_context(|| format!("uploading chunk {seq}: {key}"))?;
        self.bytes += chunk.len() as u64;
        self.staged.push(key);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let manifest = RemoteManifest {
            version: 1,
            name: self.name.clone(),
            size: self.bytes,
            chunks: self.staged,
        };
        let key = manifest_key(&self.prefix, &self.name);
        self.op
            .write(&key, manifest.to_bytes()?)
            .await
            .with_context(|| format!("writing manifest: {key}"))?;
        tracing::info!(name = %self.name, bytes = self.bytes, chunks = manifest.chunks.len(), "remote write committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        for key in &self.staged {
            if let Err(e) = self.op.delete(key).await {
                tracing::warn!(key = %key, "rollback: failed to delete staged chunk: {e}");
            }
        }
        tracing::debug!(name = %self.name, staged = self.staged.len(), "remote write rolled back");
        Ok(())
    }
}

/// Whether a file of this name is already stored (manifest present).
pub async fn remote_exists(op: &Operator, prefix: &str, name: &str) -> Result<bool> {
    let key = manifest_key(prefix, name);
    op.exists(&key)
        .await
        .with_context(|| format!("checking manifest: {key}"))
}

/// Delete a stored file: its chunk objects first, the manifest last, so an
/// interrupted delete never strands an unreadable manifest.
pub async fn delete_file(op: &Operator, prefix: &str, name: &str) -> Result<()> {
    let key = manifest_key(prefix, name);
    let raw = op
        .read(&key)
        .await
        .with_context(|| format!("reading manifest: {key}"))?;
    let manifest = RemoteManifest::from_bytes(&raw.to_bytes())?;
    for chunk in &manifest.chunks {
        op.delete(chunk)
            .await
            .with_context(|| format!("deleting chunk: {chunk}"))?;
    }
    op.delete(&key)
        .await
        .with_context(|| format!("deleting manifest: {key}"))?;
    tracing::info!(name = %name, "remote file deleted");
    Ok(())
}

/// List all stored files under the prefix.
pub async fn list_files(op: &Operator, prefix: &str) -> Result<Vec<RemoteManifest>> {
    let dir = format!("{}/manifests/", prefix.trim_end_matches('/'));
    let entries = op
        .list(&dir)
        .await
        .with_context(|| format!("listing manifests: {dir}"))?;

    let mut manifests = Vec::new();
    for entry in entries {
        if !entry.metadata().mode().is_file() {
            continue;
        }
        let raw = op
            .read(entry.path())
            .await
            .with_context(|| format!("reading manifest: {}", entry.path()))?;
        manifests.push(RemoteManifest::from_bytes(&raw.to_bytes())?);
    }
    manifests.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(manifests)
}
