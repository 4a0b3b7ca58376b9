//! coffre-store: chunk sources and sinks for the transfer pipeline.
//!
//! A transfer moves bytes from a [`ChunkSource`] to a [`ChunkSink`] without
//! ever holding more than a few chunks in memory. Sinks are transactional:
//! nothing is visible at the destination until `commit`, and `rollback`
//! removes everything staged. Both terminal operations consume the sink, so
//! calling more than one of them is a compile error rather than a runtime
//! hazard.

use std::future::Future;

pub mod check;
pub mod health;
pub mod local;
pub mod operator;
pub mod remote;

pub use local::{LocalFileReader, LocalFileWriter};
pub use operator::build_operator;
pub use remote::{RemoteFileReader, RemoteFileWriter, RemoteManifest};

/// A readable stream of byte chunks. End of stream is `Ok(None)`.
/// Backends close on drop.
pub trait ChunkSource: Send + 'static {
    /// Total stream size in bytes, as known up front (used for progress
    /// reporting only).
    fn file_size(&self) -> u64;

    /// Fetch the next chunk. Chunk sizes are backend-chosen and carry no
    /// semantic meaning.
    fn next(&mut self) -> impl Future<Output = anyhow::Result<Option<Vec<u8>>>> + Send;
}

/// A transactional destination for a stream of byte chunks.
pub trait ChunkSink: Send + 'static {
    fn write_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Make everything written so far durable and visible at the final
    /// destination.
    fn commit(self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Discard everything staged. Best-effort: rollback never leaves a
    /// partial file visible at the final destination.
    fn rollback(self) -> impl Future<Output = anyhow::Result<()>> + Send;
}
