//! coffre-transfer: the concurrent file transfer pipeline.
//!
//! A transfer runs as four cooperating parts: a reader task, a cipher task,
//! a sink task, and a coordinator on the calling task. Stages hand chunks to
//! each other over capacity-1 channels, so a stage blocks until its neighbor
//! is ready and memory stays bounded to a few in-flight chunks no matter how
//! large the file is.
//!
//! Termination is single-writer: stages report failures on a channel, and
//! only the coordinator cancels the transfer-scoped token. Every blocking
//! channel operation in every stage is guarded by that token, so a
//! cancellation is observed within one chunk's processing time. The sink is
//! the only owner of the destination transaction and resolves it exactly
//! once: commit after a clean end-of-stream marker, rollback on every other
//! path.

use std::future::Future;
use std::sync::Arc;

use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use coffre_core::FileInfo;
use coffre_crypto::CryptoError;
use coffre_store::check::{check_file_for_read, check_file_for_write};
use coffre_store::remote::remote_exists;
use coffre_store::{LocalFileReader, LocalFileWriter, RemoteFileReader, RemoteFileWriter};

mod download;
mod pipeline;
mod upload;

pub use coffre_store::{ChunkSink, ChunkSource};
pub use download::download_stream;
pub use upload::upload_stream;

use thiserror::Error;

/// Progress callback: `(bytes_processed, bytes_total)`. Invoked by the
/// reader stage every [`PROGRESS_INTERVAL`] chunks plus once at end of
/// stream; never on the transfer's correctness path.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Reader-stage progress cadence, in chunks.
pub const PROGRESS_INTERVAL: u64 = 8;

/// Terminal outcome of a failed transfer. Exactly one of these is returned
/// per transfer; the destination has been rolled back for every variant
/// except [`TransferError::Commit`], where commit was already attempted.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Interrupted,

    #[error("application shutting down")]
    AppStopped,

    #[error("precondition failed: {0}")]
    Precondition(#[source] anyhow::Error),

    #[error("fetching master password: {0}")]
    Password(#[source] anyhow::Error),

    #[error("reading source: {0}")]
    Source(#[source] anyhow::Error),

    #[error("cipher stage: {0}")]
    Cipher(#[from] CryptoError),

    #[error("writing destination: {0}")]
    Sink(#[source] anyhow::Error),

    #[error("committing destination: {0}")]
    Commit(#[source] anyhow::Error),
}

/// Source of the vault-wide master password. Fetched once per transfer by
/// the cipher stage, then discarded after key derivation.
pub trait MasterKeySource: Send + Sync + 'static {
    fn master_password(&self) -> impl Future<Output = anyhow::Result<SecretString>> + Send;
}

/// A fixed, already-known master password (CLI prompt, tests).
pub struct StaticPassword(SecretString);

impl StaticPassword {
    pub fn new(password: SecretString) -> Self {
        Self(password)
    }
}

impl MasterKeySource for StaticPassword {
    async fn master_password(&self) -> anyhow::Result<SecretString> {
        Ok(SecretString::from(self.0.expose_secret().to_string()))
    }
}

/// Moves files between local disk and the remote store, encrypting on the
/// way up and decrypting on the way down. One instance serves many
/// transfers; each transfer gets its own pipeline and owns its adapters.
pub struct Transferor<P> {
    op: Operator,
    prefix: String,
    chunk_size: usize,
    keys: Arc<P>,
    shutdown: CancellationToken,
}

impl<P: MasterKeySource> Transferor<P> {
    pub fn new(
        op: Operator,
        prefix: impl Into<String>,
        chunk_size: usize,
        keys: Arc<P>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            op,
            prefix: prefix.into(),
            chunk_size,
            keys,
            shutdown,
        }
    }

    /// Encrypt and upload a local file to the remote store.
    ///
    /// Blocks until every pipeline stage has exited. Success means the
    /// remote manifest was committed; any error means the staged upload was
    /// rolled back (except a failed commit itself).
    pub async fn upload_file(
        &self,
        file: &FileInfo,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
        overwrite: bool,
    ) -> Result<(), TransferError> {
        check_file_for_read(&file.path)
            .await
            .map_err(TransferError::Precondition)?;
        if !overwrite
            && remote_exists(&self.op, &self.prefix, &file.name)
                .await
                .map_err(TransferError::Precondition)?
        {
            return Err(TransferError::Precondition(anyhow::anyhow!(
                "remote file already exists: {}",
                file.name
            )));
        }

        let source = LocalFileReader::open(&file.path, self.chunk_size)
            .await
            .map_err(TransferError::Precondition)?;
        let sink = RemoteFileWriter::create(self.op.clone(), &self.prefix, &file.name);

        tracing::info!(name = %file.name, path = %file.path.display(), "upload starting");
        upload_stream(
            source,
            sink,
            self.keys.clone(),
            progress,
            cancel,
            self.shutdown.clone(),
        )
        .await
    }

    /// Download and decrypt a remote file to local disk.
    ///
    /// The destination is written as a temp file and renamed only after the
    /// stream authenticates, so no partial or unverified file is ever
    /// visible under the final name.
    pub async fn download_file(
        &self,
        file: &FileInfo,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
        overwrite: bool,
    ) -> Result<(), TransferError> {
        if !overwrite {
            check_file_for_write(&file.path)
                .await
                .map_err(TransferError::Precondition)?;
        }

        let source = RemoteFileReader::open(self.op.clone(), &self.prefix, &file.name)
            .await
            .map_err(TransferError::Precondition)?;
        let sink = LocalFileWriter::create(&file.path)
            .await
            .map_err(TransferError::Precondition)?;

        tracing::info!(name = %file.name, path = %file.path.display(), "download starting");
        download_stream(
            source,
            sink,
            self.keys.clone(),
            progress,
            cancel,
            self.shutdown.clone(),
        )
        .await
    }
}
