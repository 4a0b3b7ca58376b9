//! Download pipeline: remote source → decrypter → transactional local sink.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use coffre_crypto::ChunkDecrypter;

use crate::pipeline::{coordinate, forward, read_stage, sink_stage, StreamItem};
use crate::{ChunkSink, ChunkSource, MasterKeySource, ProgressFn, TransferError};

/// Decrypt a ciphertext chunk stream from `source` into `sink`.
///
/// Mirrors [`crate::upload_stream`] with the cipher direction reversed: the
/// decrypter withholds the trailing authentication tag from the sink and the
/// stream only commits after `finish` verifies it, so a corrupted or
/// tampered stream can never leave a file at the destination name.
pub async fn download_stream<R, W, P>(
    source: R,
    sink: W,
    keys: Arc<P>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) -> Result<(), TransferError>
where
    R: ChunkSource,
    W: ChunkSink,
    P: MasterKeySource,
{
    let term = CancellationToken::new();
    let (to_cipher_tx, to_cipher_rx) = mpsc::channel(1);
    let (to_sink_tx, to_sink_rx) = mpsc::channel(1);
    let (fail_tx, fail_rx) = mpsc::channel(4);
    let (done_tx, done_rx) = oneshot::channel();

    let mut stages = JoinSet::new();
    stages.spawn(read_stage(
        source,
        to_cipher_tx,
        term.clone(),
        fail_tx.clone(),
        progress,
    ));
    stages.spawn(decrypt_stage(
        keys,
        to_cipher_rx,
        to_sink_tx,
        term.clone(),
        fail_tx.clone(),
    ));
    stages.spawn(sink_stage(
        sink,
        to_sink_rx,
        term.clone(),
        fail_tx,
        done_tx,
    ));

    let outcome = coordinate(&term, cancel, shutdown, fail_rx, done_rx).await;

    while stages.join_next().await.is_some() {}
    outcome
}

/// Cipher stage, decrypt direction. Released plaintext always lags the
/// input by one tag length; `End` triggers tag verification, and only a
/// verified stream forwards `End` to let the sink commit.
async fn decrypt_stage<P: MasterKeySource>(
    keys: Arc<P>,
    mut rx: mpsc::Receiver<StreamItem>,
    tx: mpsc::Sender<StreamItem>,
    term: CancellationToken,
    fail: mpsc::Sender<TransferError>,
) {
    let password = tokio::select! {
        biased;
        _ = term.cancelled() => return,
        res = keys.master_password() => match res {
            Ok(p) => p,
            Err(e) => {
                let _ = fail.send(TransferError::Password(e)).await;
                return;
            }
        },
    };
    let mut decrypter = ChunkDecrypter::new(password);

    loop {
        let item = tokio::select! {
            biased;
            _ = term.cancelled() => return,
            item = rx.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };

        match item {
            StreamItem::Chunk(chunk) => {
                let released = match decrypter.write_chunk(&chunk) {
                    Ok(pt) => pt,
                    Err(e) => {
                        let _ = fail.send(TransferError::Cipher(e)).await;
                        return;
                    }
                };
                if !released.is_empty()
                    && !forward(&tx, &term, StreamItem::Chunk(released)).await
                {
                    return;
                }
            }
            StreamItem::End => {
                match decrypter.finish() {
                    Ok(()) => {
                        forward(&tx, &term, StreamItem::End).await;
                    }
                    Err(e) => {
                        let _ = fail.send(TransferError::Cipher(e)).await;
                    }
                }
                return;
            }
        }
    }
}
