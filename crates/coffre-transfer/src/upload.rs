//! Upload pipeline: source → encrypter → transactional sink.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use coffre_crypto::ChunkEncrypter;

use crate::pipeline::{coordinate, forward, read_stage, sink_stage, StreamItem};
use crate::{ChunkSink, ChunkSource, MasterKeySource, ProgressFn, TransferError};

/// Encrypt a chunk stream from `source` into `sink`.
///
/// Spawns the reader, cipher, and sink stages and coordinates them from the
/// calling task; returns only after every stage has exited. Exactly one
/// terminal outcome occurs: `Ok(())` after the sink committed, or one typed
/// error after the destination was rolled back (a failed commit is the one
/// case where commit was already attempted instead).
pub async fn upload_stream<R, W, P>(
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
    stages.spawn(encrypt_stage(
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

    // Wait-group: no stage outlives the call.
    while stages.join_next().await.is_some() {}
    outcome
}

/// Cipher stage: fetches the master password once, then encrypts chunks in
/// arrival order. A clean `End` finalizes the MAC and forwards the encrypted
/// trailer before its own `End`; an input that closes without `End` means
/// the reader aborted, and nothing is finalized.
async fn encrypt_stage<P: MasterKeySource>(
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
    let mut encrypter = ChunkEncrypter::new(password);

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
                let ciphertext = match encrypter.write_chunk(&chunk) {
                    Ok(ct) => ct,
                    Err(e) => {
                        let _ = fail.send(TransferError::Cipher(e)).await;
                        return;
                    }
                };
                if !forward(&tx, &term, StreamItem::Chunk(ciphertext)).await {
                    return;
                }
            }
            StreamItem::End => {
                match encrypter.finish() {
                    Ok(trailer) => {
                        if forward(&tx, &term, StreamItem::Chunk(trailer)).await {
                            forward(&tx, &term, StreamItem::End).await;
                        }
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
