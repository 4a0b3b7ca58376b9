//! Stage plumbing shared by the upload and download pipelines.
//!
//! Stages talk over capacity-1 channels carrying [`StreamItem`]s. A clean
//! end of stream is the explicit `End` marker; a channel that closes without
//! one means the upstream stage aborted, and the receiver must not finalize
//! anything. That distinction is what keeps commit/rollback exactly-once:
//! the sink commits only after `End`, and rolls back on every other exit.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{ChunkSink, ChunkSource, ProgressFn, TransferError, PROGRESS_INTERVAL};

pub(crate) enum StreamItem {
    Chunk(Vec<u8>),
    End,
}

/// Send `item` downstream unless the transfer terminates first.
/// Returns false when the send did not happen.
pub(crate) async fn forward(
    tx: &mpsc::Sender<StreamItem>,
    term: &CancellationToken,
    item: StreamItem,
) -> bool {
    tokio::select! {
        biased;
        _ = term.cancelled() => false,
        res = tx.send(item) => res.is_ok(),
    }
}

/// Reader stage: pulls chunks from the source and hands them to the cipher
/// stage, reporting progress at a fixed cadence. Owns the source; backends
/// close on drop when the stage exits.
pub(crate) async fn read_stage<R: ChunkSource>(
    mut source: R,
    tx: mpsc::Sender<StreamItem>,
    term: CancellationToken,
    fail: mpsc::Sender<TransferError>,
    progress: Option<ProgressFn>,
) {
    let total = source.file_size();
    let mut processed: u64 = 0;
    let mut chunks: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = term.cancelled() => return,
            res = source.next() => match res {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let _ = fail.send(TransferError::Source(e)).await;
                    return;
                }
            },
        };

        processed += chunk.len() as u64;
        chunks += 1;
        if !chunk.is_empty() && !forward(&tx, &term, StreamItem::Chunk(chunk)).await {
            return;
        }
        if chunks % PROGRESS_INTERVAL == 0 {
            if let Some(cb) = &progress {
                cb(processed, total);
            }
        }
    }

    if let Some(cb) = &progress {
        cb(processed, total);
    }
    forward(&tx, &term, StreamItem::End).await;
}

/// Sink stage: sole owner of the destination transaction. Commits exactly
/// when a clean `End` arrives; every other exit path rolls back.
pub(crate) async fn sink_stage<W: ChunkSink>(
    mut sink: W,
    mut rx: mpsc::Receiver<StreamItem>,
    term: CancellationToken,
    fail: mpsc::Sender<TransferError>,
    done: oneshot::Sender<()>,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = term.cancelled() => {
                rollback_quietly(sink).await;
                return;
            }
            item = rx.recv() => match item {
                Some(item) => item,
                // input closed without an End marker: upstream aborted
                None => {
                    rollback_quietly(sink).await;
                    return;
                }
            },
        };

        match item {
            StreamItem::Chunk(chunk) => {
                if let Err(e) = sink.write_chunk(&chunk).await {
                    let _ = fail.send(TransferError::Sink(e)).await;
                    rollback_quietly(sink).await;
                    return;
                }
            }
            StreamItem::End => {
                match sink.commit().await {
                    Ok(()) => {
                        let _ = done.send(());
                    }
                    Err(e) => {
                        let _ = fail.send(TransferError::Commit(e)).await;
                    }
                }
                return;
            }
        }
    }
}

async fn rollback_quietly<W: ChunkSink>(sink: W) {
    if let Err(e) = sink.rollback().await {
        tracing::warn!("rollback failed: {e}");
    }
}

/// Coordinator: waits for the first terminal event and resolves the
/// transfer's outcome. The transfer-scoped token is cancelled here and only
/// here, so the termination signal has a single writer.
pub(crate) async fn coordinate(
    term: &CancellationToken,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    mut fail_rx: mpsc::Receiver<TransferError>,
    done_rx: oneshot::Receiver<()>,
) -> Result<(), TransferError> {
    enum Outcome {
        Done,
        StagesGone,
        Fail(TransferError),
        Cancelled,
        Stopped,
    }

    let outcome = tokio::select! {
        biased;
        done = done_rx => match done {
            Ok(()) => Outcome::Done,
            Err(_) => Outcome::StagesGone,
        },
        maybe = fail_rx.recv() => match maybe {
            Some(err) => Outcome::Fail(err),
            None => Outcome::StagesGone,
        },
        _ = cancel.cancelled() => Outcome::Cancelled,
        _ = shutdown.cancelled() => Outcome::Stopped,
    };

    match outcome {
        Outcome::Done => Ok(()),
        Outcome::Fail(err) => {
            term.cancel();
            Err(err)
        }
        Outcome::Cancelled => {
            term.cancel();
            tracing::debug!("transfer cancelled by caller");
            Err(TransferError::Interrupted)
        }
        Outcome::Stopped => {
            term.cancel();
            tracing::debug!("transfer aborted by shutdown");
            Err(TransferError::AppStopped)
        }
        Outcome::StagesGone => {
            // Every stage exited without committing: surface the buffered
            // failure if one was reported.
            term.cancel();
            Err(fail_rx
                .recv()
                .await
                .unwrap_or(TransferError::Interrupted))
        }
    }
}
