//! Pipeline behavior tests with scripted sources and sinks: exactly-once
//! commit/rollback across every outcome, cooperative cancellation, bounded
//! in-flight chunks, and authentication failure paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use coffre_crypto::{ChunkDecrypter, ChunkEncrypter, CryptoError, HEADER_SIZE, MAC_SIZE};
use coffre_transfer::{
    download_stream, upload_stream, ChunkSink, ChunkSource, MasterKeySource, StaticPassword,
    TransferError,
};

const PASSWORD: &str = "pipeline test password";

fn keys() -> Arc<StaticPassword> {
    Arc::new(StaticPassword::new(SecretString::from(PASSWORD)))
}

fn tokens() -> (CancellationToken, CancellationToken) {
    (CancellationToken::new(), CancellationToken::new())
}

// ── Scripted source/sink doubles ───────────────────────────────────────────

struct VecSource {
    chunks: VecDeque<Vec<u8>>,
    size: u64,
}

impl VecSource {
    fn new(data: &[u8], chunk_size: usize) -> Self {
        Self {
            chunks: data.chunks(chunk_size).map(<[u8]>::to_vec).collect(),
            size: data.len() as u64,
        }
    }
}

impl ChunkSource for VecSource {
    fn file_size(&self) -> u64 {
        self.size
    }

    async fn next(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}

/// Never-ending source; counts how many chunks were ever pulled.
struct InfiniteSource {
    pulls: Arc<AtomicUsize>,
}

impl ChunkSource for InfiniteSource {
    fn file_size(&self) -> u64 {
        u64::MAX
    }

    async fn next(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        Ok(Some(vec![0xAB; 1024]))
    }
}

/// Yields `good` chunks, then fails.
struct FailingSource {
    remaining: usize,
}

impl ChunkSource for FailingSource {
    fn file_size(&self) -> u64 {
        0
    }

    async fn next(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        if self.remaining == 0 {
            anyhow::bail!("simulated read failure");
        }
        self.remaining -= 1;
        Ok(Some(vec![0x11; 256]))
    }
}

#[derive(Default)]
struct SinkState {
    written: Vec<u8>,
    writes: usize,
    commits: usize,
    rollbacks: usize,
}

/// Shared observer for a sink's terminal behavior; survives the sink being
/// consumed by commit/rollback.
#[derive(Clone, Default)]
struct SinkProbe(Arc<Mutex<SinkState>>);

impl SinkProbe {
    fn commits(&self) -> usize {
        self.0.lock().unwrap().commits
    }

    fn rollbacks(&self) -> usize {
        self.0.lock().unwrap().rollbacks
    }

    fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    fn writes(&self) -> usize {
        self.0.lock().unwrap().writes
    }
}

struct MockSink {
    probe: SinkProbe,
    fail_write_at: Option<usize>,
    fail_commit: bool,
    write_delay: Option<Duration>,
}

impl MockSink {
    fn new(probe: &SinkProbe) -> Self {
        Self {
            probe: probe.clone(),
            fail_write_at: None,
            fail_commit: false,
            write_delay: None,
        }
    }
}

impl ChunkSink for MockSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let mut st = self.probe.0.lock().unwrap();
        let seq = st.writes;
        st.writes += 1;
        if self.fail_write_at == Some(seq) {
            anyhow::bail!("simulated write failure at chunk {seq}");
        }
        st.written.extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(self) -> anyhow::Result<()> {
        let mut st = self.probe.0.lock().unwrap();
        st.commits += 1;
        if self.fail_commit {
            anyhow::bail!("simulated commit failure");
        }
        Ok(())
    }

    async fn rollback(self) -> anyhow::Result<()> {
        self.probe.0.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

fn decrypt_whole(ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut dec = ChunkDecrypter::new(SecretString::from(PASSWORD));
    let out = dec.write_chunk(ciphertext)?;
    dec.finish()?;
    Ok(out)
}

fn encrypt_whole(plaintext: &[u8]) -> Vec<u8> {
    let mut enc = ChunkEncrypter::new(SecretString::from(PASSWORD));
    let mut out = enc.write_chunk(plaintext).unwrap();
    out.extend(enc.finish().unwrap());
    out
}

// ── Upload scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn upload_short_file_one_chunk_plus_trailer() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    // 512-byte file read with a 1 KiB chunk size
    let plaintext: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
    let source = VecSource::new(&plaintext, 1024);

    upload_stream(source, MockSink::new(&probe), keys(), None, cancel, shutdown)
        .await
        .unwrap();

    assert_eq!(probe.commits(), 1);
    assert_eq!(probe.rollbacks(), 0);
    assert_eq!(
        probe.writes(),
        2,
        "one ciphertext chunk plus one trailer chunk"
    );

    let stored = probe.written();
    assert_eq!(stored.len(), HEADER_SIZE + 512 + MAC_SIZE);
    assert_eq!(decrypt_whole(&stored).unwrap(), plaintext);
}

#[tokio::test]
async fn upload_empty_file_still_authenticates() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    upload_stream(
        VecSource::new(b"", 1024),
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap();

    assert_eq!(probe.commits(), 1);
    let stored = probe.written();
    assert_eq!(stored.len(), HEADER_SIZE + MAC_SIZE);
    assert_eq!(decrypt_whole(&stored).unwrap(), b"");
}

#[tokio::test]
async fn upload_cancellation_rolls_back_promptly() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    let pulls = Arc::new(AtomicUsize::new(0));

    let cancel_trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_trigger.cancel();
    });

    let err = upload_stream(
        InfiniteSource {
            pulls: pulls.clone(),
        },
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Interrupted));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn upload_shutdown_is_distinguishable_from_cancel() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let stop_trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_trigger.cancel();
    });

    let err = upload_stream(
        InfiniteSource {
            pulls: Arc::new(AtomicUsize::new(0)),
        },
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::AppStopped));
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn upload_source_error_rolls_back() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let err = upload_stream(
        FailingSource { remaining: 3 },
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Source(_)));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn upload_sink_write_error_rolls_back() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let mut sink = MockSink::new(&probe);
    sink.fail_write_at = Some(1);

    let err = upload_stream(
        VecSource::new(&vec![0x5Au8; 8192], 1024),
        sink,
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Sink(_)));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn upload_commit_failure_after_full_stream() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let mut sink = MockSink::new(&probe);
    sink.fail_commit = true;

    let plaintext = vec![0x42u8; 2000];
    let err = upload_stream(
        VecSource::new(&plaintext, 1024),
        sink,
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Commit(_)));
    assert_eq!(probe.commits(), 1, "commit attempted exactly once");
    assert_eq!(probe.rollbacks(), 0, "no rollback after an attempted commit");

    // The trailer made it into the stream before commit failed: the
    // encrypter's finish ran exactly once and the MAC verifies.
    assert_eq!(decrypt_whole(&probe.written()).unwrap(), plaintext);
}

#[tokio::test]
async fn upload_backpressure_bounds_inflight_chunks() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    let pulls = Arc::new(AtomicUsize::new(0));

    let mut sink = MockSink::new(&probe);
    sink.write_delay = Some(Duration::from_millis(40));

    let cancel_trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel_trigger.cancel();
    });

    let err = upload_stream(
        InfiniteSource {
            pulls: pulls.clone(),
        },
        sink,
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TransferError::Interrupted));

    // The sink drains ~10 chunks in 400ms. With capacity-1 handoffs the
    // reader can only run a constant number of chunks ahead of it, no matter
    // how fast the source is.
    let pulled = pulls.load(Ordering::Relaxed);
    assert!(
        pulled < 50,
        "unbuffered handoffs must bound read-ahead, got {pulled} pulls"
    );
}

// ── Download scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn download_roundtrip_chunked_transport() {
    let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 241) as u8).collect();
    let ciphertext = encrypt_whole(&plaintext);

    // Transport slices the stream at 100-byte boundaries, unrelated to how
    // it was encrypted.
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    download_stream(
        VecSource::new(&ciphertext, 100),
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap();

    assert_eq!(probe.commits(), 1);
    assert_eq!(probe.rollbacks(), 0);
    assert_eq!(probe.written(), plaintext);
}

#[tokio::test]
async fn download_wrong_password_never_commits() {
    let ciphertext = encrypt_whole(b"vault contents");
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let wrong = Arc::new(StaticPassword::new(SecretString::from("wrong password")));
    let err = download_stream(
        VecSource::new(&ciphertext, 4096),
        MockSink::new(&probe),
        wrong,
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Cipher(CryptoError::MacMismatch)
    ));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn download_tampered_body_fails_auth() {
    let mut ciphertext = encrypt_whole(&vec![7u8; 500]);
    let mid = HEADER_SIZE + 250;
    ciphertext[mid] ^= 0x80;

    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    let err = download_stream(
        VecSource::new(&ciphertext, 64),
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Cipher(CryptoError::MacMismatch)
    ));
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn download_truncated_stream_incomplete_tail() {
    let ciphertext = encrypt_whole(b"tiny");
    // Keep the header plus a few bytes: less than one tag ever arrives.
    let truncated = &ciphertext[..HEADER_SIZE + 5];

    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    let err = download_stream(
        VecSource::new(truncated, 4096),
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Cipher(CryptoError::IncompleteTail { .. })
    ));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

#[tokio::test]
async fn download_undersized_first_chunk_is_typed_error() {
    let ciphertext = encrypt_whole(b"payload");

    // A transport that delivers the first chunk smaller than the header is
    // a protocol violation, surfaced as a typed error rather than a panic.
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();
    let err = download_stream(
        VecSource::new(&ciphertext, HEADER_SIZE - 8),
        MockSink::new(&probe),
        keys(),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Cipher(CryptoError::HeaderTooShort { .. })
    ));
    assert_eq!(probe.rollbacks(), 1);
}

// ── Password source ────────────────────────────────────────────────────────

struct NoPassword;

impl MasterKeySource for NoPassword {
    async fn master_password(&self) -> anyhow::Result<SecretString> {
        anyhow::bail!("session locked")
    }
}

#[tokio::test]
async fn password_failure_rolls_back() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let err = upload_stream(
        VecSource::new(b"data", 1024),
        MockSink::new(&probe),
        Arc::new(NoPassword),
        None,
        cancel,
        shutdown,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Password(_)));
    assert_eq!(probe.commits(), 0);
    assert_eq!(probe.rollbacks(), 1);
}

// ── Progress reporting ─────────────────────────────────────────────────────

#[tokio::test]
async fn progress_reports_total_at_end() {
    let probe = SinkProbe::default();
    let (cancel, shutdown) = tokens();

    let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_cb = seen.clone();
    let progress: coffre_transfer::ProgressFn =
        Box::new(move |done, total| seen_in_cb.lock().unwrap().push((done, total)));

    let data = vec![3u8; 100_000];
    upload_stream(
        VecSource::new(&data, 4096),
        MockSink::new(&probe),
        keys(),
        Some(progress),
        cancel,
        shutdown,
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    let &(done, total) = seen.last().unwrap();
    assert_eq!(done, 100_000);
    assert_eq!(total, 100_000);
    // Cadence, not per-chunk: 25 chunks must not produce 25 callbacks.
    assert!(seen.len() < 25, "expected sampled progress, got {}", seen.len());
}
