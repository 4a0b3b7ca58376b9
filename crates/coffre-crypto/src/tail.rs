//! Fixed-size trailing-window buffer.
//!
//! `TailStorage` splits a byte stream into bytes that are safe to release
//! downstream and a held-back suffix of exactly `window` bytes. The decrypter
//! uses it to withhold the trailing authentication tag from consumers until
//! the stream ends: total length is unknown in advance, so the last `window`
//! bytes seen so far must always stay buffered.

use crate::CryptoError;

pub struct TailStorage {
    window: usize,
    buf: Vec<u8>,
}

impl TailStorage {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            buf: Vec::with_capacity(window),
        }
    }

    /// Feed `chunk` into the window; returns the bytes that are no longer
    /// part of the trailing `window` bytes (possibly empty).
    ///
    /// Invariant: released bytes plus the retained buffer always equal the
    /// input seen so far, in order.
    pub fn write(&mut self, chunk: &[u8]) -> Vec<u8> {
        let w = self.window;
        if chunk.len() >= w {
            // The chunk alone determines the new tail: release everything
            // buffered plus the chunk's own prefix.
            let cut = chunk.len() - w;
            let mut released = Vec::with_capacity(self.buf.len() + cut);
            released.extend_from_slice(&self.buf);
            released.extend_from_slice(&chunk[..cut]);
            self.buf.clear();
            self.buf.extend_from_slice(&chunk[cut..]);
            released
        } else if self.buf.len() + chunk.len() >= w {
            // Partial overlap: the oldest buffered bytes fall out of the window.
            let cut = self.buf.len() + chunk.len() - w;
            let released: Vec<u8> = self.buf.drain(..cut).collect();
            self.buf.extend_from_slice(chunk);
            released
        } else {
            // Window not yet full, nothing to release.
            self.buf.extend_from_slice(chunk);
            Vec::new()
        }
    }

    /// Number of bytes currently held back.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Return the held-back tail. Fails if the stream was shorter than one
    /// full window.
    pub fn finish(&mut self) -> Result<Vec<u8>, CryptoError> {
        if self.buf.len() < self.window {
            return Err(CryptoError::IncompleteTail {
                got: self.buf.len(),
                need: self.window,
            });
        }
        Ok(std::mem::take(&mut self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_large_chunk() {
        let mut tail = TailStorage::new(4);
        let released = tail.write(b"abcdefgh");
        assert_eq!(released, b"abcd");
        assert_eq!(tail.finish().unwrap(), b"efgh");
    }

    #[test]
    fn test_chunk_exactly_window() {
        let mut tail = TailStorage::new(4);
        assert!(tail.write(b"abcd").is_empty());
        assert_eq!(tail.finish().unwrap(), b"abcd");
    }

    #[test]
    fn test_small_chunks_fill_then_spill() {
        let mut tail = TailStorage::new(4);
        assert!(tail.write(b"ab").is_empty());
        assert!(tail.write(b"cd").is_empty());
        assert_eq!(tail.write(b"e"), b"a");
        assert_eq!(tail.write(b"fg"), b"bc");
        assert_eq!(tail.finish().unwrap(), b"defg");
    }

    #[test]
    fn test_replace_whole_window() {
        let mut tail = TailStorage::new(4);
        assert!(tail.write(b"abcd").is_empty());
        let released = tail.write(b"wxyz");
        assert_eq!(released, b"abcd");
        assert_eq!(tail.finish().unwrap(), b"wxyz");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut tail = TailStorage::new(4);
        tail.write(b"abcd");
        assert!(tail.write(b"").is_empty());
        assert_eq!(tail.finish().unwrap(), b"abcd");
    }

    #[test]
    fn test_finish_short_stream_fails() {
        let mut tail = TailStorage::new(8);
        tail.write(b"abc");
        let err = tail.finish().unwrap_err();
        assert_eq!(err, CryptoError::IncompleteTail { got: 3, need: 8 });
    }

    #[test]
    fn test_finish_empty_stream_fails() {
        let mut tail = TailStorage::new(8);
        assert_eq!(
            tail.finish().unwrap_err(),
            CryptoError::IncompleteTail { got: 0, need: 8 }
        );
    }

    proptest! {
        /// Released output plus the final tail must reassemble the input
        /// exactly, for any window size and any chunking of the stream.
        #[test]
        fn prop_reassembly(
            window in 1usize..64,
            chunks in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..128),
                0..24,
            ),
        ) {
            let mut tail = TailStorage::new(window);
            let mut out = Vec::new();
            let mut input = Vec::new();

            for chunk in &chunks {
                input.extend_from_slice(chunk);
                out.extend(tail.write(chunk));
            }

            if input.len() >= window {
                let kept = tail.finish().unwrap();
                prop_assert_eq!(kept.len(), window);
                out.extend(kept);
                prop_assert_eq!(out, input);
            } else {
                prop_assert!(out.is_empty());
                prop_assert_eq!(
                    tail.finish().unwrap_err(),
                    CryptoError::IncompleteTail { got: input.len(), need: window }
                );
            }
        }
    }
}
