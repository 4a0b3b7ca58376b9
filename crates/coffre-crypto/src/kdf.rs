//! Key derivation: PBKDF2-HMAC-SHA256 master password → per-stream key

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{KEY_SIZE, PBKDF2_ROUNDS, SALT_SIZE};

/// A 256-bit key derived from the master password and a per-stream salt.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct StreamKey {
    bytes: [u8; KEY_SIZE],
}

impl StreamKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for StreamKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit stream key from the master password and a salt using
/// PBKDF2-HMAC-SHA256 at a fixed iteration count.
///
/// The salt is 16 random bytes generated once per stream and carried in the
/// stream header (it does not need to be secret). The iteration count is a
/// constant: changing it breaks decryption of existing streams.
pub fn derive_stream_key(password: &SecretString, salt: &[u8; SALT_SIZE]) -> StreamKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        PBKDF2_ROUNDS,
        &mut key,
    );
    StreamKey::from_bytes(key)
}
