//! coffre-crypto: client-side streaming encryption for vault files
//!
//! Encrypted stream format (binary):
//! ```text
//! [16 bytes: random salt][16 bytes: random IV][N bytes: ciphertext][32 bytes: encrypted HMAC-SHA256 tag]
//! ```
//!
//! The header (salt + IV) appears once at the start of the stream; the key is
//! re-derived from it with PBKDF2-HMAC-SHA256. The tag is computed over the
//! plaintext and encrypted with the same continuing AES-256-CFB keystream as
//! the body, so nothing in the byte stream is distinguishable from ciphertext.
//! Chunk boundaries are a transport concern: the stream decrypts identically
//! no matter how it was sliced in flight.

pub mod kdf;
pub mod stream;
pub mod tail;

mod error;

pub use error::CryptoError;
pub use kdf::{derive_stream_key, StreamKey};
pub use stream::{ChunkDecrypter, ChunkEncrypter, StreamHeader};
pub use tail::TailStorage;

/// Size of the per-stream KDF salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the AES-CFB initialization vector in bytes
pub const IV_SIZE: usize = 16;

/// Size of the stream header (salt + IV)
pub const HEADER_SIZE: usize = SALT_SIZE + IV_SIZE;

/// Size of a derived stream key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the HMAC-SHA256 authentication tag
pub const MAC_SIZE: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count, fixed for wire compatibility
pub const PBKDF2_ROUNDS: u32 = 10_000;
