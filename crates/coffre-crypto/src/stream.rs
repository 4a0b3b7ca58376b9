//! Chunked streaming cipher.
//!
//! `ChunkEncrypter` turns a plaintext chunk stream into
//! `[header][ciphertext…][encrypted tag]`; `ChunkDecrypter` is the inverse.
//! Both are single-owner state machines: calls must be serialized, and the
//! chunk sizes on the two sides are independent.
//!
//! The MAC is computed over plaintext. On the decrypt side the trailing
//! `MAC_SIZE` bytes of the stream are the tag, but total length is unknown
//! until the stream ends, so decrypted bytes pass through a [`TailStorage`]
//! and only the released prefix is ever handed to the caller (and MAC'd).

use aes::cipher::KeyIvInit;
use aes::Aes256;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::SecretString;
use sha2::Sha256;

use crate::kdf::{derive_stream_key, StreamKey};
use crate::tail::TailStorage;
use crate::{CryptoError, HEADER_SIZE, IV_SIZE, MAC_SIZE, SALT_SIZE};

type Aes256CfbEnc = cfb_mode::BufEncryptor<Aes256>;
type Aes256CfbDec = cfb_mode::BufDecryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Per-stream header: KDF salt and cipher IV, generated once from OS
/// randomness and never reused across streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; IV_SIZE],
}

impl StreamHeader {
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);
        Self { salt, iv }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..SALT_SIZE].copy_from_slice(&self.salt);
        out[SALT_SIZE..].copy_from_slice(&self.iv);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CryptoError::HeaderTooShort {
                got: bytes.len(),
                need: HEADER_SIZE,
            });
        }
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        salt.copy_from_slice(&bytes[..SALT_SIZE]);
        iv.copy_from_slice(&bytes[SALT_SIZE..HEADER_SIZE]);
        Ok(Self { salt, iv })
    }
}

fn keyed_mac(key: &StreamKey) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .expect("HMAC-SHA256 accepts any key length")
}

enum EncrypterState {
    /// No chunk seen yet; key material is derived on first use and the
    /// password dropped immediately after.
    Pending { password: SecretString },
    Streaming { cipher: Aes256CfbEnc, mac: HmacSha256 },
    Finished,
}

/// Streaming encrypter: plaintext chunks in, ciphertext chunks out.
///
/// The first `write_chunk` emits the 32-byte header followed by ciphertext;
/// `finish` must be called exactly once after the last chunk and returns the
/// encrypted authentication tag to append to the stream.
pub struct ChunkEncrypter {
    state: EncrypterState,
}

impl ChunkEncrypter {
    pub fn new(password: SecretString) -> Self {
        Self {
            state: EncrypterState::Pending { password },
        }
    }

    pub fn write_chunk(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match std::mem::replace(&mut self.state, EncrypterState::Finished) {
            EncrypterState::Pending { password } => {
                let header = StreamHeader::generate();
                let key = derive_stream_key(&password, &header.salt);
                drop(password);
                let mut cipher = Aes256CfbEnc::new(key.as_bytes().into(), (&header.iv).into());
                let mut mac = keyed_mac(&key);

                mac.update(plaintext);
                let mut body = plaintext.to_vec();
                cipher.encrypt(&mut body);
                self.state = EncrypterState::Streaming { cipher, mac };

                let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
                out.extend_from_slice(&header.to_bytes());
                out.extend_from_slice(&body);
                Ok(out)
            }
            EncrypterState::Streaming { mut cipher, mut mac } => {
                mac.update(plaintext);
                let mut body = plaintext.to_vec();
                cipher.encrypt(&mut body);
                self.state = EncrypterState::Streaming { cipher, mac };
                Ok(body)
            }
            EncrypterState::Finished => Err(CryptoError::Finished),
        }
    }

    /// Finalize the MAC over everything written so far and return it
    /// encrypted by the continuing keystream, indistinguishable from body
    /// ciphertext. On a stream that never saw a chunk this still emits
    /// header plus tag, so empty payloads round-trip.
    pub fn finish(&mut self) -> Result<Vec<u8>, CryptoError> {
        match std::mem::replace(&mut self.state, EncrypterState::Finished) {
            EncrypterState::Pending { password } => {
                let header = StreamHeader::generate();
                let key = derive_stream_key(&password, &header.salt);
                drop(password);
                let mut cipher = Aes256CfbEnc::new(key.as_bytes().into(), (&header.iv).into());
                let mac = keyed_mac(&key);

                let mut tag = mac.finalize().into_bytes().to_vec();
                cipher.encrypt(&mut tag);

                let mut out = Vec::with_capacity(HEADER_SIZE + MAC_SIZE);
                out.extend_from_slice(&header.to_bytes());
                out.extend_from_slice(&tag);
                Ok(out)
            }
            EncrypterState::Streaming { mut cipher, mac } => {
                let mut tag = mac.finalize().into_bytes().to_vec();
                cipher.encrypt(&mut tag);
                Ok(tag)
            }
            EncrypterState::Finished => Err(CryptoError::Finished),
        }
    }
}

enum DecrypterState {
    Pending { password: SecretString },
    Streaming { cipher: Aes256CfbDec, mac: HmacSha256 },
    Finished,
}

/// Streaming decrypter: ciphertext chunks in, verified-pending plaintext out.
///
/// The first chunk must carry at least the full stream header. Returned
/// plaintext always lags the input by `MAC_SIZE` bytes (the candidate tag
/// held in [`TailStorage`]); `finish` verifies the tag in constant time.
pub struct ChunkDecrypter {
    state: DecrypterState,
    tail: TailStorage,
}

impl ChunkDecrypter {
    pub fn new(password: SecretString) -> Self {
        Self {
            state: DecrypterState::Pending { password },
            tail: TailStorage::new(MAC_SIZE),
        }
    }

    pub fn write_chunk(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match std::mem::replace(&mut self.state, DecrypterState::Finished) {
            DecrypterState::Pending { password } => {
                if ciphertext.len() < HEADER_SIZE {
                    // The transport delivered a first chunk smaller than the
                    // header. Restore state so the error is observable as a
                    // protocol failure, not a use-after-finish.
                    self.state = DecrypterState::Pending { password };
                    return Err(CryptoError::HeaderTooShort {
                        got: ciphertext.len(),
                        need: HEADER_SIZE,
                    });
                }
                let header = StreamHeader::parse(&ciphertext[..HEADER_SIZE])?;
                let key = derive_stream_key(&password, &header.salt);
                drop(password);
                let mut cipher = Aes256CfbDec::new(key.as_bytes().into(), (&header.iv).into());
                let mut mac = keyed_mac(&key);

                let released = Self::advance(&mut self.tail, &mut cipher, &mut mac, &ciphertext[HEADER_SIZE..]);
                self.state = DecrypterState::Streaming { cipher, mac };
                Ok(released)
            }
            DecrypterState::Streaming { mut cipher, mut mac } => {
                let released = Self::advance(&mut self.tail, &mut cipher, &mut mac, ciphertext);
                self.state = DecrypterState::Streaming { cipher, mac };
                Ok(released)
            }
            DecrypterState::Finished => Err(CryptoError::Finished),
        }
    }

    /// Decrypt `input`, run it through the tail window, and MAC exactly the
    /// released bytes — never the withheld candidate tag.
    fn advance(
        tail: &mut TailStorage,
        cipher: &mut Aes256CfbDec,
        mac: &mut HmacSha256,
        input: &[u8],
    ) -> Vec<u8> {
        let mut buf = input.to_vec();
        cipher.decrypt(&mut buf);
        let released = tail.write(&buf);
        mac.update(&released);
        released
    }

    /// Verify the stream's authentication tag. Any error means the whole
    /// stream must be treated as corrupted or tampered with.
    pub fn finish(&mut self) -> Result<(), CryptoError> {
        match std::mem::replace(&mut self.state, DecrypterState::Finished) {
            DecrypterState::Pending { .. } => Err(CryptoError::IncompleteTail {
                got: 0,
                need: MAC_SIZE,
            }),
            DecrypterState::Streaming { cipher: _, mac } => {
                let tag = self.tail.finish()?;
                mac.verify_slice(&tag).map_err(|_| CryptoError::MacMismatch)
            }
            DecrypterState::Finished => Err(CryptoError::Finished),
        }
    }
}
