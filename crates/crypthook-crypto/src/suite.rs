//! AEAD suite selection.
//!
//! Both suites take a 32-byte key and a 12-byte nonce and produce a
//! detached 16-byte tag, so the wire layout is the same for either.
//! Peers must agree on the suite; a mismatch shows up as an
//! authentication failure.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;

use crate::kdf::{DerivedKey, NONCE_SIZE};
use crate::packet::TAG_SIZE;

/// AEAD algorithm used to seal packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherSuite {
    /// AES-256-GCM, the default.
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305 for hosts without AES acceleration.
    ChaCha20Poly1305,
}

impl CipherSuite {
    pub fn name(&self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "aes-256-gcm",
            CipherSuite::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" | "aes" => Ok(CipherSuite::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" | "chacha" => {
                Ok(CipherSuite::ChaCha20Poly1305)
            }
            other => Err(other.to_string()),
        }
    }
}

/// Keyed cipher instance for one suite.
pub(crate) enum SuiteCipher {
    Aes(Box<Aes256Gcm>),
    ChaCha(ChaCha20Poly1305),
}

impl SuiteCipher {
    pub(crate) fn new(suite: CipherSuite, key: &DerivedKey) -> Self {
        match suite {
            CipherSuite::Aes256Gcm => {
                SuiteCipher::Aes(Box::new(Aes256Gcm::new(key.as_bytes().into())))
            }
            CipherSuite::ChaCha20Poly1305 => {
                SuiteCipher::ChaCha(ChaCha20Poly1305::new(key.as_bytes().into()))
            }
        }
    }

    /// Encrypt `buffer` in place and return the detached tag.
    pub(crate) fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], aes_gcm::aead::Error> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            SuiteCipher::Aes(cipher) => cipher.encrypt_in_place_detached(nonce, b"", buffer)?,
            SuiteCipher::ChaCha(cipher) => cipher.encrypt_in_place_detached(nonce, b"", buffer)?,
        };

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(tag.as_slice());
        Ok(out)
    }

    /// Verify `tag` and decrypt `buffer` in place.
    ///
    /// On error the buffer contents are unspecified and must be discarded.
    pub(crate) fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        buffer: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<(), aes_gcm::aead::Error> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(tag);
        match self {
            SuiteCipher::Aes(cipher) => cipher.decrypt_in_place_detached(nonce, b"", buffer, tag),
            SuiteCipher::ChaCha(cipher) => {
                cipher.decrypt_in_place_detached(nonce, b"", buffer, tag)
            }
        }
    }
}
