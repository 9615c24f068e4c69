//! Packet encoding and decoding.
//!
//! # Send path
//!
//! 1. Draw an 8-byte seed from the OS random source
//! 2. Derive the nonce from the seed
//! 3. Seal the plaintext in place with no associated data
//! 4. Emit `marker || seed || tag || ciphertext`
//!
//! # Receive path
//!
//! Check the marker and length, rebuild the nonce from the received seed,
//! then open. A tag mismatch never yields any bytes.

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroize;

use crate::kdf::{derive_nonce, DerivedKey, DEFAULT_NONCE_SALT, SEED_SIZE};
use crate::packet::{PacketBuilder, PacketView, HEADER_SIZE, MAX_PAYLOAD};
use crate::suite::{CipherSuite, SuiteCipher};

/// Errors from encoding or decoding a packet.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet too short: {0} bytes, need at least {}", HEADER_SIZE)]
    ShortPacket(usize),

    #[error("bad marker byte {0:#04x}: peer is not speaking this protocol")]
    BadMarker(u8),

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("authentication failed: packet tampered or wrong key")]
    AuthenticationFailure,

    #[error("payload of {0} bytes exceeds maximum of {}", MAX_PAYLOAD)]
    OversizedPayload(usize),

    #[error("random source unavailable: {0}")]
    RandomnessFailure(String),
}

/// Seals and opens packets under one key.
///
/// The key schedule is computed once at construction; each packet only
/// pays for its own nonce derivation.
pub struct PacketCodec {
    suite: CipherSuite,
    cipher: SuiteCipher,
    nonce_salt: Vec<u8>,
}

impl PacketCodec {
    pub fn new(key: &DerivedKey, suite: CipherSuite, nonce_salt: &[u8]) -> Self {
        Self {
            suite,
            cipher: SuiteCipher::new(suite, key),
            nonce_salt: nonce_salt.to_vec(),
        }
    }

    /// Codec with the default suite and nonce salt.
    pub fn with_key(key: &DerivedKey) -> Self {
        Self::new(key, CipherSuite::default(), DEFAULT_NONCE_SALT.as_bytes())
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encode `plaintext` into a wire packet under a fresh random seed.
    pub fn encode(&self, plaintext: &[u8]) -> Result<Bytes, CodecError> {
        if plaintext.len() > MAX_PAYLOAD {
            return Err(CodecError::OversizedPayload(plaintext.len()));
        }
        let seed = draw_seed()?;
        self.seal_with_seed(&seed, plaintext)
    }

    fn seal_with_seed(
        &self,
        seed: &[u8; SEED_SIZE],
        plaintext: &[u8],
    ) -> Result<Bytes, CodecError> {
        let nonce = derive_nonce(seed, &self.nonce_salt);

        let mut packet = PacketBuilder::new(seed, plaintext);
        let tag = match self.cipher.seal(&nonce, packet.body_mut()) {
            Ok(tag) => tag,
            Err(e) => {
                // The builder still holds plaintext; wipe it before dropping.
                packet.body_mut().zeroize();
                error!(suite = %self.suite, "seal failed: {}", e);
                return Err(CodecError::EncryptionFailure(e.to_string()));
            }
        };

        let packet = packet.finish(&tag);
        debug!(len = plaintext.len(), wire_len = packet.len(), "sealed packet");
        Ok(packet)
    }

    /// Decode a wire packet back into its plaintext.
    pub fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, CodecError> {
        let view = PacketView::parse(packet)?;
        let nonce = derive_nonce(&view.seed, &self.nonce_salt);

        let mut plaintext = view.ciphertext.to_vec();
        if self.cipher.open(&nonce, &mut plaintext, &view.tag).is_err() {
            plaintext.zeroize();
            return Err(CodecError::AuthenticationFailure);
        }

        debug!(wire_len = packet.len(), len = plaintext.len(), "opened packet");
        Ok(plaintext)
    }
}

/// Fill a fresh seed from the OS random source.
///
/// A failure here is fatal to the packet; there is no fallback seed.
pub fn draw_seed() -> Result<[u8; SEED_SIZE], CodecError> {
    let mut seed = [0u8; SEED_SIZE];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| CodecError::RandomnessFailure(e.to_string()))?;
    Ok(seed)
}
