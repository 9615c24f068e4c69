//! Key and nonce derivation.
//!
//! Both derivations run PBKDF2-HMAC-SHA1 with a fixed iteration count.
//! They are pure functions: the same inputs always give the same output,
//! so two processes sharing a secret always agree on the key.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the derived AEAD key.
pub const KEY_SIZE: usize = 32;

/// Size of the derived AEAD nonce.
pub const NONCE_SIZE: usize = 12;

/// Size of the random seed carried in every packet.
pub const SEED_SIZE: usize = 8;

/// PBKDF2 iteration count for both derivations.
pub const ITERATIONS: u32 = 1000;

/// Default salt for key derivation. Both peers must use the same value.
pub const DEFAULT_KEY_SALT: &str = "changeme";

/// Default salt for nonce derivation.
pub const DEFAULT_NONCE_SALT: &str = "crypthook-nonce";

/// Nonce salt of legacy peers, which reused the key salt for nonces.
pub const LEGACY_NONCE_SALT: &str = "changeme";

/// A 32-byte symmetric key derived from the shared secret.
///
/// Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    /// Stretch `secret` into a key using `salt`.
    pub fn derive(secret: &[u8], salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha1>(secret, salt, ITERATIONS, &mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive the key for `secret` with the default key salt.
pub fn derive_key(secret: &str) -> DerivedKey {
    DerivedKey::derive(secret.as_bytes(), DEFAULT_KEY_SALT.as_bytes())
}

/// Derive the key for `secret` with an explicit salt.
pub fn derive_key_with_salt(secret: &[u8], salt: &[u8]) -> DerivedKey {
    DerivedKey::derive(secret, salt)
}

/// Stretch a packet seed into the AEAD nonce.
///
/// On send the seed is fresh randomness; on receive it is copied from the
/// packet header, so it is peer-controlled input.
pub fn derive_nonce(seed: &[u8; SEED_SIZE], salt: &[u8]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    pbkdf2_hmac::<Sha1>(seed, salt, ITERATIONS, &mut nonce);
    nonce
}
