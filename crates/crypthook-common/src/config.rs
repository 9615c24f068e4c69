//! Process-wide configuration read from the environment.
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `CH_KEY` | shared secret | required |
//! | `CH_ALLOW_DEFAULT_KEY` | permit the built-in fallback secret | off |
//! | `CH_KEY_SALT` | key derivation salt | `changeme` |
//! | `CH_NONCE_SALT` | nonce derivation salt | `crypthook-nonce` |
//! | `CH_CIPHER` | `aes-256-gcm` or `chacha20-poly1305` | `aes-256-gcm` |
//!
//! Peers must agree on every value except the fallback switch.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crypthook_crypto::kdf::{DEFAULT_KEY_SALT, DEFAULT_NONCE_SALT};
use crypthook_crypto::{CipherSuite, DerivedKey, PacketCodec};

pub const SECRET_VAR: &str = "CH_KEY";
pub const ALLOW_DEFAULT_VAR: &str = "CH_ALLOW_DEFAULT_KEY";
pub const KEY_SALT_VAR: &str = "CH_KEY_SALT";
pub const NONCE_SALT_VAR: &str = "CH_NONCE_SALT";
pub const CIPHER_VAR: &str = "CH_CIPHER";

/// Secret used when `CH_KEY` is unset and the fallback is allowed.
///
/// Anyone who has read this source can decrypt such traffic.
pub const FALLBACK_SECRET: &str = "Hello NSA";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "{} is not set and {} is off; refusing to use the built-in secret",
        SECRET_VAR,
        ALLOW_DEFAULT_VAR
    )]
    MissingSecret,

    #[error("unknown cipher {0:?} (expected aes-256-gcm or chacha20-poly1305)")]
    UnknownCipher(String),
}

/// Where the shared secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    Fallback,
}

/// Immutable configuration, loaded once per process.
#[derive(Clone)]
pub struct HookConfig {
    secret: Zeroizing<String>,
    pub secret_source: SecretSource,
    pub cipher: CipherSuite,
    pub key_salt: String,
    pub nonce_salt: String,
}

impl HookConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let (secret, secret_source) = match non_empty(SECRET_VAR) {
            Some(secret) => (secret, SecretSource::Environment),
            None if is_truthy(lookup(ALLOW_DEFAULT_VAR).as_deref()) => {
                warn!(
                    "{} is not set; using the built-in fallback secret. \
                     This traffic is NOT confidential.",
                    SECRET_VAR
                );
                (FALLBACK_SECRET.to_string(), SecretSource::Fallback)
            }
            None => return Err(ConfigError::MissingSecret),
        };

        let cipher = match non_empty(CIPHER_VAR) {
            Some(name) => name.parse::<CipherSuite>().map_err(ConfigError::UnknownCipher)?,
            None => CipherSuite::default(),
        };

        let key_salt = non_empty(KEY_SALT_VAR).unwrap_or_else(|| DEFAULT_KEY_SALT.to_string());
        let nonce_salt =
            non_empty(NONCE_SALT_VAR).unwrap_or_else(|| DEFAULT_NONCE_SALT.to_string());

        debug!(cipher = %cipher, source = ?secret_source, "configuration loaded");

        Ok(Self {
            secret: Zeroizing::new(secret),
            secret_source,
            cipher,
            key_salt,
            nonce_salt,
        })
    }

    /// Configuration with an explicit secret and all other values defaulted.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            secret_source: SecretSource::Environment,
            cipher: CipherSuite::default(),
            key_salt: DEFAULT_KEY_SALT.to_string(),
            nonce_salt: DEFAULT_NONCE_SALT.to_string(),
        }
    }

    pub fn uses_fallback_secret(&self) -> bool {
        self.secret_source == SecretSource::Fallback
    }

    pub fn derive_key(&self) -> DerivedKey {
        DerivedKey::derive(self.secret.as_bytes(), self.key_salt.as_bytes())
    }

    /// Build the codec for this configuration.
    ///
    /// Key derivation runs here, once; the derived key is wiped as soon as
    /// the cipher has been keyed.
    pub fn build_codec(&self) -> PacketCodec {
        let key = self.derive_key();
        PacketCodec::new(&key, self.cipher, self.nonce_salt.as_bytes())
    }

    /// Short SHA-256 fingerprint of the derived key.
    ///
    /// Lets two operators confirm they share a secret without revealing it.
    pub fn key_fingerprint(&self) -> String {
        let key = self.derive_key();
        let digest = Sha256::digest(key.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookConfig")
            .field("secret", &"<redacted>")
            .field("secret_source", &self.secret_source)
            .field("cipher", &self.cipher)
            .field("key_salt", &self.key_salt)
            .field("nonce_salt", &self.nonce_salt)
            .finish()
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    match value {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}
