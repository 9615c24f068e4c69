//! Common error types for CryptHook.

use thiserror::Error;

use crate::config::ConfigError;
use crypthook_crypto::CodecError;

/// Result type alias using CryptHook's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for CryptHook operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A packet could not be sealed or opened
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The underlying socket primitive failed part way through a packet
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure says something about the peer rather than
    /// about this process.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            Error::Codec(
                CodecError::ShortPacket(_)
                    | CodecError::BadMarker(_)
                    | CodecError::AuthenticationFailure
            )
        )
    }
}
