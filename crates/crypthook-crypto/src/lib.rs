//! Packet protocol for CryptHook.
//!
//! This crate provides:
//! - PBKDF2-HMAC-SHA1 derivation of the 32-byte session key from a shared secret
//! - PBKDF2-HMAC-SHA1 derivation of the 12-byte AEAD nonce from an 8-byte seed
//! - The wire packet layout and its AEAD codec
//!
//! # Design
//!
//! Every packet is self-contained. The sender draws a fresh random seed,
//! stretches it into a nonce and seals the payload. The seed travels in
//! clear so the receiver can rebuild the same nonce without any shared
//! counter. The seed only provides nonce agreement; it adds no secrecy.
//!
//! ```text
//! [1 byte: 0x17] [8 bytes: seed] [16 bytes: auth tag] [ciphertext]
//! ```

#![forbid(unsafe_code)]

pub mod codec;
pub mod kdf;
pub mod packet;
pub mod suite;

pub use codec::{CodecError, PacketCodec};
pub use kdf::{derive_key, derive_key_with_salt, derive_nonce, DerivedKey};
pub use packet::{HEADER_SIZE, MARKER, MAX_LEN, MAX_PAYLOAD};
pub use suite::CipherSuite;
