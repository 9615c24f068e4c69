//! Wire packet layout.
//!
//! ```text
//! offset  0      : marker (0x17)
//! offset  1..8   : random seed
//! offset  9..24  : AEAD tag
//! offset 25..    : ciphertext, same length as the plaintext
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::CodecError;
use crate::kdf::SEED_SIZE;

/// First byte of every packet.
pub const MARKER: u8 = 0x17;

/// Size of the detached AEAD tag.
pub const TAG_SIZE: usize = 16;

/// Marker + seed + tag.
pub const HEADER_SIZE: usize = 1 + SEED_SIZE + TAG_SIZE;

/// Largest packet handed to or read from the genuine socket primitives.
pub const MAX_LEN: usize = 65535;

/// Largest plaintext that fits in one packet.
pub const MAX_PAYLOAD: usize = MAX_LEN - HEADER_SIZE;

const SEED_OFFSET: usize = 1;
const TAG_OFFSET: usize = SEED_OFFSET + SEED_SIZE;

/// Borrowed view of a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketView<'a> {
    pub seed: [u8; SEED_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Split `bytes` into header fields and ciphertext.
    ///
    /// The marker is checked before the length so that a peer speaking
    /// plain traffic is reported as such even for tiny reads. Nothing past
    /// the first byte is looked at when the marker is wrong.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let Some(&first) = bytes.first() else {
            return Err(CodecError::ShortPacket(0));
        };
        if first != MARKER {
            return Err(CodecError::BadMarker(first));
        }
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::ShortPacket(bytes.len()));
        }

        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&bytes[SEED_OFFSET..TAG_OFFSET]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&bytes[TAG_OFFSET..HEADER_SIZE]);

        Ok(Self {
            seed,
            tag,
            ciphertext: &bytes[HEADER_SIZE..],
        })
    }
}

/// Packet under construction: header with a zeroed tag, then the plaintext.
///
/// The caller seals `body_mut()` in place and then fills the tag.
pub(crate) struct PacketBuilder {
    buf: BytesMut,
}

impl PacketBuilder {
    pub(crate) fn new(seed: &[u8; SEED_SIZE], plaintext: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + plaintext.len());
        buf.put_u8(MARKER);
        buf.put_slice(seed);
        // Placeholder for tag
        buf.put_bytes(0, TAG_SIZE);
        buf.put_slice(plaintext);
        Self { buf }
    }

    pub(crate) fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_SIZE..]
    }

    pub(crate) fn finish(mut self, tag: &[u8; TAG_SIZE]) -> Bytes {
        self.buf[TAG_OFFSET..HEADER_SIZE].copy_from_slice(tag);
        self.buf.freeze()
    }
}
