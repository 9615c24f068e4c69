//! Transport-agnostic shim logic.
//!
//! `Shim` applies the codec around any [`GenuineSocket`]. It never touches
//! flags or peer addresses; only buffer contents and the reported length
//! differ from the genuine call.
//!
//! Every method returns `Ok(n)` with the value the caller should see (which
//! may be a genuine `-1` with `errno` already set by the primitive), or an
//! `Err` that the exported symbol turns into `-1` plus a mapped `errno`.

use libc::c_int;
use tracing::{debug, error, warn};

use crypthook_common::{ConfigError, Error, Result};
use crypthook_crypto::{PacketCodec, MAX_LEN};

use crate::genuine::{DestAddr, GenuineSocket, SourceAddr};

/// Descriptor that is never wrapped: in a preloaded process it denotes
/// standard input, not a socket.
pub const STDIN_FD: c_int = 0;

pub struct Shim<'a, G: GenuineSocket> {
    genuine: &'a G,
    codec: std::result::Result<&'a PacketCodec, &'a ConfigError>,
}

impl<'a, G: GenuineSocket> Shim<'a, G> {
    pub fn new(
        genuine: &'a G,
        codec: std::result::Result<&'a PacketCodec, &'a ConfigError>,
    ) -> Self {
        Self { genuine, codec }
    }

    fn codec(&self) -> Result<&'a PacketCodec> {
        self.codec.map_err(|e| Error::Config(e.clone()))
    }

    pub fn send(&self, fd: c_int, buf: &[u8], flags: c_int) -> Result<isize> {
        if fd == STDIN_FD {
            return Ok(self.genuine.send(fd, buf, flags));
        }

        let packet = self.codec()?.encode(buf)?;
        let sent = forward_packet(&packet, |chunk| self.genuine.send(fd, chunk, flags))?;
        if sent <= 0 {
            return Ok(sent);
        }
        Ok(reported_len(buf.len()))
    }

    pub fn send_to(&self, fd: c_int, buf: &[u8], flags: c_int, dest: DestAddr) -> Result<isize> {
        if fd == STDIN_FD {
            return Ok(self.genuine.send_to(fd, buf, flags, dest));
        }

        let packet = self.codec()?.encode(buf)?;
        let sent = forward_packet(&packet, |chunk| {
            self.genuine.send_to(fd, chunk, flags, dest)
        })?;
        if sent <= 0 {
            return Ok(sent);
        }
        Ok(reported_len(buf.len()))
    }

    pub fn recv(&self, fd: c_int, buf: &mut [u8], flags: c_int) -> Result<isize> {
        if fd == STDIN_FD {
            return Ok(self.genuine.recv(fd, buf, flags));
        }

        let codec = self.codec()?;
        let mut wire = vec![0u8; MAX_LEN];
        let n = self.genuine.recv(fd, &mut wire, flags);
        if n <= 0 {
            return Ok(n);
        }
        deliver(codec, fd, received(&wire, n), buf)
    }

    pub fn recv_from(
        &self,
        fd: c_int,
        buf: &mut [u8],
        flags: c_int,
        src: SourceAddr,
    ) -> Result<isize> {
        if fd == STDIN_FD {
            return Ok(self.genuine.recv_from(fd, buf, flags, src));
        }

        let codec = self.codec()?;
        let mut wire = vec![0u8; MAX_LEN];
        let n = self.genuine.recv_from(fd, &mut wire, flags, src);
        if n <= 0 {
            return Ok(n);
        }
        deliver(codec, fd, received(&wire, n), buf)
    }
}

/// The bytes a successful genuine receive left in `wire`.
///
/// With `MSG_TRUNC` a datagram socket reports the datagram's full size,
/// which can exceed the scratch buffer. Such a datagram is never a valid
/// packet; only its head is handed to the decoder, which rejects it.
fn received(wire: &[u8], n: isize) -> &[u8] {
    let n = n as usize;
    if n > wire.len() {
        warn!(len = n, capacity = wire.len(), "datagram larger than any packet");
    }
    &wire[..n.min(wire.len())]
}

fn reported_len(len: usize) -> isize {
    // Slices never exceed isize::MAX bytes.
    len as isize
}

/// Hand one whole packet to `write`, continuing after short writes.
///
/// A failure before any byte went out is returned as the genuine result so
/// the caller sees the primitive's own `-1`/`errno`. A failure after part of
/// the packet went out is an error: the peer now holds a torn packet, and
/// on a stream socket every later packet is misframed. This includes
/// `EAGAIN` on a non-blocking socket, so the caller must treat the
/// connection as broken rather than retry.
fn forward_packet<W>(packet: &[u8], mut write: W) -> Result<isize>
where
    W: FnMut(&[u8]) -> isize,
{
    let mut written = 0usize;
    while written < packet.len() {
        let n = write(&packet[written..]);
        if n <= 0 {
            if written == 0 {
                return Ok(n);
            }
            let err = if n < 0 {
                std::io::Error::last_os_error()
            } else {
                std::io::Error::from(std::io::ErrorKind::WriteZero)
            };
            error!(
                written,
                wire_len = packet.len(),
                "genuine send failed mid-packet: {}",
                err
            );
            return Err(Error::Io(err));
        }
        written += n as usize;
    }
    Ok(reported_len(written))
}

/// Decode `wire` and copy the plaintext into the caller's buffer.
fn deliver(codec: &PacketCodec, fd: c_int, wire: &[u8], out: &mut [u8]) -> Result<isize> {
    let plaintext = match codec.decode(wire) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            let err = Error::from(e);
            if err.is_peer_fault() {
                warn!(fd, wire_len = wire.len(), "dropping packet: {}", err);
            } else {
                error!(fd, "dropping packet: {}", err);
            }
            return Err(err);
        }
    };

    let copied = plaintext.len().min(out.len());
    out[..copied].copy_from_slice(&plaintext[..copied]);
    if copied < plaintext.len() {
        debug!(
            fd,
            len = plaintext.len(),
            capacity = out.len(),
            "plaintext truncated to caller buffer"
        );
    }
    Ok(reported_len(copied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use crypthook_common::HookConfig;
    use crypthook_crypto::{CodecError, HEADER_SIZE, MARKER, MAX_PAYLOAD};

    /// In-memory transport: sends are recorded, receives are scripted.
    #[derive(Default)]
    struct MockSocket {
        sent: RefCell<Vec<(c_int, Vec<u8>, c_int)>>,
        inbound: RefCell<VecDeque<Vec<u8>>>,
        /// Caps how many bytes each send accepts.
        send_limit: Option<usize>,
        /// Scripted results returned instead of touching data.
        send_results: RefCell<VecDeque<isize>>,
        recv_result: Option<isize>,
    }

    impl MockSocket {
        fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.borrow_mut().push_back(bytes.to_vec());
        }

        fn wire(&self) -> Vec<u8> {
            self.sent
                .borrow()
                .iter()
                .flat_map(|(_, bytes, _)| bytes.clone())
                .collect()
        }
    }

    impl GenuineSocket for MockSocket {
        fn send(&self, fd: c_int, buf: &[u8], flags: c_int) -> isize {
            if let Some(result) = self.send_results.borrow_mut().pop_front() {
                if result <= 0 {
                    return result;
                }
            }
            let take = self.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            self.sent.borrow_mut().push((fd, buf[..take].to_vec(), flags));
            take as isize
        }

        fn recv(&self, _fd: c_int, buf: &mut [u8], _flags: c_int) -> isize {
            if let Some(result) = self.recv_result {
                return result;
            }
            match self.inbound.borrow_mut().pop_front() {
                Some(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    n as isize
                }
                None => 0,
            }
        }

        fn send_to(&self, fd: c_int, buf: &[u8], flags: c_int, _dest: DestAddr) -> isize {
            self.send(fd, buf, flags)
        }

        fn recv_from(&self, fd: c_int, buf: &mut [u8], flags: c_int, _src: SourceAddr) -> isize {
            self.recv(fd, buf, flags)
        }
    }

    fn codec() -> PacketCodec {
        HookConfig::with_secret("omghax").build_codec()
    }

    #[test]
    fn test_send_reports_plaintext_length() {
        let mock = MockSocket::default();
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let n = shim.send(5, b"hello", libc::MSG_DONTWAIT).unwrap();
        assert_eq!(n, 5);

        let sent = mock.sent.borrow();
        assert_eq!(sent.len(), 1);
        let (fd, wire, flags) = &sent[0];
        assert_eq!(*fd, 5);
        assert_eq!(*flags, libc::MSG_DONTWAIT);
        assert_eq!(wire.len(), 30);
        assert_eq!(wire[0], MARKER);
        assert_eq!(codec.decode(wire).unwrap(), b"hello");
    }

    #[test]
    fn test_recv_decodes_into_caller_buffer() {
        let mock = MockSocket::default();
        let codec = codec();
        mock.push_inbound(&codec.encode(b"hello").unwrap());
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 64];
        let n = shim.recv(5, &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_shims_round_trip_through_each_other() {
        let mock = MockSocket::default();
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        shim.send_to(7, b"datagram", 0, DestAddr::none()).unwrap();
        let wire = mock.wire();
        mock.push_inbound(&wire);

        let mut buf = [0u8; 16];
        let n = shim.recv_from(7, &mut buf, 0, SourceAddr::none()).unwrap();
        assert_eq!(&buf[..n as usize], b"datagram");
    }

    #[test]
    fn test_stdin_descriptor_is_never_wrapped() {
        let mock = MockSocket::default();
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let n = shim.send(STDIN_FD, b"plain", 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(mock.wire(), b"plain");

        mock.push_inbound(b"raw bytes");
        let mut buf = [0u8; 16];
        let n = shim.recv(STDIN_FD, &mut buf, 0).unwrap();
        assert_eq!(n, 9);
        assert_eq!(&buf[..9], b"raw bytes");
    }

    #[test]
    fn test_stdin_descriptor_is_never_wrapped_when_addressed() {
        let mock = MockSocket::default();
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let n = shim.send_to(STDIN_FD, b"plain", 0, DestAddr::none()).unwrap();
        assert_eq!(n, 5);
        assert_eq!(mock.wire(), b"plain");

        mock.push_inbound(b"raw bytes");
        let mut buf = [0u8; 16];
        let n = shim
            .recv_from(STDIN_FD, &mut buf, 0, SourceAddr::none())
            .unwrap();
        assert_eq!(n, 9);
        assert_eq!(&buf[..9], b"raw bytes");
    }

    #[test]
    fn test_oversized_receive_length_is_rejected_without_panic() {
        let codec = codec();
        let mock = MockSocket {
            recv_result: Some(70_000),
            ..Default::default()
        };
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 64];
        assert!(matches!(
            shim.recv(4, &mut buf, libc::MSG_TRUNC),
            Err(Error::Codec(CodecError::BadMarker(0)))
        ));
        assert!(matches!(
            shim.recv_from(4, &mut buf, libc::MSG_TRUNC, SourceAddr::none()),
            Err(Error::Codec(CodecError::BadMarker(0)))
        ));
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn test_received_clamps_to_scratch() {
        let wire = [MARKER; 32];
        assert_eq!(received(&wire, 10).len(), 10);
        assert_eq!(received(&wire, 32).len(), 32);
        assert_eq!(received(&wire, 40_000).len(), 32);
    }

    #[test]
    fn test_stdin_bypass_ignores_config_failure() {
        let mock = MockSocket::default();
        let refused = ConfigError::MissingSecret;
        let shim = Shim::new(&mock, Err(&refused));

        assert_eq!(shim.send(STDIN_FD, b"plain", 0).unwrap(), 5);
        assert!(matches!(
            shim.send(3, b"plain", 0),
            Err(Error::Config(ConfigError::MissingSecret))
        ));
        // Nothing leaked onto the socket in clear.
        assert_eq!(mock.wire(), b"plain");
    }

    #[test]
    fn test_recv_propagates_nothing_available() {
        let codec = codec();
        for result in [0isize, -1] {
            let mock = MockSocket {
                recv_result: Some(result),
                ..Default::default()
            };
            let shim = Shim::new(&mock, Ok(&codec));
            let mut buf = [0u8; 16];
            assert_eq!(shim.recv(4, &mut buf, 0).unwrap(), result);
        }
    }

    #[test]
    fn test_recv_rejects_plain_peer() {
        let mock = MockSocket::default();
        let codec = codec();
        mock.push_inbound(b"hello from a plain client");
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 64];
        let result = shim.recv(4, &mut buf, 0);
        assert!(matches!(result, Err(Error::Codec(CodecError::BadMarker(b'h')))));
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn test_recv_short_read_is_not_a_packet() {
        let mock = MockSocket::default();
        let codec = codec();
        let packet = codec.encode(b"hello").unwrap();
        mock.push_inbound(&packet[..HEADER_SIZE - 1]);
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 64];
        let result = shim.recv(4, &mut buf, 0);
        assert!(matches!(result, Err(Error::Codec(CodecError::ShortPacket(24)))));
    }

    #[test]
    fn test_tampered_packet_yields_no_bytes_and_socket_keeps_working() {
        let mock = MockSocket::default();
        let codec = codec();
        let mut bad = codec.encode(b"secret").unwrap().to_vec();
        bad[HEADER_SIZE] ^= 0x80;
        mock.push_inbound(&bad);
        mock.push_inbound(&codec.encode(b"next").unwrap());
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 64];
        let result = shim.recv(4, &mut buf, 0);
        assert!(matches!(
            result,
            Err(Error::Codec(CodecError::AuthenticationFailure))
        ));
        assert_eq!(buf, [0u8; 64]);

        let n = shim.recv(4, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n as usize], b"next");
    }

    #[test]
    fn test_recv_truncates_to_caller_capacity() {
        let mock = MockSocket::default();
        let codec = codec();
        mock.push_inbound(&codec.encode(b"hello world").unwrap());
        let shim = Shim::new(&mock, Ok(&codec));

        let mut buf = [0u8; 5];
        let n = shim.recv(4, &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_oversized_send_never_reaches_socket() {
        let mock = MockSocket::default();
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let big = vec![0u8; MAX_PAYLOAD + 1];
        let result = shim.send(4, &big, 0);
        assert!(matches!(
            result,
            Err(Error::Codec(CodecError::OversizedPayload(_)))
        ));
        assert!(mock.sent.borrow().is_empty());

        let max = vec![0u8; MAX_PAYLOAD];
        assert_eq!(shim.send(4, &max, 0).unwrap(), MAX_PAYLOAD as isize);
    }

    #[test]
    fn test_short_writes_complete_the_packet() {
        let mock = MockSocket {
            send_limit: Some(7),
            ..Default::default()
        };
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let n = shim.send(4, b"hello world", 0).unwrap();
        assert_eq!(n, 11);
        assert_eq!(mock.sent.borrow().len(), 36_usize.div_ceil(7));
        assert_eq!(codec.decode(&mock.wire()).unwrap(), b"hello world");
    }

    #[test]
    fn test_genuine_send_failure_is_propagated() {
        let mock = MockSocket::default();
        mock.send_results.borrow_mut().push_back(-1);
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        assert_eq!(shim.send(4, b"hello", 0).unwrap(), -1);
        assert!(mock.sent.borrow().is_empty());
    }

    #[test]
    fn test_failure_mid_packet_is_an_error() {
        let mock = MockSocket {
            send_limit: Some(10),
            ..Default::default()
        };
        {
            let mut results = mock.send_results.borrow_mut();
            results.push_back(1);
            results.push_back(0);
        }
        let codec = codec();
        let shim = Shim::new(&mock, Ok(&codec));

        let result = shim.send(4, b"hello", 0);
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(mock.wire().len(), 10);
    }

    #[test]
    fn test_forward_packet_counts_whole_packet() {
        let mut calls = 0;
        let n = forward_packet(&[0u8; 30], |chunk| {
            calls += 1;
            chunk.len().min(12) as isize
        })
        .unwrap();
        assert_eq!(n, 30);
        assert_eq!(calls, 3);
    }
}
