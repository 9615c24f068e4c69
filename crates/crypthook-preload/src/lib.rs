//! Preloadable interception layer.
//!
//! Build as a `cdylib` and load ahead of libc:
//!
//! ```text
//! $ LD_PRELOAD=libcrypthook.so CH_KEY=omghax ncat -l -p 5000
//! $ LD_PRELOAD=libcrypthook.so CH_KEY=omghax ncat localhost 5000
//! ```
//!
//! The library exports `send`, `recv`, `sendto` and `recvfrom`. Each one
//! seals or opens the buffer and forwards to the genuine primitive; return
//! values and blocking behaviour are those of the genuine call, except that
//! lengths count plaintext bytes. Codec and configuration failures surface
//! as `-1` with `errno` set, plus a diagnostic on stderr.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use libc::{c_int, size_t, sockaddr, socklen_t, ssize_t};
use once_cell::sync::Lazy;
use tracing::{error, info};

use crypthook_common::{ConfigError, Error, HookConfig};
use crypthook_crypto::PacketCodec;

pub mod errno;
pub mod genuine;
pub mod shim;

use genuine::{libc_socket, DestAddr, LibcSocket, SourceAddr};
use shim::Shim;

/// Process-wide state, built on the first intercepted call.
struct HookState {
    codec: Result<PacketCodec, ConfigError>,
}

impl HookState {
    fn load() -> Self {
        crypthook_common::init_host_diagnostics();

        let codec = match HookConfig::from_env() {
            Ok(config) => {
                info!(cipher = %config.cipher, "crypthook active");
                Ok(config.build_codec())
            }
            Err(e) => {
                error!("crypthook disabled, socket traffic will fail: {}", e);
                Err(e)
            }
        };

        Self { codec }
    }

    fn shim(&'static self) -> Shim<'static, LibcSocket> {
        Shim::new(libc_socket(), self.codec.as_ref())
    }
}

static STATE: Lazy<HookState> = Lazy::new(HookState::load);

/// Run a shim body, mapping errors and panics to `-1` with `errno` set.
fn intercept<F>(body: F) -> ssize_t
where
    F: FnOnce() -> crypthook_common::Result<isize>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => fail(&e),
        Err(_) => {
            errno::set(libc::EIO);
            -1
        }
    }
}

fn fail(err: &Error) -> ssize_t {
    errno::set(errno::for_error(err));
    -1
}

unsafe fn input<'a>(buf: *const c_void, len: size_t) -> Option<&'a [u8]> {
    if len == 0 {
        Some(&[])
    } else if buf.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(buf.cast(), len))
    }
}

unsafe fn output<'a>(buf: *mut c_void, len: size_t) -> Option<&'a mut [u8]> {
    if len == 0 {
        Some(&mut [])
    } else if buf.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts_mut(buf.cast(), len))
    }
}

fn bad_buffer() -> ssize_t {
    errno::set(libc::EFAULT);
    -1
}

/// Intercepted `send(2)`.
#[no_mangle]
pub unsafe extern "C" fn send(
    sockfd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
) -> ssize_t {
    let Some(data) = input(buf, len) else {
        return bad_buffer();
    };
    intercept(|| STATE.shim().send(sockfd, data, flags))
}

/// Intercepted `sendto(2)`.
#[no_mangle]
pub unsafe extern "C" fn sendto(
    sockfd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    dest_addr: *const sockaddr,
    addrlen: socklen_t,
) -> ssize_t {
    let Some(data) = input(buf, len) else {
        return bad_buffer();
    };
    let dest = DestAddr::new(dest_addr, addrlen);
    intercept(|| STATE.shim().send_to(sockfd, data, flags, dest))
}

/// Intercepted `recv(2)`.
#[no_mangle]
pub unsafe extern "C" fn recv(
    sockfd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
) -> ssize_t {
    let Some(out) = output(buf, len) else {
        return bad_buffer();
    };
    intercept(|| STATE.shim().recv(sockfd, out, flags))
}

/// Intercepted `recvfrom(2)`.
#[no_mangle]
pub unsafe extern "C" fn recvfrom(
    sockfd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
    src_addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> ssize_t {
    let Some(out) = output(buf, len) else {
        return bad_buffer();
    };
    let src = SourceAddr::new(src_addr, addrlen);
    intercept(|| STATE.shim().recv_from(sockfd, out, flags, src))
}

#[no_mangle]
pub extern "C" fn crypthook_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}
