//! The un-intercepted socket primitives.
//!
//! Each shim forwards to the next definition of its symbol in the dynamic
//! link order (`dlsym(RTLD_NEXT, ..)`), which is normally libc's. The four
//! handles are resolved together on first use and cached for the life of
//! the process. Concurrent first callers wait on the same resolution, so
//! every thread observes the same handles.

use std::ffi::{c_void, CStr};

use libc::{c_int, size_t, sockaddr, socklen_t, ssize_t};
use once_cell::sync::OnceCell;
use tracing::error;

use crate::errno;

type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
type SendToFn = unsafe extern "C" fn(
    c_int,
    *const c_void,
    size_t,
    c_int,
    *const sockaddr,
    socklen_t,
) -> ssize_t;
type RecvFromFn = unsafe extern "C" fn(
    c_int,
    *mut c_void,
    size_t,
    c_int,
    *mut sockaddr,
    *mut socklen_t,
) -> ssize_t;

/// Destination address of an addressed send, passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct DestAddr {
    addr: *const sockaddr,
    len: socklen_t,
}

impl DestAddr {
    /// # Safety
    /// `addr` must be null or valid for `len` bytes for the duration of the
    /// genuine call it is handed to.
    pub unsafe fn new(addr: *const sockaddr, len: socklen_t) -> Self {
        Self { addr, len }
    }

    /// No destination (connected socket).
    pub fn none() -> Self {
        Self {
            addr: std::ptr::null(),
            len: 0,
        }
    }
}

/// Source address out-parameters of an addressed receive.
#[derive(Debug, Clone, Copy)]
pub struct SourceAddr {
    addr: *mut sockaddr,
    len: *mut socklen_t,
}

impl SourceAddr {
    /// # Safety
    /// `addr` and `len` must be null or satisfy the `recvfrom(2)` contract
    /// for the duration of the genuine call they are handed to.
    pub unsafe fn new(addr: *mut sockaddr, len: *mut socklen_t) -> Self {
        Self { addr, len }
    }

    /// Caller does not want the peer address.
    pub fn none() -> Self {
        Self {
            addr: std::ptr::null_mut(),
            len: std::ptr::null_mut(),
        }
    }
}

/// Capability interface over the genuine data-transfer primitives.
///
/// Return values follow the C convention: a byte count, or `-1` with
/// `errno` set by the primitive.
pub trait GenuineSocket {
    fn send(&self, fd: c_int, buf: &[u8], flags: c_int) -> isize;
    fn recv(&self, fd: c_int, buf: &mut [u8], flags: c_int) -> isize;
    fn send_to(&self, fd: c_int, buf: &[u8], flags: c_int, dest: DestAddr) -> isize;
    fn recv_from(&self, fd: c_int, buf: &mut [u8], flags: c_int, src: SourceAddr) -> isize;
}

/// Handles resolved from the next object in link order.
pub struct LibcSocket {
    send: Option<SendFn>,
    recv: Option<RecvFn>,
    send_to: Option<SendToFn>,
    recv_from: Option<RecvFromFn>,
}

static GENUINE: OnceCell<LibcSocket> = OnceCell::new();

/// The process-wide genuine primitive table.
pub fn libc_socket() -> &'static LibcSocket {
    GENUINE.get_or_init(LibcSocket::resolve)
}

impl LibcSocket {
    fn resolve() -> Self {
        let table = Self::lookup_all();
        if !table.is_complete() {
            error!("genuine socket table incomplete; unresolved calls fail with ENOSYS");
        }
        table
    }

    fn lookup_all() -> Self {
        // SAFETY: each symbol is transmuted to the signature it has in
        // <sys/socket.h>.
        unsafe {
            Self {
                send: lookup(c"send").map(|p| std::mem::transmute::<*mut c_void, SendFn>(p)),
                recv: lookup(c"recv").map(|p| std::mem::transmute::<*mut c_void, RecvFn>(p)),
                send_to: lookup(c"sendto")
                    .map(|p| std::mem::transmute::<*mut c_void, SendToFn>(p)),
                recv_from: lookup(c"recvfrom")
                    .map(|p| std::mem::transmute::<*mut c_void, RecvFromFn>(p)),
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.send.is_some()
            && self.recv.is_some()
            && self.send_to.is_some()
            && self.recv_from.is_some()
    }
}

fn lookup(name: &CStr) -> Option<*mut c_void> {
    // SAFETY: name is NUL-terminated; RTLD_NEXT is a valid pseudo-handle.
    let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if ptr.is_null() {
        error!("genuine {:?} not found in link chain", name);
        None
    } else {
        Some(ptr)
    }
}

fn unresolved() -> isize {
    errno::set(libc::ENOSYS);
    -1
}

impl GenuineSocket for LibcSocket {
    fn send(&self, fd: c_int, buf: &[u8], flags: c_int) -> isize {
        match self.send {
            // SAFETY: buf is a live slice for the duration of the call.
            Some(f) => unsafe { f(fd, buf.as_ptr().cast(), buf.len(), flags) },
            None => unresolved(),
        }
    }

    fn recv(&self, fd: c_int, buf: &mut [u8], flags: c_int) -> isize {
        match self.recv {
            // SAFETY: buf is a live, writable slice for the duration of the call.
            Some(f) => unsafe { f(fd, buf.as_mut_ptr().cast(), buf.len(), flags) },
            None => unresolved(),
        }
    }

    fn send_to(&self, fd: c_int, buf: &[u8], flags: c_int, dest: DestAddr) -> isize {
        match self.send_to {
            // SAFETY: dest validity is guaranteed by DestAddr::new's caller.
            Some(f) => unsafe {
                f(fd, buf.as_ptr().cast(), buf.len(), flags, dest.addr, dest.len)
            },
            None => unresolved(),
        }
    }

    fn recv_from(&self, fd: c_int, buf: &mut [u8], flags: c_int, src: SourceAddr) -> isize {
        match self.recv_from {
            // SAFETY: src validity is guaranteed by SourceAddr::new's caller.
            Some(f) => unsafe {
                f(fd, buf.as_mut_ptr().cast(), buf.len(), flags, src.addr, src.len)
            },
            None => unresolved(),
        }
    }
}
