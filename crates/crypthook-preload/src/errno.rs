//! Thread-local `errno` access and the error-to-errno mapping.

use libc::c_int;

use crypthook_common::{ConfigError, Error};
use crypthook_crypto::CodecError;

#[cfg(any(target_os = "linux", target_os = "emscripten"))]
unsafe fn location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(target_os = "android")]
unsafe fn location() -> *mut c_int {
    libc::__errno()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn location() -> *mut c_int {
    libc::__error()
}

/// Set the calling thread's `errno`.
pub fn set(code: c_int) {
    // SAFETY: the location is the calling thread's own errno slot.
    unsafe { *location() = code }
}

/// The `errno` a shim reports for `err`.
pub fn for_error(err: &Error) -> c_int {
    match err {
        Error::Config(ConfigError::MissingSecret) => libc::EACCES,
        Error::Config(ConfigError::UnknownCipher(_)) => libc::EINVAL,
        Error::Codec(CodecError::ShortPacket(_)) => libc::EAGAIN,
        Error::Codec(CodecError::BadMarker(_)) => libc::EPROTO,
        Error::Codec(CodecError::AuthenticationFailure) => libc::EBADMSG,
        Error::Codec(CodecError::OversizedPayload(_)) => libc::EMSGSIZE,
        Error::Codec(CodecError::EncryptionFailure(_))
        | Error::Codec(CodecError::RandomnessFailure(_)) => libc::EIO,
        Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_visible_to_last_os_error() {
        set(libc::EPROTO);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::EPROTO)
        );
    }

    #[test]
    fn test_codec_errors_map_to_distinct_codes() {
        let cases = [
            (Error::from(CodecError::ShortPacket(3)), libc::EAGAIN),
            (Error::from(CodecError::BadMarker(0)), libc::EPROTO),
            (Error::from(CodecError::AuthenticationFailure), libc::EBADMSG),
            (Error::from(CodecError::OversizedPayload(70_000)), libc::EMSGSIZE),
            (
                Error::from(CodecError::RandomnessFailure("gone".into())),
                libc::EIO,
            ),
            (Error::from(ConfigError::MissingSecret), libc::EACCES),
        ];
        for (err, code) in cases {
            assert_eq!(for_error(&err), code, "{}", err);
        }
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let err = Error::from(std::io::Error::from_raw_os_error(libc::ECONNRESET));
        assert_eq!(for_error(&err), libc::ECONNRESET);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::WriteZero));
        assert_eq!(for_error(&err), libc::EIO);
    }
}
