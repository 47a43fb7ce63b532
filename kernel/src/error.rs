//! Kernel status codes
//!
//! Every syscall resolves to one of these codes (or a non-negative payload
//! value). Inside the kernel they travel as the error arm of [`SysResult`];
//! at the syscall boundary they are written to the caller's return register
//! as negative integers.

use core::fmt;

/// Result type used throughout the kernel.
pub type SysResult<T> = core::result::Result<T, Errno>;

/// Status codes shared with userspace.
///
/// A successful operation returns the `Ok` arm of [`SysResult`] (encoded as
/// `0` or a payload value), so `ENONE` is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "status codes must be propagated or written to the caller"]
#[repr(i64)]
pub enum Errno {
    /// Unspecified internal failure.
    Unknown = -1,
    /// Operation not implemented.
    NoSys = -2,
    /// End of file or stream.
    Eof = -3,
    /// No such file or file descriptor.
    NoFile = -4,
    /// Out of physical or heap memory.
    NoMem = -5,
    /// Invalid argument.
    Inval = -6,
    /// I/O error or unsupported transfer direction.
    Io = -7,
    /// Object already exists.
    Exists = -8,
    /// Pipe has no readers left.
    Pipe = -9,
    /// Pipe is full and nothing could be written.
    Full = -10,
}

/// Return-register value for a successful call with no payload.
pub const ENONE: u64 = 0;

impl Errno {
    /// The raw negative code as it appears in the caller's return register.
    pub const fn code(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::Unknown => "EUNKNOWN",
            Errno::NoSys => "ENOSYS",
            Errno::Eof => "EEOF",
            Errno::NoFile => "ENOFILE",
            Errno::NoMem => "ENOMEM",
            Errno::Inval => "EINVAL",
            Errno::Io => "EIO",
            Errno::Exists => "EEXISTS",
            Errno::Pipe => "EPIPE",
            Errno::Full => "EFULL",
        };
        write!(f, "{}", name)
    }
}

/// Encode a syscall result for the caller's return register.
///
/// Payload values pass through unchanged; errors become their negative code.
pub fn encode(result: SysResult<u64>) -> u64 {
    match result {
        Ok(v) => v,
        Err(e) => e.code() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_abi() {
        assert_eq!(Errno::Unknown.code(), -1);
        assert_eq!(Errno::NoSys.code(), -2);
        assert_eq!(Errno::Eof.code(), -3);
        assert_eq!(Errno::NoFile.code(), -4);
        assert_eq!(Errno::NoMem.code(), -5);
        assert_eq!(Errno::Inval.code(), -6);
        assert_eq!(Errno::Io.code(), -7);
        assert_eq!(Errno::Exists.code(), -8);
        assert_eq!(Errno::Pipe.code(), -9);
        assert_eq!(Errno::Full.code(), -10);
    }

    #[test]
    fn encode_passes_payloads_and_wraps_errors() {
        assert_eq!(encode(Ok(42)), 42);
        assert_eq!(encode(Err(Errno::NoMem)) as i64, -5);
    }
}
