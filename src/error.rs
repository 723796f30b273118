//! Errno classification helpers shared by the buffer, poller and connection
//! code. Nothing here returns a crate-specific error type: every fallible
//! syscall wrapper in this crate returns `std::io::Result`, and the only
//! user-visible failure channel is the connection callback firing with a
//! disconnected state (see the connection module).

use std::io;

/// `EWOULDBLOCK`/`EAGAIN`: the operation would block a non-blocking
/// descriptor. Never an error worth logging; the caller just waits for the
/// next readiness notification.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// `EINTR`: the syscall was interrupted by a signal. Retried transparently.
pub fn interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// `EPIPE` / `ECONNRESET`: the peer is gone. These set a connection's fault
/// flag, which suppresses further output buffering because nothing written
/// from here on will ever reach anyone.
pub fn is_fatal_write_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EPIPE || code == libc::ECONNRESET
    )
}
