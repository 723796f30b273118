//! Readiness demultiplexer abstraction. `EpollPoller` (in `epoll`) is the
//! only implementation this core ships; spec.md §6 reserves
//! `SZMUDUO_USE_POLL` for a poll(2) backend that was never implemented in
//! the original either (see `config::warn_if_poll_backend_requested`).

pub mod epoll;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Interest (and, reused for returned events, readiness) mask. Kept as two
/// bools rather than a bitflags type: the original's `kReadEvent`/
/// `kWriteEvent`/`kNoneEvent` only ever combine these two axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { readable: false, writable: false };
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };

    pub fn add(self, other: Interest) -> Interest {
        Interest {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }

    pub fn is_none(self) -> bool {
        !self.readable && !self.writable
    }
}

/// A fd's registration state with the poller, mirroring `Channel::index_`
/// (`kNew = -1`, `kAdded = 1`, `kDeleted = 2`) from `EPollPoller.cc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    New,
    Added,
    Deleted,
}

impl Default for RegistrationState {
    fn default() -> RegistrationState {
        RegistrationState::New
    }
}

/// One fd's readiness, translated from the backend's native event bits.
/// Carries no channel pointer (see the crate-level REDESIGN FLAGS note):
/// the event loop looks the fd up in its own channel map to dispatch.
#[derive(Debug, Clone, Copy)]
pub struct PollEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    /// `EPOLLHUP`: peer hung up. Dispatched as a close unless `readable` is
    /// also set, matching `Channel::handleEventWithGuard`'s ordering.
    pub hup: bool,
    pub error: bool,
}

/// The demultiplexer contract an `EventLoop` drives. `fd`'s registration
/// state lives on the caller's side (the owning `Channel`) and is threaded
/// through by mutable reference, exactly like `Channel::index_` being
/// read and rewritten by `Poller::updateChannel`/`removeChannel`.
pub trait Poller {
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<PollEvent>>;

    fn update(
        &mut self,
        fd: RawFd,
        interest: Interest,
        state: &mut RegistrationState,
    ) -> io::Result<()>;

    fn remove(&mut self, fd: RawFd, state: &mut RegistrationState) -> io::Result<()>;

    fn has(&self, fd: RawFd) -> bool;
}
