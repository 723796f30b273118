//! Tunables collected from the constants the original hardcodes in
//! `EventLoop.cc`, `EPollPoller.cc` and `TcpConnection.cc`. Kept as a plain
//! `Config` rather than a builder because nothing here needs validation —
//! every field is a byte count or a duration with an obviously sane default.

use std::time::Duration;

/// `kPollTimeMs` in the original: how long a single `Poller::poll` call may
/// block before returning with zero events. Bounds how quickly a foreign
/// `quit()` is observed (spec.md §5).
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// `EPollPoller::kInitEventListSize`.
pub const DEFAULT_EVENTS_CAPACITY: usize = 16;

/// `TcpConnection::highWaterMark_`'s default, 64 MiB.
pub const DEFAULT_HIGH_WATERMARK: usize = 64 * 1024 * 1024;

/// `Buffer::kInitialSize`.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// `Buffer::kCheapPrepend`.
pub const BUFFER_PREPEND_SIZE: usize = 8;

/// Size of the on-stack extra segment `Buffer::read_from_fd` scatter-reads
/// into when the writable tail is smaller than the kernel has buffered.
pub const SCATTER_READ_EXTRA_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub poll_timeout: Duration,
    pub initial_events_capacity: usize,
    pub default_high_watermark: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            initial_events_capacity: DEFAULT_EVENTS_CAPACITY,
            default_high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }
}

/// `SZMUDUO_USE_POLL` is reserved by spec.md §6 for a future poll(2)-based
/// demultiplexer. It is read and logged, never acted on: the epoll backend
/// is the only implementation this core ships.
pub fn warn_if_poll_backend_requested() {
    if std::env::var_os("SZMUDUO_USE_POLL").is_some() {
        log::warn!(
            "SZMUDUO_USE_POLL is set but no poll(2) backend is implemented; using epoll"
        );
    }
}
