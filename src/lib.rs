//! Non-blocking, multi-reactor TCP server core: one `EventLoop` per
//! thread, a round-robin pool handing accepted connections to worker
//! loops, and application-level `Buffer`s mediating partial writes and
//! high-watermark backpressure.
//!
//! Out of scope, by design: TLS, UDP, an IOCP/Windows backend, and a
//! general-purpose actor runtime. See each module for the C++ reactor
//! design ([muduo](https://github.com/chenshuo/muduo)-style) this crate's
//! architecture is drawn from.

pub mod acceptor;
pub mod buffer;
pub mod callback;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod loop_pool;
pub mod loop_thread;
pub mod named_thread;
pub mod poller;
pub mod server;
pub mod socket;
pub mod timestamp;

pub use buffer::Buffer;
pub use callback::{
    ConnectionCallback, HighWaterMarkCallback, MessageCallback, ThreadInitCallback,
    WriteCompleteCallback,
};
pub use connection::Connection;
pub use event_loop::{EventLoop, LoopHandle};
pub use server::{ReusePort, Server};
pub use timestamp::Timestamp;

/// Reads and logs `SZMUDUO_USE_POLL` (reserved, never acted on — see
/// `config::warn_if_poll_backend_requested`) and installs nothing else;
/// callers decide their own logging setup (`env_logger` in the dev-deps
/// is wired up by the test suite, not by the library).
pub fn check_environment() {
    config::warn_if_poll_backend_requested();
}
