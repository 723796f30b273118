//! Callback shapes, lifted from spec.md §6. All of them are `Fn`, not
//! `FnMut`: a single connection callback instance is shared by every
//! connection the server accepts, and (for `connection_callback`) fired
//! twice on the same connection (connect, then disconnect), so it cannot
//! assume exclusive access.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::connection::Connection;
use crate::timestamp::Timestamp;

pub type ConnectionCallback = Arc<dyn Fn(&Connection) + Send + Sync + 'static>;
pub type MessageCallback = Arc<dyn Fn(&Connection, &mut Buffer, Timestamp) + Send + Sync + 'static>;
pub type WriteCompleteCallback = Arc<dyn Fn(&Connection) + Send + Sync + 'static>;
pub type HighWaterMarkCallback = Arc<dyn Fn(&Connection, usize) + Send + Sync + 'static>;
pub(crate) type CloseCallback = Arc<dyn Fn(&Connection) + Send + Sync + 'static>;

/// Invoked once per worker loop immediately after its `EventLoop` is
/// constructed and published, mirroring `ThreadInitCallback` in the original.
pub type ThreadInitCallback = Arc<dyn Fn(&crate::event_loop::LoopHandle) + Send + Sync + 'static>;

pub(crate) fn default_connection_callback() -> ConnectionCallback {
    Arc::new(|conn| {
        log::debug!(
            "connection [{}] {}",
            conn.name(),
            if conn.connected() { "connected" } else { "disconnected" }
        );
    })
}

pub(crate) fn default_message_callback() -> MessageCallback {
    Arc::new(|_conn, buf, _ts| {
        // No handler installed: drop whatever arrived, same as muduo's
        // defaultMessageCallback which just discards retrieveAllAsString().
        buf.retrieve_all();
    })
}
