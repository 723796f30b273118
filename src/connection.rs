//! A single accepted TCP connection's state machine, grounded on
//! `TcpConnection.h`/`TcpConnection.cc`. `Connection` is the cheap,
//! `Clone`-able public handle (`Arc<Mutex<ConnectionInner>>`); all of its
//! methods that mutate state hop onto the owning loop via
//! `run_in_loop`/`queue_in_loop` so they are safe to call from any thread
//! (spec.md §6/§7), mirroring how the original always posts through
//! `loop_->runInLoop` even though its own ownership is single-threaded
//! `shared_ptr`.

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::callback::{
    default_connection_callback, default_message_callback, CloseCallback, ConnectionCallback,
    HighWaterMarkCallback, MessageCallback, WriteCompleteCallback,
};
use crate::channel::Channel;
use crate::error::{interrupted, is_fatal_write_error, would_block};
use crate::event_loop::LoopHandle;
use crate::socket::Socket;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

pub(crate) struct ConnectionInner {
    name: String,
    loop_handle: LoopHandle,
    socket: Socket,
    channel: Arc<Mutex<Channel>>,
    state: State,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    input_buffer: Buffer,
    output_buffer: Buffer,
    high_water_mark: usize,
    connection_callback: ConnectionCallback,
    message_callback: MessageCallback,
    write_complete_callback: WriteCompleteCallback,
    high_water_mark_callback: Option<HighWaterMarkCallback>,
    close_callback: Option<CloseCallback>,
}

/// A cheap, shareable handle to an accepted connection. `.send()` and
/// `.shutdown()` may be called from any thread; everything else they do
/// happens on the connection's own loop thread.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
    pub(crate) fn new(
        loop_handle: LoopHandle,
        name: String,
        socket: Socket,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        high_water_mark: usize,
    ) -> Connection {
        let fd = socket.as_raw_fd();
        let channel = Channel::new(loop_handle.clone(), fd);
        // `TcpConnection::TcpConnection` unconditionally enables
        // keep-alive on the accepted socket; failure isn't fatal to the
        // connection, so it's logged rather than propagated.
        if let Err(err) = socket.set_keep_alive(true) {
            log::warn!("failed to enable keep-alive for {name}: {err}");
        }

        let inner = Arc::new(Mutex::new(ConnectionInner {
            name,
            loop_handle,
            socket,
            channel: channel.clone(),
            state: State::Connecting,
            local_addr,
            peer_addr,
            input_buffer: Buffer::new(),
            output_buffer: Buffer::new(),
            high_water_mark,
            connection_callback: default_connection_callback(),
            message_callback: default_message_callback(),
            write_complete_callback: Arc::new(|_conn| {}),
            high_water_mark_callback: None,
            close_callback: None,
        }));

        {
            let mut ch = channel.lock().unwrap();
            ch.set_tie(&inner);

            let w = Arc::downgrade(&inner);
            ch.set_read_callback(Arc::new(move |ts| {
                if let Some(inner) = w.upgrade() {
                    ConnectionInner::handle_read(&inner, ts);
                }
            }));

            let w = Arc::downgrade(&inner);
            ch.set_write_callback(Arc::new(move || {
                if let Some(inner) = w.upgrade() {
                    ConnectionInner::handle_write(&inner);
                }
            }));

            let w = Arc::downgrade(&inner);
            ch.set_close_callback(Arc::new(move || {
                if let Some(inner) = w.upgrade() {
                    ConnectionInner::handle_close(&inner);
                }
            }));

            let w = Arc::downgrade(&inner);
            ch.set_error_callback(Arc::new(move || {
                if let Some(inner) = w.upgrade() {
                    ConnectionInner::handle_error(&inner);
                }
            }));
        }

        Connection { inner }
    }

    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn connected(&self) -> bool {
        self.inner.lock().unwrap().state == State::Connected
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.lock().unwrap().local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.lock().unwrap().peer_addr
    }

    /// The `EventLoop` this connection is pinned to.
    pub fn get_loop(&self) -> LoopHandle {
        self.inner.lock().unwrap().loop_handle.clone()
    }

    pub fn set_high_water_mark(&self, bytes: usize) {
        self.inner.lock().unwrap().high_water_mark = bytes;
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        self.inner.lock().unwrap().message_callback = cb;
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        self.inner.lock().unwrap().connection_callback = cb;
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        self.inner.lock().unwrap().write_complete_callback = cb;
    }

    pub fn set_high_water_mark_callback(&self, cb: HighWaterMarkCallback) {
        self.inner.lock().unwrap().high_water_mark_callback = Some(cb);
    }

    pub(crate) fn set_close_callback(&self, cb: CloseCallback) {
        self.inner.lock().unwrap().close_callback = Some(cb);
    }

    /// `TcpConnection::send`: always hops through the loop, even when
    /// called from the loop thread itself, so the buffered-vs-direct-write
    /// decision only ever runs on that one thread.
    pub fn send(&self, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let (loop_handle, inner) = {
            let guard = self.inner.lock().unwrap();
            (guard.loop_handle.clone(), self.inner.clone())
        };
        loop_handle.run_in_loop(move || ConnectionInner::send_in_loop(&inner, &data));
    }

    /// `TcpConnection::shutdown`: half-close once any buffered output has
    /// drained. Only the first call (while still `Connected`) schedules
    /// anything; `shutdown_in_loop` itself has no state gate, since
    /// `handle_write` re-invokes it directly once the output buffer
    /// drains, after this has already moved the state to `Disconnecting`.
    pub fn shutdown(&self) {
        let (loop_handle, inner) = {
            let mut guard = self.inner.lock().unwrap();
            if guard.state != State::Connected {
                return;
            }
            guard.state = State::Disconnecting;
            (guard.loop_handle.clone(), self.inner.clone())
        };
        loop_handle.run_in_loop(move || ConnectionInner::shutdown_in_loop(&inner));
    }

    pub(crate) fn connect_established(&self) {
        let (cb, conn) = {
            let mut guard = self.inner.lock().unwrap();
            debug_assert_eq!(guard.state, State::Connecting);
            guard.state = State::Connected;
            guard.channel.lock().unwrap().enable_reading();
            (guard.connection_callback.clone(), self.clone())
        };
        cb(&conn);
    }

    pub(crate) fn connect_destroyed(&self) {
        let (was_connected, cb, conn) = {
            let mut guard = self.inner.lock().unwrap();
            let was_connected = guard.state == State::Connected;
            if was_connected {
                guard.state = State::Disconnected;
                guard.channel.lock().unwrap().disable_all();
            }
            (was_connected, guard.connection_callback.clone(), self.clone())
        };
        if was_connected {
            cb(&conn);
        }
        self.inner.lock().unwrap().channel.lock().unwrap().remove();
    }
}

fn raw_write(fd: std::os::unix::io::RawFd, data: &[u8]) -> std::io::Result<usize> {
    loop {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if interrupted(&err) {
                continue;
            }
            return Err(err);
        }
        return Ok(n as usize);
    }
}

fn socket_error(fd: std::os::unix::io::RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(-1)
    } else {
        err
    }
}

impl ConnectionInner {
    /// `TcpConnection::handleRead`. The input buffer is swapped out for the
    /// duration of the message callback so a handler that calls
    /// `conn.send()` (locking this same `ConnectionInner`) can't deadlock.
    fn handle_read(inner: &Arc<Mutex<ConnectionInner>>, receive_time: Timestamp) {
        let (read_result, message_cb, mut buf, conn) = {
            let mut guard = inner.lock().unwrap();
            let fd = guard.socket.as_raw_fd();
            let result = guard.input_buffer.read_from_fd(fd);
            let buf = std::mem::take(&mut guard.input_buffer);
            (result, guard.message_callback.clone(), buf, Connection { inner: inner.clone() })
        };

        match read_result {
            Ok(0) => {
                inner.lock().unwrap().input_buffer = buf;
                Self::handle_close(inner);
            }
            Ok(_) => {
                message_cb(&conn, &mut buf, receive_time);
                inner.lock().unwrap().input_buffer = buf;
            }
            Err(err) if would_block(&err) => {
                inner.lock().unwrap().input_buffer = buf;
            }
            Err(err) => {
                inner.lock().unwrap().input_buffer = buf;
                log::error!("read failed for {}: {err}", conn.name());
                Self::handle_error(inner);
            }
        }
    }

    /// `TcpConnection::handleWrite`.
    fn handle_write(inner: &Arc<Mutex<ConnectionInner>>) {
        let is_writing = inner.lock().unwrap().channel.lock().unwrap().is_writing();
        if !is_writing {
            log::trace!("connection is down, no more writing");
            return;
        }

        let write_result = {
            let guard = inner.lock().unwrap();
            let fd = guard.socket.as_raw_fd();
            guard.output_buffer.write_to_fd(fd)
        };

        match write_result {
            Ok(n) => {
                let (drained, write_complete_cb, state, conn) = {
                    let mut guard = inner.lock().unwrap();
                    guard.output_buffer.retrieve(n);
                    let drained = guard.output_buffer.readable_bytes() == 0;
                    if drained {
                        guard.channel.lock().unwrap().disable_writing();
                    }
                    (
                        drained,
                        guard.write_complete_callback.clone(),
                        guard.state,
                        Connection { inner: inner.clone() },
                    )
                };
                if drained {
                    write_complete_cb(&conn);
                    if state == State::Disconnecting {
                        Self::shutdown_in_loop(inner);
                    }
                }
            }
            Err(err) if would_block(&err) => {}
            Err(err) => {
                log::error!("write failed for {}: {err}", conn_name(inner));
            }
        }
    }

    /// `TcpConnection::handleClose`.
    fn handle_close(inner: &Arc<Mutex<ConnectionInner>>) {
        let (conn_cb, close_cb, conn) = {
            let mut guard = inner.lock().unwrap();
            debug_assert!(matches!(guard.state, State::Connected | State::Disconnecting));
            guard.state = State::Disconnected;
            guard.channel.lock().unwrap().disable_all();
            (
                guard.connection_callback.clone(),
                guard.close_callback.clone(),
                Connection { inner: inner.clone() },
            )
        };
        conn_cb(&conn);
        match close_cb {
            Some(cb) => cb(&conn),
            None => log::warn!("connection {} closed with no close callback installed", conn.name()),
        }
    }

    /// `TcpConnection::handleError`.
    fn handle_error(inner: &Arc<Mutex<ConnectionInner>>) {
        let guard = inner.lock().unwrap();
        let fd = guard.socket.as_raw_fd();
        let err = socket_error(fd);
        log::error!("connection {} - SO_ERROR = {}", guard.name, err);
    }

    /// `TcpConnection::sendInLoop`.
    fn send_in_loop(inner: &Arc<Mutex<ConnectionInner>>, data: &[u8]) {
        let mut guard = inner.lock().unwrap();
        if guard.state == State::Disconnected {
            log::warn!("giving up sending, connection {} is disconnected", guard.name);
            return;
        }

        let mut nwritten = 0usize;
        let mut remaining = data.len();
        let mut fault = false;

        let already_writing = guard.channel.lock().unwrap().is_writing();
        if !already_writing && guard.output_buffer.readable_bytes() == 0 {
            let fd = guard.socket.as_raw_fd();
            match raw_write(fd, data) {
                Ok(n) => {
                    nwritten = n;
                    remaining = data.len() - n;
                    if remaining == 0 {
                        let cb = guard.write_complete_callback.clone();
                        let loop_handle = guard.loop_handle.clone();
                        let conn = Connection { inner: inner.clone() };
                        drop(guard);
                        loop_handle.queue_in_loop(move || cb(&conn));
                        return;
                    }
                }
                Err(err) => {
                    if !would_block(&err) {
                        if is_fatal_write_error(&err) {
                            fault = true;
                        } else {
                            log::error!("write failed for {}: {err}", guard.name);
                            fault = true;
                        }
                    }
                }
            }
        }

        if !fault && remaining > 0 {
            let old_len = guard.output_buffer.readable_bytes();
            let crosses_watermark = old_len < guard.high_water_mark
                && old_len + remaining >= guard.high_water_mark;
            if crosses_watermark {
                if let Some(cb) = guard.high_water_mark_callback.clone() {
                    let loop_handle = guard.loop_handle.clone();
                    let conn = Connection { inner: inner.clone() };
                    let total = old_len + remaining;
                    loop_handle.queue_in_loop(move || cb(&conn, total));
                }
            }
            guard.output_buffer.append(&data[nwritten..]);
            if !guard.channel.lock().unwrap().is_writing() {
                guard.channel.lock().unwrap().enable_writing();
            }
        }
    }

    /// `TcpConnection::shutdownInLoop`: acts on write-interest alone, not
    /// connection state — `shutdown()` is the only place that gates on
    /// `Connected`, so this runs unconditionally on every invocation,
    /// including the deferred one from `handle_write` once pending output
    /// has drained.
    fn shutdown_in_loop(inner: &Arc<Mutex<ConnectionInner>>) {
        let guard = inner.lock().unwrap();
        if !guard.channel.lock().unwrap().is_writing() {
            if let Err(err) = guard.socket.shutdown_write() {
                log::warn!("shutdown_write failed for {}: {err}", guard.name);
            }
        }
    }
}

fn conn_name(inner: &Arc<Mutex<ConnectionInner>>) -> String {
    inner.lock().unwrap().name.clone()
}
