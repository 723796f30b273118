//! The public-facing TCP server, grounded on `TcpServer.h`/`TcpServer.cc`.
//! Owns the acceptor (on the base loop), the round-robin worker pool, and
//! the `name -> Connection` map; new connections are handed off to
//! whichever loop `LoopPool::next_loop` picks and removed again through a
//! base-loop hop so the map is only ever touched from one thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::acceptor::Acceptor;
use crate::callback::{
    default_connection_callback, default_message_callback, ConnectionCallback, MessageCallback,
    ThreadInitCallback, WriteCompleteCallback,
};
use crate::config::Config;
use crate::connection::Connection;
use crate::event_loop::LoopHandle;
use crate::loop_pool::LoopPool;
use crate::socket::Socket;

/// Mirrors `TcpServer::Option`: whether the acceptor's listening socket
/// sets `SO_REUSEPORT` (letting several processes/threads share the same
/// listening address) in addition to `SO_REUSEADDR`, which is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReusePort {
    Disabled,
    Enabled,
}

pub struct Server {
    name: String,
    base_loop: LoopHandle,
    acceptor: Arc<Acceptor>,
    loop_pool: Arc<LoopPool>,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
    next_conn_id: AtomicUsize,
    started: Mutex<bool>,
    config: Config,
    connection_callback: Mutex<ConnectionCallback>,
    message_callback: Mutex<MessageCallback>,
    write_complete_callback: Mutex<WriteCompleteCallback>,
}

impl Server {
    pub fn new(
        base_loop: LoopHandle,
        name: impl Into<String>,
        addr: SocketAddr,
        reuse_port: ReusePort,
    ) -> std::io::Result<Arc<Server>> {
        let name = name.into();
        let acceptor = Acceptor::new(base_loop.clone(), addr, reuse_port == ReusePort::Enabled)?;
        let loop_pool = Arc::new(LoopPool::new(base_loop.clone(), format!("{name}-loop")));

        let server = Arc::new(Server {
            name,
            base_loop,
            acceptor,
            loop_pool,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_conn_id: AtomicUsize::new(1),
            started: Mutex::new(false),
            config: Config::default(),
            connection_callback: Mutex::new(default_connection_callback()),
            message_callback: Mutex::new(default_message_callback()),
            write_complete_callback: Mutex::new(Arc::new(|_conn| {})),
        });

        let server_for_cb = server.clone();
        server
            .acceptor
            .set_new_connection_callback(Arc::new(move |socket, peer_addr| {
                server_for_cb.new_connection(socket, peer_addr);
            }));

        Ok(server)
    }

    pub fn set_thread_num(&self, num_threads: usize) {
        self.loop_pool.set_thread_num(num_threads);
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        *self.connection_callback.lock().unwrap() = cb;
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_callback.lock().unwrap() = cb;
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        *self.write_complete_callback.lock().unwrap() = cb;
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// `TcpServer::start`: idempotent, spins up the worker pool once.
    pub fn start(&self, thread_init: Option<ThreadInitCallback>) {
        let mut started = self.started.lock().unwrap();
        if *started {
            return;
        }
        *started = true;
        self.loop_pool.start(thread_init);

        let acceptor = self.acceptor.clone();
        self.base_loop.run_in_loop(move || {
            if let Err(err) = acceptor.listen() {
                log::error!("failed to start listening: {err}");
            }
        });
    }

    fn new_connection(&self, socket: Socket, peer_addr: SocketAddr) {
        let io_loop = self.loop_pool.next_loop();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let local_addr = match socket.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                log::error!("getsockname failed for new connection: {err}");
                return;
            }
        };
        let name = format!("{}-{}#{}", self.name, peer_addr, conn_id);
        log::debug!("new connection [{name}] from {peer_addr}");

        let _ = socket.set_tcp_nodelay(true);
        let connection = Connection::new(
            io_loop.clone(),
            name.clone(),
            socket,
            local_addr,
            peer_addr,
            self.config.default_high_watermark,
        );
        connection.set_connection_callback(self.connection_callback.lock().unwrap().clone());
        connection.set_message_callback(self.message_callback.lock().unwrap().clone());
        connection.set_write_complete_callback(self.write_complete_callback.lock().unwrap().clone());

        {
            let this_name = name.clone();
            let connection_for_close = connection.clone();
            // `close_callback` is how a Connection tells the server to drop
            // its entry in `connections`, mirroring
            // `TcpServer::removeConnection` bound in as `closeCallback_`.
            // Held by a small handle rather than `Arc<Server>` itself, so a
            // live connection never keeps the whole server alive.
            let remover = ConnectionRemover {
                base_loop: self.base_loop.clone(),
                connections: self.connections.clone(),
            };
            connection.set_close_callback(Arc::new(move |_conn| {
                remover.remove_connection(&this_name, connection_for_close.clone());
            }));
        }

        self.connections.lock().unwrap().insert(name, connection.clone());
        io_loop.run_in_loop(move || connection.connect_established());
    }
}

impl Drop for Server {
    /// `TcpServer::~TcpServer`: iterates the connection map, clearing each
    /// entry and scheduling `connect_destroyed` on the connection's own
    /// I/O loop, so a dropped server doesn't leak live `Channel`
    /// registrations in its workers' pollers.
    fn drop(&mut self) {
        let connections: Vec<Connection> = self.connections.lock().unwrap().drain().map(|(_, conn)| conn).collect();
        for connection in connections {
            let io_loop = connection.get_loop();
            io_loop.queue_in_loop(move || connection.connect_destroyed());
        }
    }
}

/// A minimal handle the close callback uses to remove a connection from
/// the server's map without holding a strong `Arc<Server>` (which would
/// keep the server alive through every connection it ever accepted).
struct ConnectionRemover {
    base_loop: LoopHandle,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
}

impl ConnectionRemover {
    /// `TcpServer::removeConnection`: hop to the base loop so the
    /// `connections` map is only ever mutated from one thread, then hop
    /// back onto the connection's own loop to tear it down.
    fn remove_connection(&self, name: &str, connection: Connection) {
        let name = name.to_string();
        let connections = self.connections.clone();
        self.base_loop.queue_in_loop(move || {
            connections.lock().unwrap().remove(&name);
            let io_loop = connection.get_loop();
            io_loop.queue_in_loop(move || connection.connect_destroyed());
        });
    }
}
