//! Listening-socket acceptor, grounded on `Acceptor.h`/`Acceptor.cc`.
//! Accepts one connection per readable event; level-triggered readiness
//! means a second pending connection simply fires another read event
//! rather than needing an accept loop here.

use std::ffi::CString;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::event_loop::LoopHandle;
use crate::socket::Socket;

pub type NewConnectionCallback = Arc<dyn Fn(Socket, SocketAddr) + Send + Sync>;

pub struct Acceptor {
    socket: Socket,
    channel: Arc<Mutex<Channel>>,
    /// `Acceptor::idleFd_`: a spare fd held in reserve so an `EMFILE` from
    /// `accept4` can be recovered from by closing it, accepting (and
    /// immediately dropping) the pending connection to free a descriptor
    /// slot, then reopening it.
    idle_fd: AtomicI32,
    new_connection_callback: Mutex<Option<NewConnectionCallback>>,
}

impl Acceptor {
    pub fn new(loop_handle: LoopHandle, addr: SocketAddr, reuse_port: bool) -> std::io::Result<Arc<Acceptor>> {
        let socket = Socket::new_tcp_nonblocking()?;
        socket.set_reuse_addr(true)?;
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.bind(addr)?;
        let fd = socket.as_raw_fd();
        let channel = Channel::new(loop_handle, fd);
        let idle_fd = open_dev_null()?;

        let acceptor = Arc::new(Acceptor {
            socket,
            channel,
            idle_fd: AtomicI32::new(idle_fd),
            new_connection_callback: Mutex::new(None),
        });

        let acceptor_for_cb = acceptor.clone();
        acceptor
            .channel
            .lock()
            .unwrap()
            .set_read_callback(Arc::new(move |_ts| acceptor_for_cb.handle_read()));

        Ok(acceptor)
    }

    pub fn set_new_connection_callback(&self, cb: NewConnectionCallback) {
        *self.new_connection_callback.lock().unwrap() = Some(cb);
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// `Acceptor::listen`.
    pub fn listen(&self) -> std::io::Result<()> {
        self.socket.listen()?;
        self.channel.lock().unwrap().enable_reading();
        Ok(())
    }

    fn handle_read(&self) {
        match self.socket.accept() {
            Ok(Some((conn_socket, peer_addr))) => {
                let cb = self.new_connection_callback.lock().unwrap().clone();
                match cb {
                    Some(cb) => cb(conn_socket, peer_addr),
                    None => log::warn!("no new-connection callback installed, dropping connection"),
                }
            }
            Ok(None) => {}
            Err(err) if err.raw_os_error() == Some(libc::EMFILE) => {
                log::warn!("accept failed with EMFILE, reclaiming a descriptor");
                let idle = self.idle_fd.load(Ordering::Relaxed);
                unsafe {
                    libc::close(idle);
                }
                // This accept (and immediate drop) just frees the
                // connection that triggered EMFILE; the peer sees a reset.
                let _ = self.socket.accept();
                match open_dev_null() {
                    Ok(fd) => self.idle_fd.store(fd, Ordering::Relaxed),
                    Err(err) => log::error!("failed to reopen idle fd: {err}"),
                }
            }
            Err(err) => {
                log::error!("accept failed: {err}");
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        let idle = self.idle_fd.load(Ordering::Relaxed);
        if idle >= 0 {
            unsafe {
                libc::close(idle);
            }
        }
    }
}

fn open_dev_null() -> std::io::Result<i32> {
    let path = CString::new("/dev/null").unwrap();
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}
