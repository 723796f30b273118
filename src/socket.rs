//! Raw non-blocking socket primitives, grounded on `Acceptor.cc`'s
//! `createNonblocking` and the `set*` helpers that originally lived on
//! muduo's `sockets::` free-function namespace. Everything here is a thin,
//! `io::Result`-returning wrapper around a libc syscall; no ownership logic
//! lives in this module (see `acceptor.rs` and `connection.rs` for that).

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// An owned, non-blocking, close-on-exec socket file descriptor.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

impl Socket {
    /// `sockets::createNonblockingOrDie`: `AF_INET, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC`.
    pub fn new_tcp_nonblocking() -> io::Result<Socket> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Socket { fd })
    }

    /// Wrap an fd already known to be a non-blocking socket (e.g. one
    /// returned by `accept4`).
    ///
    /// # Safety
    /// `fd` must be a valid, open socket descriptor not owned elsewhere.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }

    pub fn set_reuse_addr(&self, on: bool) -> io::Result<()> {
        setsockopt_bool(self.fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on)
    }

    pub fn set_reuse_port(&self, on: bool) -> io::Result<()> {
        setsockopt_bool(self.fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on)
    }

    pub fn set_keep_alive(&self, on: bool) -> io::Result<()> {
        setsockopt_bool(self.fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on)
    }

    pub fn set_tcp_nodelay(&self, on: bool) -> io::Result<()> {
        setsockopt_bool(self.fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on)
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let (raw, len) = sockaddr_from(addr);
        let rc = unsafe { libc::bind(self.fd, &raw as *const _ as *const libc::sockaddr, len) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// `listen()` backlog, `SOMAXCONN` in the original (`Acceptor::listen`).
    pub fn listen(&self) -> io::Result<()> {
        let rc = unsafe { libc::listen(self.fd, libc::SOMAXCONN) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// `::accept4(sockfd, ..., SOCK_NONBLOCK | SOCK_CLOEXEC)`. Returns `None`
    /// on `EAGAIN`/`EWOULDBLOCK` (no connection pending right now).
    pub fn accept(&self) -> io::Result<Option<(Socket, SocketAddr)>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept4(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            };
        }
        let peer = sockaddr_to_std(&storage)?;
        Ok(Some((Socket { fd }, peer)))
    }

    /// `sockets::getLocalAddr`, used by `TcpServer::newConnection` to build
    /// the accepted connection's local endpoint.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_std(&storage)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getpeername(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_std(&storage)
    }

    /// `sockets::shutdownWrite`: half-close, used by `TcpConnection::shutdown`
    /// once the output buffer has fully drained.
    pub fn shutdown_write(&self) -> io::Result<()> {
        let rc = unsafe { libc::shutdown(self.fd, libc::SHUT_WR) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn setsockopt_bool(fd: RawFd, level: libc::c_int, name: libc::c_int, on: bool) -> io::Result<()> {
    let val: libc::c_int = if on { 1 } else { 0 };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &val as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_in, libc::socklen_t) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
            raw.sin_family = libc::AF_INET as libc::sa_family_t;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (raw, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(_) => panic!("ipv6 is not supported by this reactor core"),
    }
}

fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    if storage.ss_family as libc::c_int != libc::AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "only ipv4 sockets are supported",
        ));
    }
    let addr_in: libc::sockaddr_in = unsafe { mem::transmute_copy(storage) };
    let ip = std::net::Ipv4Addr::from(u32::from_ne_bytes(addr_in.sin_addr.s_addr.to_ne_bytes()));
    let port = u16::from_be(addr_in.sin_port);
    Ok(SocketAddr::from((ip, port)))
}
