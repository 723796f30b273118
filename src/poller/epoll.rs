//! Level-triggered `epoll(7)` backend, grounded line-for-line on
//! `EPollPoller.h`/`EPollPoller.cc`. Registration is level-triggered (no
//! `EPOLLET`): a readable fd keeps firing until its readable bytes are
//! fully drained, which is what lets `connection.rs` do a single
//! `read_from_fd` per wake-up and rely on being woken again if more
//! arrived mid-read.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::config::{warn_if_poll_backend_requested, Config};
use crate::error::interrupted;
use crate::poller::{Interest, PollEvent, Poller, RegistrationState};

pub struct EpollPoller {
    epoll_fd: RawFd,
    events: Vec<libc::epoll_event>,
    /// Mirrors `EPollPoller::channels_`, fd-keyed rather than pointer-keyed
    /// (see the crate-level REDESIGN FLAGS note) so nothing here needs an
    /// unsafe raw `Channel*`.
    channels: HashMap<RawFd, Interest>,
}

impl EpollPoller {
    /// Builds a poller from `Config::default()`'s initial events capacity.
    pub fn new() -> io::Result<EpollPoller> {
        Self::with_capacity(Config::default().initial_events_capacity)
    }

    /// `Poller` construction time, per spec.md §6: this is where
    /// `SZMUDUO_USE_POLL` is read and logged (it never changes the
    /// backend — epoll is the only implementation this core ships).
    pub fn with_capacity(initial_events_capacity: usize) -> io::Result<EpollPoller> {
        warn_if_poll_backend_requested();
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollPoller {
            epoll_fd,
            events: vec![unsafe { std::mem::zeroed() }; initial_events_capacity],
            channels: HashMap::new(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
        ev.events = interest_to_bits(interest);
        ev.u64 = fd as u64;
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Poller for EpollPoller {
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<PollEvent>> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    self.events.as_mut_ptr(),
                    self.events.len() as i32,
                    timeout_ms,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if interrupted(&err) {
                    continue;
                }
                return Err(err);
            }
            let n = n as usize;

            let mut out = Vec::with_capacity(n);
            for ev in &self.events[..n] {
                let bits = ev.events;
                out.push(PollEvent {
                    fd: ev.u64 as RawFd,
                    readable: bits & (libc::EPOLLIN as u32 | libc::EPOLLPRI as u32) != 0,
                    writable: bits & libc::EPOLLOUT as u32 != 0,
                    hup: bits & libc::EPOLLHUP as u32 != 0,
                    error: bits & libc::EPOLLERR as u32 != 0,
                });
            }

            // `kInitEventListSize` doubling: the buffer was entirely full,
            // there may be more ready fds than we could report this round.
            if n == self.events.len() {
                self.events.resize(self.events.len() * 2, unsafe { std::mem::zeroed() });
            }
            return Ok(out);
        }
    }

    fn update(
        &mut self,
        fd: RawFd,
        interest: Interest,
        state: &mut RegistrationState,
    ) -> io::Result<()> {
        match *state {
            RegistrationState::New | RegistrationState::Deleted => {
                self.channels.insert(fd, interest);
                self.ctl(libc::EPOLL_CTL_ADD, fd, interest)?;
                *state = RegistrationState::Added;
            }
            RegistrationState::Added => {
                if interest.is_none() {
                    self.ctl(libc::EPOLL_CTL_DEL, fd, interest)?;
                    *state = RegistrationState::Deleted;
                } else {
                    self.channels.insert(fd, interest);
                    self.ctl(libc::EPOLL_CTL_MOD, fd, interest)?;
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd, state: &mut RegistrationState) -> io::Result<()> {
        self.channels.remove(&fd);
        if *state == RegistrationState::Added {
            self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::NONE)?;
        }
        *state = RegistrationState::New;
        Ok(())
    }

    fn has(&self, fd: RawFd) -> bool {
        self.channels.contains_key(&fd)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

fn interest_to_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.readable {
        bits |= libc::EPOLLIN as u32 | libc::EPOLLPRI as u32;
    }
    if interest.writable {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn register_then_poll_sees_readable_eventfd() {
        let mut poller = EpollPoller::new().unwrap();
        let waker = crate::waker::Waker::new().unwrap();
        let fd = waker.as_raw_fd();
        let mut state = RegistrationState::New;

        poller.update(fd, Interest::READABLE, &mut state).unwrap();
        assert_eq!(state, RegistrationState::Added);
        assert!(poller.has(fd));

        waker.wake().unwrap();
        let events = poller.poll(Duration::from_secs(1)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, fd);
        assert!(events[0].readable);

        poller.remove(fd, &mut state).unwrap();
        assert_eq!(state, RegistrationState::New);
        assert!(!poller.has(fd));
    }

    #[test]
    fn poll_times_out_with_no_events() {
        let mut poller = EpollPoller::new().unwrap();
        let events = poller.poll(Duration::from_millis(20)).unwrap();
        assert!(events.is_empty());
    }
}
