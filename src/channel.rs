//! Selectable-event dispatcher bound to one fd, grounded on `Channel.h`/
//! `Channel.cc`. A `Channel` does not own its fd (the `Socket` or raw
//! descriptor it was built from does); it only tracks which events the fd
//! is interested in and what to do when the loop reports one.
//!
//! The C++ original protects against the fd's owner (a `TcpConnection`)
//! being destroyed mid-dispatch with a `weak_ptr<void> tie_`, upgraded
//! once at the top of `handleEvent` and held for the call's duration. This
//! port keeps that shape with `Weak<dyn Any + Send + Sync>`.

use std::any::Any;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use crate::event_loop::LoopHandle;
use crate::poller::{Interest, PollEvent, RegistrationState};
use crate::timestamp::Timestamp;

pub type ReadCallback = Arc<dyn Fn(Timestamp) + Send + Sync>;
pub type WriteCallback = Arc<dyn Fn() + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn() + Send + Sync>;

pub struct Channel {
    fd: RawFd,
    loop_handle: LoopHandle,
    interest: Interest,
    state: RegistrationState,
    tie: Option<Weak<dyn Any + Send + Sync>>,
    read_callback: Option<ReadCallback>,
    write_callback: Option<WriteCallback>,
    close_callback: Option<CloseCallback>,
    error_callback: Option<ErrorCallback>,
}

impl Channel {
    /// Builds the channel and registers it in the owning loop's fd→channel
    /// dispatch table immediately; the poller itself is not touched until
    /// the first `enable_reading`/`enable_writing` call.
    pub fn new(loop_handle: LoopHandle, fd: RawFd) -> Arc<Mutex<Channel>> {
        let channel = Arc::new(Mutex::new(Channel {
            fd,
            loop_handle: loop_handle.clone(),
            interest: Interest::NONE,
            state: RegistrationState::New,
            tie: None,
            read_callback: None,
            write_callback: None,
            close_callback: None,
            error_callback: None,
        }));
        loop_handle.register_channel(fd, channel.clone());
        channel
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn set_read_callback(&mut self, cb: ReadCallback) {
        self.read_callback = Some(cb);
    }

    pub fn set_write_callback(&mut self, cb: WriteCallback) {
        self.write_callback = Some(cb);
    }

    pub fn set_close_callback(&mut self, cb: CloseCallback) {
        self.close_callback = Some(cb);
    }

    pub fn set_error_callback(&mut self, cb: ErrorCallback) {
        self.error_callback = Some(cb);
    }

    /// `Channel::tie`: bind a guard whose liveness gates dispatch. `owner`
    /// is the `ConnectionInner` (or any `Send + Sync` owner) this channel's
    /// fd belongs to.
    pub fn set_tie<T: Any + Send + Sync>(&mut self, owner: &Arc<T>) {
        let any: Arc<dyn Any + Send + Sync> = owner.clone();
        self.tie = Some(Arc::downgrade(&any));
    }

    pub fn is_writing(&self) -> bool {
        self.interest.writable
    }

    pub fn is_reading(&self) -> bool {
        self.interest.readable
    }

    fn update(&mut self) {
        let fd = self.fd;
        let interest = self.interest;
        self.loop_handle.update_channel(fd, interest, &mut self.state);
    }

    pub fn enable_reading(&mut self) {
        self.interest.readable = true;
        self.update();
    }

    pub fn disable_reading(&mut self) {
        self.interest.readable = false;
        self.update();
    }

    pub fn enable_writing(&mut self) {
        self.interest.writable = true;
        self.update();
    }

    pub fn disable_writing(&mut self) {
        self.interest.writable = false;
        self.update();
    }

    pub fn disable_all(&mut self) {
        self.interest = Interest::NONE;
        self.update();
    }

    pub fn remove(&mut self) {
        let fd = self.fd;
        self.loop_handle.remove_channel(fd, &mut self.state);
    }

    /// Dispatch one readiness event. Mirrors `Channel::handleEvent`: the
    /// `tie_` upgrade (if any) is held for the whole call, then
    /// `handleEventWithGuard`'s fixed callback order runs — hup (unless
    /// also readable) before error before read before write.
    pub fn dispatch(this: &Arc<Mutex<Channel>>, event: PollEvent, receive_time: Timestamp) {
        let (tie, read_cb, write_cb, close_cb, error_cb) = {
            let ch = this.lock().unwrap();
            (
                ch.tie.clone(),
                ch.read_callback.clone(),
                ch.write_callback.clone(),
                ch.close_callback.clone(),
                ch.error_callback.clone(),
            )
        };

        let _guard: Option<Arc<dyn Any + Send + Sync>> = match &tie {
            Some(weak) => match weak.upgrade() {
                Some(guard) => Some(guard),
                None => return,
            },
            None => None,
        };

        if event.hup && !event.readable {
            if let Some(cb) = &close_cb {
                cb();
            }
            return;
        }
        if event.error {
            if let Some(cb) = &error_cb {
                cb();
            }
        }
        if event.readable {
            if let Some(cb) = &read_cb {
                cb(receive_time);
            }
        }
        if event.writable {
            if let Some(cb) = &write_cb {
                cb();
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug_assert!(
            self.state != RegistrationState::Added,
            "channel for fd {} dropped while still registered with the poller",
            self.fd
        );
    }
}
