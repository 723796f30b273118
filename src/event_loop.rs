//! One loop per thread, grounded on `EventLoop.h`/`EventLoop.cc`. The
//! original enforces "one loop per thread" with a thread-local `EventLoop*`
//! set in the constructor and cleared in the destructor, aborting if a
//! second loop is built on a thread that already has one; this port keeps
//! the same assertion but expresses ownership as `Arc<LoopShared>` so a
//! `Connection` handle created on the loop thread can still be handed to
//! and called from any other thread (spec.md §6/§7).

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::channel::Channel;
use crate::config::Config;
use crate::poller::epoll::EpollPoller;
use crate::poller::{Interest, Poller, RegistrationState};
use crate::timestamp::Timestamp;
use crate::waker::Waker;

pub type Task = Box<dyn FnOnce() + Send + 'static>;
pub type LoopHandle = Arc<LoopShared>;

/// Shared, thread-safe handle to a running loop's state: the fd-keyed
/// channel dispatch table, the poller, the deferred-task queue and the
/// cross-thread wake descriptor. `EventLoop` owns the loop thread's run
/// method; `LoopShared` is what gets cloned into `Channel`s and
/// `Connection`s so they can ask the loop to do something regardless of
/// which thread is asking.
pub struct LoopShared {
    thread_id: ThreadId,
    waker: Waker,
    poller: Mutex<Box<dyn Poller + Send>>,
    channels: Mutex<HashMap<RawFd, Arc<Mutex<Channel>>>>,
    pending: Mutex<VecDeque<Task>>,
    calling_pending: AtomicBool,
    quitting: AtomicBool,
    poll_timeout: Duration,
}

impl LoopShared {
    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "operation invoked from a thread other than this loop's own"
        );
    }

    /// `EventLoop::runInLoop`: execute now if already on the loop thread,
    /// otherwise hand off to `queue_in_loop`.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    /// `EventLoop::queueInLoop`: push behind the pending-functors mutex and
    /// wake the loop unless it is already guaranteed to drain this queue
    /// before its next blocking wait (i.e. we're on the loop thread and
    /// the call came from inside `run_pending_functors` itself).
    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let should_wake = {
            let mut pending = self.pending.lock().unwrap();
            pending.push_back(Box::new(f));
            !self.is_in_loop_thread() || self.calling_pending.load(Ordering::Acquire)
        };
        if should_wake {
            self.wake_up();
        }
    }

    pub fn wake_up(&self) {
        if let Err(err) = self.waker.wake() {
            log::warn!("failed to wake event loop: {err}");
        }
    }

    /// `EventLoop::quit`: idempotent, safe to call from any thread.
    pub fn quit(&self) {
        self.quitting.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.wake_up();
        }
    }

    pub(crate) fn drain_waker(&self) {
        if let Err(err) = self.waker.drain() {
            log::warn!("failed to drain wake descriptor: {err}");
        }
    }

    pub(crate) fn register_channel(&self, fd: RawFd, channel: Arc<Mutex<Channel>>) {
        self.channels.lock().unwrap().insert(fd, channel);
    }

    pub(crate) fn update_channel(&self, fd: RawFd, interest: Interest, state: &mut RegistrationState) {
        self.assert_in_loop_thread();
        self.poller
            .lock()
            .unwrap()
            .update(fd, interest, state)
            .unwrap_or_else(|err| panic!("epoll_ctl failed for fd {fd}: {err}"));
    }

    pub(crate) fn remove_channel(&self, fd: RawFd, state: &mut RegistrationState) {
        self.assert_in_loop_thread();
        self.channels.lock().unwrap().remove(&fd);
        self.poller
            .lock()
            .unwrap()
            .remove(fd, state)
            .unwrap_or_else(|err| panic!("epoll_ctl(DEL) failed for fd {fd}: {err}"));
    }
}

pub struct EventLoop {
    shared: LoopHandle,
    // Keeps the waker's channel registered for the loop's lifetime.
    _waker_channel: Arc<Mutex<Channel>>,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        Self::with_config(Config::default())
    }

    /// Builds a loop from an explicit `Config` rather than the defaults
    /// `EPollPoller::kInitEventListSize`/`kPollTimeMs` hardcode in the
    /// original — lets callers shrink the poll timeout or initial events
    /// capacity (tests do this for the reduced-watermark scenario).
    pub fn with_config(config: Config) -> io::Result<EventLoop> {
        let poller = EpollPoller::with_capacity(config.initial_events_capacity)?;
        let waker = Waker::new()?;
        let waker_fd = waker.as_raw_fd();

        let shared: LoopHandle = Arc::new(LoopShared {
            thread_id: thread::current().id(),
            waker,
            poller: Mutex::new(Box::new(poller)),
            channels: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            calling_pending: AtomicBool::new(false),
            quitting: AtomicBool::new(false),
            poll_timeout: config.poll_timeout,
        });

        let waker_channel = Channel::new(shared.clone(), waker_fd);
        {
            let mut ch = waker_channel.lock().unwrap();
            let shared_for_drain = shared.clone();
            ch.set_read_callback(Arc::new(move |_ts| {
                shared_for_drain.drain_waker();
            }));
            ch.enable_reading();
        }

        Ok(EventLoop {
            shared,
            _waker_channel: waker_channel,
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.shared.clone()
    }

    pub fn quit(&self) {
        self.shared.quit();
    }

    /// `EventLoop::loop()`: poll, dispatch, then drain deferred tasks, until
    /// `quit()` is observed.
    pub fn run(&self) {
        log::trace!("event loop starting");
        while !self.shared.quitting.load(Ordering::Acquire) {
            let events = {
                let mut poller = self.shared.poller.lock().unwrap();
                match poller.poll(self.shared.poll_timeout) {
                    Ok(events) => events,
                    Err(err) => {
                        log::error!("poll failed: {err}");
                        continue;
                    }
                }
            };
            let receive_time = Timestamp::now();

            for event in events {
                let channel = self.shared.channels.lock().unwrap().get(&event.fd).cloned();
                if let Some(channel) = channel {
                    Channel::dispatch(&channel, event, receive_time);
                } else {
                    log::debug!("event for unregistered fd {}, dropping", event.fd);
                }
            }

            self.run_pending_functors();
        }
        log::trace!("event loop stopping");
    }

    fn run_pending_functors(&self) {
        self.shared.calling_pending.store(true, Ordering::Release);
        let functors: Vec<Task> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        for f in functors {
            f();
        }
        self.shared.calling_pending.store(false, Ordering::Release);
    }
}
