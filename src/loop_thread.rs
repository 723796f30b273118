//! One dedicated OS thread running exactly one `EventLoop`, grounded on
//! `EventLoopThread.cc`. `start_loop` blocks the caller until the spawned
//! thread has constructed its loop and published the handle, using the
//! same condvar handshake as the original's `mutex_`/`cond_` pair.

use std::sync::{Arc, Condvar, Mutex};

use crate::callback::ThreadInitCallback;
use crate::event_loop::{EventLoop, LoopHandle};
use crate::named_thread;

pub struct LoopThread {
    handle: Mutex<Option<LoopHandle>>,
    cond: Condvar,
}

impl LoopThread {
    pub fn new() -> Arc<LoopThread> {
        Arc::new(LoopThread {
            handle: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Spawns the loop thread and waits for it to publish its `LoopHandle`.
    pub fn start_loop(self: &Arc<Self>, thread_init: Option<ThreadInitCallback>, name: Option<String>) -> LoopHandle {
        let this = self.clone();
        named_thread::spawn(name, move || {
            let event_loop = EventLoop::new().expect("failed to construct event loop");
            let handle = event_loop.handle();
            if let Some(cb) = &thread_init {
                cb(&handle);
            }
            {
                let mut guard = this.handle.lock().unwrap();
                *guard = Some(handle);
                this.cond.notify_one();
            }
            event_loop.run();
        })
        .expect("failed to spawn event loop thread");

        let mut guard = self.handle.lock().unwrap();
        while guard.is_none() {
            guard = self.cond.wait(guard).unwrap();
        }
        guard.clone().unwrap()
    }
}
