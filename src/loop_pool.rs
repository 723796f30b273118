//! Round-robin pool of worker loops, grounded on
//! `EventLoopThreadPool.h`/`EventLoopThreadPool.cc`. With zero worker
//! threads configured, every connection is handed to the base loop
//! instead — the same single-threaded fallback the original uses when
//! `numThreads_ == 0`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::callback::ThreadInitCallback;
use crate::event_loop::LoopHandle;
use crate::loop_thread::LoopThread;

pub struct LoopPool {
    base_loop: LoopHandle,
    name: String,
    num_threads: AtomicUsize,
    next: AtomicUsize,
    started: AtomicBool,
    loops: Mutex<Vec<LoopHandle>>,
}

impl LoopPool {
    pub fn new(base_loop: LoopHandle, name: impl Into<String>) -> LoopPool {
        LoopPool {
            base_loop,
            name: name.into(),
            num_threads: AtomicUsize::new(0),
            next: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn set_thread_num(&self, n: usize) {
        self.num_threads.store(n, Ordering::Relaxed);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn start(&self, thread_init: Option<ThreadInitCallback>) {
        self.started.store(true, Ordering::Release);
        let num_threads = self.num_threads.load(Ordering::Relaxed);
        let mut loops = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let thread_name = format!("{}{}", self.name, i);
            let thread = LoopThread::new();
            let handle = thread.start_loop(thread_init.clone(), Some(thread_name));
            loops.push(handle);
        }
        if num_threads == 0 {
            if let Some(cb) = &thread_init {
                cb(&self.base_loop);
            }
        }
        *self.loops.lock().unwrap() = loops;
    }

    /// `EventLoopThreadPool::getNextLoop`.
    pub fn next_loop(&self) -> LoopHandle {
        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            self.base_loop.clone()
        } else {
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % loops.len();
            loops[idx].clone()
        }
    }

    pub fn all_loops(&self) -> Vec<LoopHandle> {
        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            loops.clone()
        }
    }
}
