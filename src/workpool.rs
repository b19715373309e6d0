//! Work-dispatch pool (C6): N fixed worker threads, each with its own
//! queue; posts go to the shortest queue at the instant of inspection.
//!
//! Grounded on `examples/original_source/include/parallel/worker.h`
//! (`WorkGroup<N>` and its `WorkGroup<0>` specialization, which runs posted
//! work synchronously on the caller).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work posted to the pool. Must be self-contained — it should
/// capture any connection handle it needs by value (an `Arc` clone).
pub type Affair = Box<dyn FnOnce() + Send>;

struct WorkerQueue {
    items: Mutex<VecDeque<Affair>>,
    cv: Condvar,
}

impl WorkerQueue {
    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

fn worker_loop(queue: Arc<WorkerQueue>, stop: Arc<AtomicBool>) {
    loop {
        let mut guard = queue.items.lock().unwrap();
        loop {
            if let Some(affair) = guard.pop_front() {
                drop(guard);
                affair();
                break;
            }
            if stop.load(Ordering::Acquire) {
                return;
            }
            guard = queue.cv.wait(guard).unwrap();
        }
    }
}

/// Fixed-size pool of workers executing posted [`Affair`]s.
///
/// `N == 0` runs every posted affair synchronously on the caller's thread
/// and makes `cleanup` a no-op, matching `WorkGroup<0>`.
pub struct WorkPool {
    queues: Vec<Arc<WorkerQueue>>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    cleaned_up: bool,
}

impl WorkPool {
    /// Spawns `n` worker threads, each with its own queue.
    pub fn new(n: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);

        for _ in 0..n {
            let queue = Arc::new(WorkerQueue {
                items: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
            });
            let thread_queue = queue.clone();
            let thread_stop = stop.clone();
            handles.push(thread::spawn(move || worker_loop(thread_queue, thread_stop)));
            queues.push(queue);
        }

        Self {
            queues,
            handles,
            stop,
            cleaned_up: false,
        }
    }

    /// Posts `work` to the currently shortest queue (ties broken by lowest
    /// index). With zero workers, runs `work` synchronously.
    pub fn post(&self, work: Affair) {
        if self.queues.is_empty() {
            work();
            return;
        }

        let mut best = 0;
        let mut best_len = usize::MAX;
        for (i, queue) in self.queues.iter().enumerate() {
            let len = queue.len();
            if len < best_len {
                best_len = len;
                best = i;
            }
        }

        let queue = &self.queues[best];
        queue.items.lock().unwrap().push_back(work);
        queue.cv.notify_one();
    }

    /// Number of worker threads (0 for the synchronous fallback).
    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Signals every worker to stop after its current item, wakes them, and
    /// joins all threads. Idempotent; a no-op for `N == 0`.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        self.stop.store(true, Ordering::Release);
        for queue in &self.queues {
            queue.cv.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.cleanup();
    }
}
