/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Schedulers run tasks after a delay.
//!
//! The plant uses its scheduler for delayed work (see `Delay`) and as the
//! "post a task" hook of hosts that own the main loop. `ThreadScheduler`
//! keeps a single timer thread; `ManualScheduler` only queues and lets the
//! host run due tasks itself.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed. Tasks scheduled after `close`
    /// are dropped without running.
    fn schedule(&self, delay: Duration, task: Task);

    /// Stop running tasks. Pending tasks are dropped.
    fn close(&self) {}
}

/// Entry in the deadline heap
struct Entry {
    at: Instant,
    seq: u64,
    task: Task,
}

// Reverse ordering for min-heap (earliest deadline first, then FIFO)
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    notify: Condvar,
}

/// Scheduler backed by one lazily started timer thread.
///
/// # Example
/// ```
/// use reactors::{Scheduler, ThreadScheduler};
/// use std::sync::mpsc::channel;
/// use std::time::Duration;
///
/// let scheduler = ThreadScheduler::new();
/// let (tx, rx) = channel();
/// scheduler.schedule(Duration::from_millis(5), Box::new(move || tx.send(42).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 42);
/// scheduler.close();
/// ```
pub struct ThreadScheduler {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        ThreadScheduler {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    shutdown: false,
                }),
                notify: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Number of tasks waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    fn ensure_started(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("reactor-timer".to_string())
            .spawn(move || run_loop(shared))
        {
            Ok(h) => *handle = Some(h),
            Err(e) => tracing::error!(error = %e, "failed to spawn scheduler thread"),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                tracing::debug!("scheduler closed, dropping task");
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry {
                at: Instant::now() + delay,
                seq,
                task,
            });
        }
        self.ensure_started();
        self.shared.notify.notify_one();
    }

    fn close(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.heap)
        };
        // Drop pending tasks outside the lock.
        drop(dropped);
        self.shared.notify.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_loop(shared: Arc<TimerShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        match state.heap.peek().map(|e| e.at) {
            None => shared.notify.wait(&mut state),
            Some(at) if at <= now => {
                if let Some(entry) = state.heap.pop() {
                    drop(state);
                    if catch_unwind(AssertUnwindSafe(entry.task)).is_err() {
                        tracing::error!("scheduled task panicked");
                    }
                    state = shared.state.lock();
                }
            }
            Some(at) => {
                shared.notify.wait_until(&mut state, at);
            }
        }
    }
}

/// Scheduler that never runs anything on its own.
///
/// The host calls `run_pending` from its main loop (or a test calls it to
/// step time deterministically).
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, Task)>>,
    closed: Mutex<bool>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// True once `close` has run; later tasks are dropped.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Run every queued task, shortest delay first, ignoring wall time.
    /// Tasks queued while running are left for the next call.
    pub fn run_pending(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.queue.lock());
        tasks.sort_by_key(|(delay, _)| *delay);
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        if *self.closed.lock() {
            return;
        }
        self.queue.lock().push((delay, task));
    }

    fn close(&self) {
        *self.closed.lock() = true;
        let dropped = std::mem::take(&mut *self.queue.lock());
        drop(dropped);
    }
}
