//! Worker threads.
//!
//! A worker loops popping ready tasks from the policy and executing them.
//! When the policy runs dry it backs off in three stages — spin, yield,
//! park — and is woken through a core-owned signal when the dispatcher
//! pushes new work. The policy itself never wakes anybody: waking is the
//! core's job, which keeps the policy boundary free of callbacks.
//!
//! Shutdown is graceful: the pool sets the flag, wakes everyone, and each
//! worker drains the policy before exiting.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::dispatch::Dispatcher;
use crate::policy::SchedPolicy;
use crate::types::WorkerId;

const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 16;

/// Wakes parked workers when a task becomes ready.
pub(crate) struct ReadySignal {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl ReadySignal {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Records one wake token and unparks one worker.
    pub(crate) fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending += 1;
        self.cv.notify_one();
    }

    /// Unparks every worker (shutdown).
    pub(crate) fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Parks until a wake token arrives or `timeout` elapses. Consumes a
    /// token when one is available so wakes are not lost between the
    /// emptiness check and the park.
    pub(crate) fn park(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if *pending == 0 {
            self.cv.wait_for(&mut pending, timeout);
        }
        if *pending > 0 {
            *pending -= 1;
        }
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("pending", &*self.pending.lock())
            .finish()
    }
}

/// A pool of worker threads executing ready tasks.
pub struct WorkerPool {
    threads: Vec<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
}

impl WorkerPool {
    /// Spawns `workers` threads over the dispatcher's policy.
    pub(crate) fn spawn(
        workers: usize,
        park_timeout: Duration,
        dispatcher: Arc<Dispatcher>,
        policy: Arc<dyn SchedPolicy>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let threads = (0..workers)
            .map(|id| {
                let dispatcher = Arc::clone(&dispatcher);
                let policy = Arc::clone(&policy);
                let shutdown = Arc::clone(&shutdown);
                std::thread::Builder::new()
                    .name(format!("stardep-worker-{id}"))
                    .spawn(move || run_loop(id, park_timeout, &dispatcher, &*policy, &shutdown))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        debug!(workers, "worker pool started");
        Self {
            threads,
            shutdown,
            dispatcher,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// True for a pool with no threads (manual execution mode).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Signals shutdown, lets workers drain the policy, and joins them.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        self.dispatcher.ready_signal().notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.threads.len())
            .finish_non_exhaustive()
    }
}

/// The worker scheduling loop: pop, execute, back off when idle.
fn run_loop(
    id: WorkerId,
    park_timeout: Duration,
    dispatcher: &Dispatcher,
    policy: &dyn SchedPolicy,
    shutdown: &AtomicBool,
) {
    let signal = Arc::clone(dispatcher.ready_signal());
    let mut idle_rounds = 0u32;
    loop {
        if let Some(task) = policy.pop_for_worker(id) {
            idle_rounds = 0;
            trace!(worker = id, task = %task.id(), "worker picked task");
            dispatcher.execute(task);
            continue;
        }

        // Drain before exiting so queued work is not stranded.
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        idle_rounds += 1;
        if idle_rounds < SPIN_LIMIT {
            std::hint::spin_loop();
        } else if idle_rounds < SPIN_LIMIT + YIELD_LIMIT {
            std::thread::yield_now();
        } else {
            signal.park(park_timeout);
            idle_rounds = SPIN_LIMIT;
        }
    }
    trace!(worker = id, "worker exited");
}
