//! General-purpose worker pool
//!
//! Fans out independent I/O work (artifact copies during an insert) across a
//! fixed set of threads. Tasks return `Result`; the most recent failure is
//! kept and surfaced at the next [`ThreadPool::wait`]. Earlier failures are
//! deliberately discarded: task failures here are symptoms of I/O trouble,
//! and one representative is enough for diagnosis.

use crate::{Error, Result};
use crossbeam_channel::{Sender, unbounded};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Threading mode of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// A single worker thread. Used by tests that need deterministic ordering.
    SingleThreaded,
    /// One worker per hardware thread, with a floor of four.
    AllCores,
}

struct PoolShared {
    pending: Mutex<usize>,
    idle: Condvar,
    last_error: Mutex<Option<Error>>,
}

/// A FIFO worker pool with a blocking `wait` barrier.
pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Spawn a pool in the given mode.
    #[must_use]
    pub fn new(mode: PoolMode) -> Self {
        let num_threads = match mode {
            PoolMode::SingleThreaded => 1,
            PoolMode::AllCores => num_cpus::get().max(4),
        };
        let (sender, receiver) = unbounded::<Task>();
        let shared = Arc::new(PoolShared {
            pending: Mutex::new(0),
            idle: Condvar::new(),
            last_error: Mutex::new(None),
        });

        let workers = (0..num_threads)
            .map(|_| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if let Err(e) = task() {
                            tracing::debug!(error = %e, "Pool task failed");
                            *lock_ignoring_poison(&shared.last_error) = Some(e);
                        }
                        let mut pending = lock_ignoring_poison(&shared.pending);
                        *pending -= 1;
                        shared.idle.notify_all();
                    }
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            shared,
        }
    }

    /// Enqueue a task. Never blocks.
    pub fn enqueue(&self, task: impl FnOnce() -> Result<()> + Send + 'static) {
        {
            let mut pending = lock_ignoring_poison(&self.shared.pending);
            *pending += 1;
        }
        if let Some(sender) = &self.sender {
            // The receiver outlives the sender; send cannot fail while
            // workers are attached.
            let _ = sender.send(Box::new(task));
        }
    }

    /// Block until every enqueued task has finished.
    ///
    /// # Errors
    ///
    /// Returns the most recent task failure, if any task failed since the
    /// last call.
    pub fn wait(&self) -> Result<()> {
        let mut pending = lock_ignoring_poison(&self.shared.pending);
        while *pending > 0 {
            pending = self
                .shared
                .idle
                .wait(pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        drop(pending);

        match lock_ignoring_poison(&self.shared.last_error).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(e) = lock_ignoring_poison(&self.shared.last_error).take() {
            tracing::warn!(error = %e, "Pool task failed and was never observed");
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
