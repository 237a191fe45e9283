//! Deferred file closing
//!
//! Flushing and closing a freshly written cache artifact can stall for
//! milliseconds on some filesystems. The [`DeferredCloser`] moves that cost
//! off the insert path: producers hand over the open handle and return
//! immediately; a background thread syncs and drops it.
//!
//! The closer is an explicit handle created at process start and passed to
//! the stores, not a process-global. Tests instantiate private ones.

use crossbeam_channel::{Sender, unbounded};
use std::fs::File;
use std::thread::JoinHandle;

/// Background pool that syncs and closes file handles.
pub struct DeferredCloser {
    sender: Option<Sender<File>>,
    workers: Vec<JoinHandle<()>>,
}

impl DeferredCloser {
    /// Start a closer with the given number of worker threads.
    ///
    /// Zero threads yields a disabled closer that closes synchronously.
    #[must_use]
    pub fn start(num_threads: usize) -> Self {
        if num_threads == 0 {
            return Self::disabled();
        }
        let (sender, receiver) = unbounded::<File>();
        let workers = (0..num_threads)
            .map(|_| {
                let receiver = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(file) = receiver.recv() {
                        sync_and_drop(file);
                    }
                })
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// A closer with no background threads; every close is synchronous.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sender: None,
            workers: Vec::new(),
        }
    }

    /// Hand a written file over for closing.
    ///
    /// Returns immediately when workers are running; otherwise the sync and
    /// close happen on the calling thread.
    pub fn enqueue(&self, file: File) {
        match &self.sender {
            Some(sender) => {
                if let Err(returned) = sender.send(file) {
                    sync_and_drop(returned.0);
                }
            }
            None => sync_and_drop(file),
        }
    }

    /// Drain the queue and join all workers.
    pub fn shutdown(&mut self) {
        // Dropping the sender closes the channel; workers finish the
        // remaining queue before exiting.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for DeferredCloser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sync_and_drop(file: File) {
    if let Err(e) = file.sync_all() {
        tracing::debug!(error = %e, "fsync failed on deferred close");
    }
}
