//! Compute event-loop threads.
//!
//! Each event loop is a named thread with its own unbounded mailbox.
//! Executions are assigned an event loop round-robin at fork time; drains
//! requested from unmanaged threads are handed off to it.

use super::binding;
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

/// A unit of work for a pool thread.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum PoolMessage {
    Run(Job),
    Terminate,
}

/// Handle to one event loop's mailbox.
#[derive(Clone)]
pub(crate) struct EventLoopHandle {
    tx: Sender<PoolMessage>,
}

impl EventLoopHandle {
    /// Submit a job. Returns `false` if the loop has shut down.
    pub(crate) fn execute(&self, job: Job) -> bool {
        self.tx.send(PoolMessage::Run(job)).is_ok()
    }
}

pub(crate) struct EventLoopPool {
    handles: Vec<EventLoopHandle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl EventLoopPool {
    pub(crate) fn new(count: usize) -> Self {
        let mut handles = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = unbounded::<PoolMessage>();
            let handle = thread::Builder::new()
                .name(format!("strand-compute-{index}"))
                .spawn(move || {
                    binding::mark_managed();
                    while let Ok(message) = rx.recv() {
                        match message {
                            PoolMessage::Run(job) => job(),
                            PoolMessage::Terminate => break,
                        }
                    }
                })
                .expect("failed to spawn compute thread");
            handles.push(EventLoopHandle { tx });
            threads.push(handle);
        }
        Self {
            handles,
            threads: Mutex::new(threads),
        }
    }

    pub(crate) fn handle(&self, index: usize) -> EventLoopHandle {
        self.handles[index % self.handles.len()].clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Signal all loops to exit after their queued work, then join them.
    ///
    /// Joining is skipped when called from a pool thread (a pool thread
    /// cannot join itself); the loops still exit.
    pub(crate) fn shutdown(&self) {
        for handle in &self.handles {
            let _ = handle.tx.send(PoolMessage::Terminate);
        }
        if !binding::is_managed() {
            for thread in self.threads.lock().drain(..) {
                let _ = thread.join();
            }
        }
    }
}
