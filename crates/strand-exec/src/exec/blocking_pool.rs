//! Blocking-operation thread pool.
//!
//! A flat pool of named threads consuming one shared unbounded queue.
//! Blocking work never runs on compute threads; blocking an event-loop
//! thread would stall every execution currently drained by it.

use super::binding;
use super::event_loop::{Job, PoolMessage};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

pub(crate) struct BlockingPool {
    tx: Sender<PoolMessage>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl BlockingPool {
    pub(crate) fn new(size: usize) -> Self {
        let (tx, rx) = unbounded::<PoolMessage>();
        let mut threads = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("strand-blocking-{index}"))
                .spawn(move || {
                    binding::mark_managed();
                    while let Ok(message) = rx.recv() {
                        match message {
                            PoolMessage::Run(job) => job(),
                            PoolMessage::Terminate => break,
                        }
                    }
                })
                .expect("failed to spawn blocking thread");
            threads.push(handle);
        }
        Self {
            tx,
            threads: Mutex::new(threads),
            size,
        }
    }

    /// Submit a blocking job. Returns `false` if the pool has shut down.
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.tx.send(PoolMessage::Run(job)).is_ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.size
    }

    pub(crate) fn shutdown(&self) {
        for _ in 0..self.size {
            let _ = self.tx.send(PoolMessage::Terminate);
        }
        if !binding::is_managed() {
            for thread in self.threads.lock().drain(..) {
                let _ = thread.join();
            }
        }
    }
}
