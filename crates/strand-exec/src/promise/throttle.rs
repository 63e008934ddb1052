//! Bounded-concurrency gating of promise activations.

use crate::exec::Execution;
use crate::promise::{Downstream, Promise};
use crate::result::failure;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Activation = Box<dyn FnOnce() + Send>;

struct ThrottleState {
    // None means unlimited: every activation proceeds immediately.
    size: Option<usize>,
    active: AtomicUsize,
    waiting: SegQueue<Activation>,
}

/// Limits how many throttled promises may be active at once.
///
/// Activations beyond the ceiling queue FIFO and are released as earlier
/// throttled promises deliver their terminal signal. Release order is
/// best-effort FIFO, not a hard real-time guarantee; the invariant is the
/// concurrency bound itself.
#[derive(Clone)]
pub struct Throttle {
    state: Arc<ThrottleState>,
}

impl Throttle {
    /// A throttle admitting at most `size` concurrently active promises.
    pub fn of_size(size: usize) -> Throttle {
        Throttle {
            state: Arc::new(ThrottleState {
                size: Some(size),
                active: AtomicUsize::new(0),
                waiting: SegQueue::new(),
            }),
        }
    }

    /// A throttle that admits everything immediately.
    pub fn unlimited() -> Throttle {
        Throttle {
            state: Arc::new(ThrottleState {
                size: None,
                active: AtomicUsize::new(0),
                waiting: SegQueue::new(),
            }),
        }
    }

    /// The configured ceiling, or `None` for unlimited.
    pub fn size(&self) -> Option<usize> {
        self.state.size
    }

    /// Point-in-time count of active permits. Observability only.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Point-in-time count of queued activations. Observability only.
    pub fn waiting(&self) -> usize {
        self.state.waiting.len()
    }

    /// Gate `promise` through this throttle.
    ///
    /// The returned promise, when activated, proceeds immediately if a
    /// permit is available and otherwise queues; its terminal signal (any
    /// of the three) releases the permit and activates the oldest waiter.
    pub fn throttle<T: Send + 'static>(&self, promise: Promise<T>) -> Promise<T> {
        if self.state.size.is_none() {
            return promise;
        }
        let throttle = self.clone();
        let upstream = promise.into_upstream();
        Promise::of(move |down: Downstream<T>| {
            let execution = match Execution::try_current() {
                Ok(execution) => execution,
                Err(err) => return down.error(failure(err)),
            };
            let releaser = throttle.clone();
            let down = Downstream::new(move |result| {
                releaser.release_one();
                down.accept(result);
            });
            let activation: Activation = Box::new(move || {
                // The permit is held; connect on the subscribing execution.
                execution.schedule(move |_exec| {
                    upstream.connect(down);
                    Ok(())
                });
            });
            throttle.state.waiting.push(activation);
            throttle.drain_permits();
        })
    }

    fn release_one(&self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.drain_permits();
    }

    fn drain_permits(&self) {
        loop {
            if !self.try_acquire() {
                return;
            }
            match self.state.waiting.pop() {
                Some(activation) => activation(),
                None => {
                    // Raced with another releaser; hand the permit back and
                    // re-check so a concurrent submit is not stranded.
                    self.state.active.fetch_sub(1, Ordering::SeqCst);
                    if self.state.waiting.is_empty() {
                        return;
                    }
                }
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let size = match self.state.size {
            Some(size) => size,
            None => return true,
        };
        let mut current = self.state.active.load(Ordering::SeqCst);
        loop {
            if current >= size {
                return false;
            }
            match self.state.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let throttle = Throttle::of_size(3);
        assert_eq!(throttle.size(), Some(3));
        assert_eq!(throttle.active(), 0);
        assert_eq!(throttle.waiting(), 0);

        let unlimited = Throttle::unlimited();
        assert_eq!(unlimited.size(), None);
    }

    #[test]
    fn test_permits_bound_acquisition() {
        let throttle = Throttle::of_size(2);
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
        assert_eq!(throttle.active(), 2);

        throttle.state.active.fetch_sub(1, Ordering::SeqCst);
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[test]
    fn test_drain_runs_waiters_up_to_ceiling() {
        use std::sync::atomic::AtomicUsize;

        let throttle = Throttle::of_size(2);
        let started = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let started = started.clone();
            throttle.state.waiting.push(Box::new(move || {
                started.fetch_add(1, Ordering::SeqCst);
            }));
        }
        throttle.drain_permits();
        // Two activations consumed permits; the rest remain queued.
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.active(), 2);
        assert_eq!(throttle.waiting(), 3);

        // Releasing a permit admits the next waiter, FIFO.
        throttle.release_one();
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.waiting(), 2);
    }
}
