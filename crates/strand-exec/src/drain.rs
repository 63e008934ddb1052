//! Single-flight drain queue.
//!
//! The one concurrency idiom this crate relies on pervasively: producers
//! push from any thread; a consumer claims the sole-drainer role with a
//! compare-and-set flag and pops items until the queue is empty, while
//! contending consumers enqueue and return immediately. After releasing the
//! role the drainer re-checks the queue, so items pushed during release are
//! never stranded. Both the execution segment scheduler and the stream
//! buffer operators are built on this queue.

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Instruction returned by a [`DrainQueue::drain_with`] callback.
pub enum Step<T> {
    /// The item was consumed; keep draining.
    Consumed,
    /// The item could not be consumed; park it at the head of the queue and
    /// stop draining. The caller is expected to drain again once the
    /// blocking condition (such as exhausted demand) clears.
    Yield(T),
}

/// A lock-free queue drained by at most one thread at a time.
pub struct DrainQueue<T> {
    items: SegQueue<T>,
    // An item handed back by a drainer via Step::Yield. Consumed before the
    // queue proper; only ever touched while holding the drain role.
    parked: Mutex<Option<T>>,
    draining: AtomicBool,
}

impl<T> DrainQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            parked: Mutex::new(None),
            draining: AtomicBool::new(false),
        }
    }

    /// Push an item. Never blocks; callable from any thread.
    pub fn push(&self, item: T) {
        self.items.push(item);
    }

    /// Whether there is nothing to drain right now.
    pub fn is_empty(&self) -> bool {
        self.parked.lock().is_none() && self.items.is_empty()
    }

    /// Number of queued items, excluding any parked item.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether some thread currently holds the drain role.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drain queued items through `each`, claiming the sole-drainer role.
    ///
    /// Returns `true` if this call performed the drain, `false` if another
    /// thread already held the drain role (in which case that thread will
    /// observe any items pushed before this call).
    pub fn drain(&self, mut each: impl FnMut(T)) -> bool {
        self.drain_with(|item| {
            each(item);
            Step::Consumed
        })
    }

    /// Drain with the option to park an item and stop.
    ///
    /// See [`Step`]. Returns `true` if this call held the drain role.
    pub fn drain_with(&self, mut each: impl FnMut(T) -> Step<T>) -> bool {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        loop {
            loop {
                let next = { self.parked.lock().take() }.or_else(|| self.items.pop());
                let Some(item) = next else { break };
                match each(item) {
                    Step::Consumed => {}
                    Step::Yield(item) => {
                        *self.parked.lock() = Some(item);
                        self.draining.store(false, Ordering::Release);
                        return true;
                    }
                }
            }
            self.draining.store(false, Ordering::Release);
            // Re-check: a producer may have pushed between the last pop and
            // the release, and then failed to claim the drain role.
            if self.is_empty()
                || self
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                return true;
            }
        }
    }
}

impl<T> Default for DrainQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_consumes_in_fifo_order() {
        let queue = DrainQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        let mut seen = Vec::new();
        assert!(queue.drain(|item| seen.push(item)));
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_yield_parks_item_at_head() {
        let queue = DrainQueue::new();
        queue.push(1);
        queue.push(2);

        // Refuse everything: the first item parks, the second stays queued.
        assert!(queue.drain_with(Step::Yield));
        assert!(!queue.is_empty());

        let mut seen = Vec::new();
        assert!(queue.drain(|item| seen.push(item)));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_single_drainer_under_contention() {
        let queue = Arc::new(DrainQueue::new());
        let in_drain = Arc::new(AtomicUsize::new(0));
        let max_in_drain = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let in_drain = in_drain.clone();
            let max_in_drain = max_in_drain.clone();
            let drained = drained.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    queue.push(i);
                    queue.drain(|_| {
                        let now = in_drain.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_drain.fetch_max(now, Ordering::SeqCst);
                        drained.fetch_add(1, Ordering::SeqCst);
                        in_drain.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // All items observed, never more than one thread inside the drain.
        assert_eq!(drained.load(Ordering::SeqCst), 8 * 1000);
        assert_eq!(max_in_drain.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_losing_pusher_items_are_drained() {
        // A push that loses the drain race must still be processed by the
        // winning drainer (possibly via the re-check after release).
        let queue = Arc::new(DrainQueue::new());
        let drained = Arc::new(AtomicUsize::new(0));

        let pusher = {
            let queue = queue.clone();
            let drained = drained.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    queue.push(i);
                    queue.drain(|_| {
                        drained.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };
        let contender = {
            let queue = queue.clone();
            let drained = drained.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    queue.drain(|_| {
                        drained.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };
        pusher.join().unwrap();
        contender.join().unwrap();

        // Sweep anything left from the last race window.
        queue.drain(|_| {
            drained.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(drained.load(Ordering::SeqCst), 10_000);
    }
}
