//! Buffering that switches itself off once flow control opens.

use crate::api::{add_demand, InvalidDemandError, Publisher, Subscriber, Subscription, UNBOUNDED};
use crate::buffering::{Disposer, Signal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::drain::{DrainQueue, Step};
use strand_exec::{failure, Failure};

type ConnectFn<T> = Arc<dyn Fn(PartialWriteStream<T>) -> Arc<dyn Subscription> + Send + Sync>;

/// A buffering publisher for producers that start eagerly.
///
/// The producer is connected at subscribe time, before any demand exists;
/// items buffer until the subscriber requests. Once the subscriber requests
/// [`UNBOUNDED`], internal demand tracking switches from the bounded
/// counter to an "open" flag: no counter is decremented per item and the
/// upstream runs without flow control for the remainder of the stream.
pub struct PartialBufferingPublisher<T: Send + 'static> {
    connect: ConnectFn<T>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> PartialBufferingPublisher<T> {
    /// Create a publisher whose producer is connected at subscribe time.
    pub fn new(
        disposer: Option<Disposer<T>>,
        connect: impl Fn(PartialWriteStream<T>) -> Arc<dyn Subscription> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connect: Arc::new(connect),
            disposer,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for PartialBufferingPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = Arc::new(PartialState {
            queue: DrainQueue::new(),
            wanted: AtomicU64::new(0),
            open: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            upstream: Mutex::new(None),
            disposer: self.disposer.clone(),
        });
        // Eager connection: the producer starts before any demand exists.
        let upstream = (self.connect)(PartialWriteStream {
            state: state.clone(),
        });
        *state.upstream.lock() = Some(upstream);

        subscriber.on_subscribe(Arc::new(PartialSubscription {
            state: state.clone(),
        }));
        *state.subscriber.lock() = Some(subscriber);
        PartialState::drain(&state);
    }
}

struct PartialState<T: Send + 'static> {
    queue: DrainQueue<Signal<T>>,
    wanted: AtomicU64,
    open: AtomicBool,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> PartialState<T> {
    fn stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.terminated.load(Ordering::Acquire)
    }

    fn dispose(&self, item: T) {
        if let Some(disposer) = &self.disposer {
            disposer(item);
        }
    }

    fn drain(this: &Arc<Self>) {
        let state = this.clone();
        this.queue.drain_with(move |signal| {
            if state.stopped() {
                if let Signal::Item(item) = signal {
                    state.dispose(item);
                }
                return Step::Consumed;
            }
            match signal {
                Signal::Complete => match state.subscriber.lock().take() {
                    Some(mut subscriber) => {
                        state.terminated.store(true, Ordering::Release);
                        subscriber.on_complete();
                        Step::Consumed
                    }
                    None => Step::Yield(Signal::Complete),
                },
                Signal::Error(fail) => match state.subscriber.lock().take() {
                    Some(mut subscriber) => {
                        state.terminated.store(true, Ordering::Release);
                        subscriber.on_error(fail);
                        Step::Consumed
                    }
                    None => Step::Yield(Signal::Error(fail)),
                },
                Signal::Item(item) => {
                    let mut guard = state.subscriber.lock();
                    let Some(subscriber) = guard.as_mut() else {
                        drop(guard);
                        return Step::Yield(Signal::Item(item));
                    };
                    if state.open.load(Ordering::Acquire) {
                        // Open mode: no per-item counter maintenance.
                        subscriber.on_next(item);
                        Step::Consumed
                    } else if state.take_one_wanted() {
                        subscriber.on_next(item);
                        Step::Consumed
                    } else {
                        drop(guard);
                        Step::Yield(Signal::Item(item))
                    }
                }
            }
        });
    }

    fn take_one_wanted(&self) -> bool {
        self.wanted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |wanted| {
                if wanted == 0 {
                    None
                } else {
                    Some(wanted - 1)
                }
            })
            .is_ok()
    }

    fn cancel_upstream(&self) {
        let upstream = { self.upstream.lock().clone() };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

struct PartialSubscription<T: Send + 'static> {
    state: Arc<PartialState<T>>,
}

impl<T: Send + 'static> Subscription for PartialSubscription<T> {
    fn request(&self, n: u64) {
        let state = &self.state;
        if state.stopped() {
            return;
        }
        if n == 0 {
            state.queue.push(Signal::Error(failure(InvalidDemandError)));
            PartialState::drain(&state);
            state.cancel_upstream();
            return;
        }
        if !state.open.load(Ordering::Acquire) {
            let mut observed = state.wanted.load(Ordering::SeqCst);
            let new_wanted = loop {
                let target = add_demand(observed, n);
                match state.wanted.compare_exchange(
                    observed,
                    target,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break target,
                    Err(seen) => observed = seen,
                }
            };
            let upstream = { state.upstream.lock().clone() };
            if let Some(upstream) = upstream {
                if new_wanted == UNBOUNDED {
                    state.open.store(true, Ordering::Release);
                    upstream.request(UNBOUNDED);
                } else {
                    upstream.request(n);
                }
            }
        }
        PartialState::drain(&state);
    }

    fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.cancel_upstream();
        PartialState::drain(&self.state);
    }
}

/// The producer's write side of a [`PartialBufferingPublisher`].
pub struct PartialWriteStream<T: Send + 'static> {
    state: Arc<PartialState<T>>,
}

impl<T: Send + 'static> Clone for PartialWriteStream<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> PartialWriteStream<T> {
    /// Buffer one item for delivery under downstream demand.
    pub fn item(&self, item: T) {
        self.state.queue.push(Signal::Item(item));
        PartialState::drain(&self.state);
    }

    /// Terminate the stream with a failure, after any buffered items.
    pub fn error(&self, fail: Failure) {
        self.state.queue.push(Signal::Error(fail));
        PartialState::drain(&self.state);
    }

    /// Terminate the stream normally, after any buffered items.
    pub fn complete(&self) {
        self.state.queue.push(Signal::Complete);
        PartialState::drain(&self.state);
    }

    /// Outstanding downstream demand ([`UNBOUNDED`] once open).
    pub fn requested(&self) -> u64 {
        if self.state.open.load(Ordering::Acquire) {
            UNBOUNDED
        } else {
            self.state.wanted.load(Ordering::SeqCst)
        }
    }

    /// Number of buffered items.
    pub fn buffered(&self) -> usize {
        self.state.queue.len()
    }
}
