//! Demand-decoupling buffer between a producer and a subscriber.

use crate::api::{add_demand, InvalidDemandError, Publisher, Subscriber, Subscription, UNBOUNDED};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::drain::{DrainQueue, Step};
use strand_exec::{failure, Failure};

/// A buffered signal. Terminal markers travel through the same queue as
/// items so their ordering relative to data is preserved.
pub(crate) enum Signal<T> {
    Item(T),
    Error(Failure),
    Complete,
}

/// Releases items that were buffered but never delivered (consumed by a
/// cancellation instead), for resources that must not be silently dropped.
pub type Disposer<T> = Arc<dyn Fn(T) + Send + Sync>;

type ConnectFn<T> = Arc<dyn Fn(BufferedWriteStream<T>) -> Arc<dyn Subscription> + Send + Sync>;

/// Buffers items produced ahead of downstream demand.
///
/// The producer side is connected lazily, on the subscriber's first
/// `request`: the connect function receives a [`BufferedWriteStream`] to
/// write into and returns the upstream subscription for demand and
/// cancellation propagation. Items buffered when the subscriber cancels are
/// handed to the disposer (for resources that must be released rather than
/// dropped).
pub struct BufferingPublisher<T: Send + 'static> {
    connect: ConnectFn<T>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> BufferingPublisher<T> {
    /// Create a publisher whose producer is connected on first demand.
    pub fn new(
        disposer: Option<Disposer<T>>,
        connect: impl Fn(BufferedWriteStream<T>) -> Arc<dyn Subscription> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connect: Arc::new(connect),
            disposer,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for BufferingPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = Arc::new(BufferState {
            queue: DrainQueue::new(),
            wanted: AtomicU64::new(0),
            open: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            upstream: Mutex::new(None),
            connect: self.connect.clone(),
            disposer: self.disposer.clone(),
        });
        let subscription = Arc::new(BufferSubscription {
            state: state.clone(),
        });
        // Attach the subscriber only after on_subscribe returns; signals
        // produced by requests made during on_subscribe park in the queue
        // and are delivered by the drain below.
        subscriber.on_subscribe(subscription);
        *state.subscriber.lock() = Some(subscriber);
        BufferState::drain(&state);
    }
}

pub(crate) struct BufferState<T: Send + 'static> {
    queue: DrainQueue<Signal<T>>,
    wanted: AtomicU64,
    open: AtomicBool,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    connected: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    connect: ConnectFn<T>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> BufferState<T> {
    fn stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.terminated.load(Ordering::Acquire)
    }

    fn dispose(&self, item: T) {
        if let Some(disposer) = &self.disposer {
            disposer(item);
        }
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

    pub(crate) fn drain(this: &Arc<Self>) {
        let state = this.clone();
        this.queue.drain_with(move |signal| {
            if state.stopped() {
                if let Signal::Item(item) = signal {
                    state.dispose(item);
                }
                return Step::Consumed;
            }
            match signal {
                Signal::Complete => {
                    let taken = state.subscriber.lock().take();
                    match taken {
                        Some(mut subscriber) => {
                            state.terminated.store(true, Ordering::Release);
                            subscriber.on_complete();
                            Step::Consumed
                        }
                        // Subscriber not attached yet; park until it is.
                        None => Step::Yield(Signal::Complete),
                    }
                }
                Signal::Error(fail) => {
                    let taken = state.subscriber.lock().take();
                    match taken {
                        Some(mut subscriber) => {
                            state.terminated.store(true, Ordering::Release);
                            subscriber.on_error(fail);
                            Step::Consumed
                        }
                        None => Step::Yield(Signal::Error(fail)),
                    }
                }
                Signal::Item(item) => {
                    let mut guard = state.subscriber.lock();
                    let Some(subscriber) = guard.as_mut() else {
                        drop(guard);
                        return Step::Yield(Signal::Item(item));
                    };
                    if state.open.load(Ordering::Acquire) || state.take_one_wanted() {
                        subscriber.on_next(item);
                        Step::Consumed
                    } else {
                        drop(guard);
                        // Demand exhausted; the next request drains again.
                        Step::Yield(Signal::Item(item))
                    }
                }
            }
        });
    }

    fn cancel_upstream(&self) {
        let upstream = { self.upstream.lock().clone() };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

struct BufferSubscription<T: Send + 'static> {
    state: Arc<BufferState<T>>,
}

impl<T: Send + 'static> Subscription for BufferSubscription<T> {
    fn request(&self, n: u64) {
        let state = &self.state;
        if state.stopped() {
            return;
        }
        if n == 0 {
            tracing::warn!("stream subscriber requested zero items; failing the subscription");
            state.queue.push(Signal::Error(failure(InvalidDemandError)));
            BufferState::drain(&state);
            state.cancel_upstream();
            return;
        }
        if state
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let write = BufferedWriteStream {
                state: state.clone(),
            };
            let upstream = (state.connect)(write);
            *state.upstream.lock() = Some(upstream);
        }
        if !state.open.load(Ordering::Acquire) {
            let new_wanted = {
                let mut observed = state.wanted.load(Ordering::SeqCst);
                loop {
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
                }
            };
            let upstream = { state.upstream.lock().clone() };
            if let Some(upstream) = upstream {
                if new_wanted == UNBOUNDED {
                    state.open.store(true, Ordering::Release);
                    upstream.request(UNBOUNDED);
                } else {
                    // Only ask upstream for what the buffer cannot cover.
                    let buffered = state.queue.len() as u64;
                    if n > buffered {
                        upstream.request(n - buffered);
                    }
                }
            }
        }
        BufferState::drain(&state);
    }

    fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.cancel_upstream();
        // Sweep the buffer through the disposer. The subscriber box itself
        // is released with the subscription state; it is never signalled
        // again once `cancelled` is set.
        BufferState::drain(&self.state);
    }
}

/// The producer's write side of a [`BufferingPublisher`].
///
/// Cloneable and usable from any thread; writes after cancellation are
/// routed to the disposer by the drain.
pub struct BufferedWriteStream<T: Send + 'static> {
    state: Arc<BufferState<T>>,
}

impl<T: Send + 'static> Clone for BufferedWriteStream<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> BufferedWriteStream<T> {
    /// Buffer one item for delivery under downstream demand.
    pub fn item(&self, item: T) {
        self.state.queue.push(Signal::Item(item));
        BufferState::drain(&self.state);
    }

    /// Terminate the stream with a failure, after any buffered items.
    pub fn error(&self, fail: Failure) {
        self.state.queue.push(Signal::Error(fail));
        BufferState::drain(&self.state);
    }

    /// Terminate the stream normally, after any buffered items.
    pub fn complete(&self) {
        self.state.queue.push(Signal::Complete);
        BufferState::drain(&self.state);
    }

    /// Outstanding downstream demand ([`UNBOUNDED`] once flow control is
    /// open).
    pub fn requested(&self) -> u64 {
        if self.state.open.load(Ordering::Acquire) {
            UNBOUNDED
        } else {
            self.state.wanted.load(Ordering::SeqCst)
        }
    }

    /// Number of items currently buffered.
    pub fn buffered(&self) -> usize {
        self.state.queue.len()
    }

    /// Whether the subscriber has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}
