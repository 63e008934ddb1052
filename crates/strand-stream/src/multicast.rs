//! Sharing one upstream subscription between many subscribers.

use crate::api::{
    add_demand, DynPublisher, NoopSubscription, Publisher, StreamTerminatedError, Subscriber,
    Subscription, UNBOUNDED,
};
use crate::buffering::Signal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::drain::{DrainQueue, Step};
use strand_exec::{failure, Failure};

/// Fans one upstream out to any number of independent subscribers.
///
/// The upstream is subscribed exactly once, lazily, when the first
/// subscriber expresses demand; from then on it runs at unbounded demand
/// and every item is fanned out to the subscribers present at that moment
/// (each with its own buffer and demand accounting). There is no replay:
/// once the upstream terminates, current subscribers receive the terminal
/// signal and every later subscription attempt receives an immediate
/// [`StreamTerminatedError`].
pub struct MulticastPublisher<T: Clone + Send + 'static> {
    upstream: DynPublisher<T>,
    state: Arc<MulticastState<T>>,
}

impl<T: Clone + Send + 'static> MulticastPublisher<T> {
    /// Share `upstream` between future subscribers.
    pub fn new(upstream: DynPublisher<T>) -> Self {
        Self {
            upstream,
            state: Arc::new(MulticastState {
                started: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for MulticastPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        if self.state.terminated.load(Ordering::Acquire) {
            tracing::debug!("rejecting subscription to terminated multicast stream");
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(failure(StreamTerminatedError));
            return;
        }
        let slot = Arc::new(SlotState {
            queue: DrainQueue::new(),
            wanted: AtomicU64::new(0),
            open: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            subscriber: Mutex::new(None),
        });
        self.state.slots.lock().push(slot.clone());
        subscriber.on_subscribe(Arc::new(SlotSubscription {
            slot: slot.clone(),
            shared: self.state.clone(),
            upstream: self.upstream.clone(),
        }));
        *slot.subscriber.lock() = Some(subscriber);
        SlotState::drain(&slot);
    }
}

struct MulticastState<T: Clone + Send + 'static> {
    started: AtomicBool,
    terminated: AtomicBool,
    slots: Mutex<Vec<Arc<SlotState<T>>>>,
}

impl<T: Clone + Send + 'static> MulticastState<T> {
    fn fan_out(&self, signal: &Signal<T>) {
        let slots = { self.slots.lock().clone() };
        for slot in slots {
            match signal {
                Signal::Item(item) => slot.queue.push(Signal::Item(item.clone())),
                Signal::Error(fail) => slot.queue.push(Signal::Error(fail.clone())),
                Signal::Complete => slot.queue.push(Signal::Complete),
            }
            SlotState::drain(&slot);
        }
    }
}

struct SlotState<T: Send + 'static> {
    queue: DrainQueue<Signal<T>>,
    wanted: AtomicU64,
    open: AtomicBool,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send + 'static> SlotState<T> {
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

    fn drain(this: &Arc<Self>) {
        let slot = this.clone();
        this.queue.drain_with(move |signal| {
            if slot.cancelled.load(Ordering::Acquire) || slot.terminated.load(Ordering::Acquire) {
                return Step::Consumed;
            }
            match signal {
                Signal::Complete => match slot.subscriber.lock().take() {
                    Some(mut subscriber) => {
                        slot.terminated.store(true, Ordering::Release);
                        subscriber.on_complete();
                        Step::Consumed
                    }
                    None => Step::Yield(Signal::Complete),
                },
                Signal::Error(fail) => match slot.subscriber.lock().take() {
                    Some(mut subscriber) => {
                        slot.terminated.store(true, Ordering::Release);
                        subscriber.on_error(fail);
                        Step::Consumed
                    }
                    None => Step::Yield(Signal::Error(fail)),
                },
                Signal::Item(item) => {
                    let mut guard = slot.subscriber.lock();
                    let Some(subscriber) = guard.as_mut() else {
                        drop(guard);
                        return Step::Yield(Signal::Item(item));
                    };
                    if slot.open.load(Ordering::Acquire) || slot.take_one_wanted() {
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
}

struct SlotSubscription<T: Clone + Send + 'static> {
    slot: Arc<SlotState<T>>,
    shared: Arc<MulticastState<T>>,
    upstream: DynPublisher<T>,
}

impl<T: Clone + Send + 'static> Subscription for SlotSubscription<T> {
    fn request(&self, n: u64) {
        let slot = &self.slot;
        if slot.cancelled.load(Ordering::Acquire) || slot.terminated.load(Ordering::Acquire) {
            return;
        }
        if n == 0 {
            slot.queue
                .push(Signal::Error(failure(crate::api::InvalidDemandError)));
            SlotState::drain(slot);
            return;
        }
        if n == UNBOUNDED {
            slot.open.store(true, Ordering::Release);
        } else {
            let mut observed = slot.wanted.load(Ordering::SeqCst);
            loop {
                let target = add_demand(observed, n);
                match slot.wanted.compare_exchange(
                    observed,
                    target,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(seen) => observed = seen,
                }
            }
        }
        // First demand anywhere triggers the single upstream subscription.
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.upstream.subscribe(Box::new(FanInSubscriber {
                shared: self.shared.clone(),
            }));
        }
        SlotState::drain(slot);
    }

    fn cancel(&self) {
        self.slot.cancelled.store(true, Ordering::Release);
        let this = &self.slot;
        self.shared
            .slots
            .lock()
            .retain(|slot| !Arc::ptr_eq(slot, this));
    }
}

struct FanInSubscriber<T: Clone + Send + 'static> {
    shared: Arc<MulticastState<T>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> for FanInSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, item: T) {
        self.shared.fan_out(&Signal::Item(item));
    }

    fn on_error(&mut self, failure: Failure) {
        self.shared.terminated.store(true, Ordering::Release);
        self.shared.fan_out(&Signal::Error(failure));
    }

    fn on_complete(&mut self) {
        self.shared.terminated.store(true, Ordering::Release);
        self.shared.fan_out(&Signal::Complete);
    }
}
