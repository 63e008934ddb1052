//! Sequential combination of several streams.

use crate::api::{add_demand, DynPublisher, Publisher, Subscriber, Subscription, UNBOUNDED};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::Failure;

/// Concatenates publishers: each upstream is subscribed only after the
/// previous one completes, and unmet downstream demand carries over to the
/// next upstream.
pub struct ConcatPublisher<T: Send + 'static> {
    upstreams: Vec<DynPublisher<T>>,
}

impl<T: Send + 'static> ConcatPublisher<T> {
    /// Concatenate `upstreams` in order.
    pub fn new(upstreams: Vec<DynPublisher<T>>) -> Self {
        Self { upstreams }
    }
}

impl<T: Send + 'static> Publisher<T> for ConcatPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = Arc::new(ConcatState {
            queued: Mutex::new(self.upstreams.iter().cloned().collect()),
            demand: AtomicU64::new(0),
            current: Mutex::new(None),
            subscriber: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        subscriber.on_subscribe(Arc::new(ConcatSubscription {
            state: state.clone(),
        }));
        *state.subscriber.lock() = Some(subscriber);
        ConcatState::next_upstream(&state);
    }
}

struct ConcatState<T: Send + 'static> {
    queued: Mutex<VecDeque<DynPublisher<T>>>,
    // Remaining downstream demand; carries over between upstreams.
    demand: AtomicU64,
    current: Mutex<Option<Arc<dyn Subscription>>>,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    done: AtomicBool,
}

impl<T: Send + 'static> ConcatState<T> {
    fn next_upstream(this: &Arc<Self>) {
        let next = { this.queued.lock().pop_front() };
        match next {
            Some(upstream) => upstream.subscribe(Box::new(ConcatLegSubscriber {
                state: this.clone(),
            })),
            None => {
                if !this.done.swap(true, Ordering::AcqRel) {
                    let taken = this.subscriber.lock().take();
                    if let Some(mut subscriber) = taken {
                        subscriber.on_complete();
                    }
                }
            }
        }
    }

    fn take_one_demand(&self) -> bool {
        self.demand
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |demand| {
                if demand == 0 {
                    None
                } else if demand == UNBOUNDED {
                    Some(UNBOUNDED)
                } else {
                    Some(demand - 1)
                }
            })
            .is_ok()
    }
}

struct ConcatLegSubscriber<T: Send + 'static> {
    state: Arc<ConcatState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ConcatLegSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.state.done.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *self.state.current.lock() = Some(subscription.clone());
        // Carry unmet demand into the new upstream.
        let demand = self.state.demand.load(Ordering::SeqCst);
        if demand > 0 {
            subscription.request(demand);
        }
    }

    fn on_next(&mut self, item: T) {
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        self.state.take_one_demand();
        let mut taken = self.state.subscriber.lock().take();
        if let Some(subscriber) = taken.as_mut() {
            subscriber.on_next(item);
        }
        if !self.state.done.load(Ordering::Acquire) {
            *self.state.subscriber.lock() = taken;
        }
    }

    fn on_error(&mut self, failure: Failure) {
        if self.state.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let taken = self.state.subscriber.lock().take();
        if let Some(mut subscriber) = taken {
            subscriber.on_error(failure);
        }
    }

    fn on_complete(&mut self) {
        *self.state.current.lock() = None;
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        ConcatState::next_upstream(&self.state);
    }
}

struct ConcatSubscription<T: Send + 'static> {
    state: Arc<ConcatState<T>>,
}

impl<T: Send + 'static> Subscription for ConcatSubscription<T> {
    fn request(&self, n: u64) {
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        if n == 0 {
            if !self.state.done.swap(true, Ordering::AcqRel) {
                let current = { self.state.current.lock().clone() };
                if let Some(current) = current {
                    current.cancel();
                }
                let taken = self.state.subscriber.lock().take();
                if let Some(mut subscriber) = taken {
                    subscriber.on_error(strand_exec::failure(crate::api::InvalidDemandError));
                }
            }
            return;
        }
        let mut observed = self.state.demand.load(Ordering::SeqCst);
        loop {
            let target = add_demand(observed, n);
            match self.state.demand.compare_exchange(
                observed,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(seen) => observed = seen,
            }
        }
        let current = { self.state.current.lock().clone() };
        if let Some(current) = current {
            current.request(n);
        }
    }

    fn cancel(&self) {
        if self.state.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let current = { self.state.current.lock().clone() };
        if let Some(current) = current {
            current.cancel();
        }
        *self.state.subscriber.lock() = None;
    }
}
