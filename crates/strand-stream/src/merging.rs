//! Interleaved combination of several streams.

use crate::api::{add_demand, DynPublisher, Publisher, Subscriber, Subscription};
use crate::buffering::{BufferedWriteStream, BufferingPublisher, Disposer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use strand_exec::Failure;

/// Merges several publishers into one interleaved stream.
///
/// All upstreams are subscribed concurrently; items interleave in arrival
/// order. Completion is signalled only once every upstream completes; the
/// first error cancels the remaining upstreams and propagates immediately.
/// Downstream demand is forwarded to every upstream and over-production is
/// re-buffered, so the subscriber never sees more than it asked for.
pub struct MergingPublisher<T: Send + 'static> {
    upstreams: Vec<DynPublisher<T>>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> MergingPublisher<T> {
    /// Merge `upstreams`. At least two publishers must be supplied.
    pub fn new(upstreams: Vec<DynPublisher<T>>, disposer: Option<Disposer<T>>) -> Self {
        assert!(
            upstreams.len() >= 2,
            "at least 2 publishers must be supplied to merge"
        );
        Self {
            upstreams,
            disposer,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for MergingPublisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let upstreams = self.upstreams.clone();
        let buffering = BufferingPublisher::new(self.disposer.clone(), move |write| {
            let merge = Arc::new(MergeState {
                remaining: AtomicUsize::new(upstreams.len()),
                failed: AtomicBool::new(false),
                legs: Mutex::new(Vec::new()),
                write,
            });
            let mut legs = Vec::with_capacity(upstreams.len());
            for _ in &upstreams {
                let leg = Arc::new(LegState {
                    pending: AtomicU64::new(0),
                    subscription: Mutex::new(None),
                    finished: AtomicBool::new(false),
                });
                merge.legs.lock().push(leg.clone());
                legs.push(leg);
            }
            for (upstream, leg) in upstreams.iter().zip(legs) {
                upstream.subscribe(Box::new(MergeSubscriber {
                    merge: merge.clone(),
                    leg,
                }));
            }
            Arc::new(MergeSubscription { merge }) as Arc<dyn Subscription>
        });
        buffering.subscribe(subscriber);
    }
}

struct MergeState<T: Send + 'static> {
    remaining: AtomicUsize,
    failed: AtomicBool,
    legs: Mutex<Vec<Arc<LegState>>>,
    write: BufferedWriteStream<T>,
}

impl<T: Send + 'static> MergeState<T> {
    fn cancel_all_except(&self, keep: &Arc<LegState>) {
        let legs = { self.legs.lock().clone() };
        for leg in legs {
            if !Arc::ptr_eq(&leg, keep) {
                leg.cancel();
            }
        }
    }

    fn cancel_all(&self) {
        let legs = { self.legs.lock().clone() };
        for leg in legs {
            leg.cancel();
        }
    }
}

struct LegState {
    pending: AtomicU64,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    finished: AtomicBool,
}

impl LegState {
    fn add_demand(&self, n: u64) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let mut observed = self.pending.load(Ordering::SeqCst);
        loop {
            let target = add_demand(observed, n);
            match self
                .pending
                .compare_exchange(observed, target, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(seen) => observed = seen,
            }
        }
        self.flush();
    }

    fn flush(&self) {
        let subscription = { self.subscription.lock().clone() };
        if let Some(subscription) = subscription {
            let demand = self.pending.swap(0, Ordering::SeqCst);
            if demand > 0 {
                subscription.request(demand);
            }
        }
    }

    fn cancel(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = { self.subscription.lock().clone() };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

struct MergeSubscriber<T: Send + 'static> {
    merge: Arc<MergeState<T>>,
    leg: Arc<LegState>,
}

impl<T: Send + 'static> Subscriber<T> for MergeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.leg.subscription.lock() = Some(subscription);
        // Demand requested before this upstream attached.
        self.leg.flush();
    }

    fn on_next(&mut self, item: T) {
        self.merge.write.item(item);
    }

    fn on_error(&mut self, failure: Failure) {
        self.leg.finished.store(true, Ordering::Release);
        if self.merge.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.merge.cancel_all_except(&self.leg);
        self.merge.write.error(failure);
    }

    fn on_complete(&mut self) {
        if self.leg.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.merge.remaining.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.merge.failed.load(Ordering::Acquire)
        {
            self.merge.write.complete();
        }
    }
}

struct MergeSubscription<T: Send + 'static> {
    merge: Arc<MergeState<T>>,
}

impl<T: Send + 'static> Subscription for MergeSubscription<T> {
    fn request(&self, n: u64) {
        let legs = { self.merge.legs.lock().clone() };
        for leg in legs {
            leg.add_demand(n);
        }
    }

    fn cancel(&self) {
        self.merge.cancel_all();
    }
}
