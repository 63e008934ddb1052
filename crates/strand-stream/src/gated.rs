//! Withholding upstream demand until an external precondition is met.

use crate::api::{add_demand, DynPublisher, Publisher, Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::Failure;

type ValveReceiver = Arc<dyn Fn(GateRelease) + Send + Sync>;

/// Holds back all demand until released.
///
/// Each subscription hands a [`GateRelease`] to the valve receiver; demand
/// requested before the release accumulates and is forwarded upstream the
/// moment the release fires. Used to delay stream start until a
/// precondition (such as response headers being committed) is satisfied.
/// Items are never buffered here; withholding demand keeps the producer
/// idle.
pub struct GatedPublisher<T: Send + 'static> {
    upstream: DynPublisher<T>,
    valve_receiver: ValveReceiver,
}

impl<T: Send + 'static> GatedPublisher<T> {
    /// Gate `upstream`, announcing each subscription's release handle
    /// through `valve_receiver`.
    pub fn new(
        upstream: DynPublisher<T>,
        valve_receiver: impl Fn(GateRelease) + Send + Sync + 'static,
    ) -> Self {
        Self {
            upstream,
            valve_receiver: Arc::new(valve_receiver),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for GatedPublisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let gate = Arc::new(GateState {
            released: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            upstream: Mutex::new(None),
        });
        let valve_receiver = self.valve_receiver.clone();
        self.upstream.subscribe(Box::new(GateSubscriber {
            downstream: subscriber,
            gate,
            valve_receiver,
        }));
    }
}

struct GateState {
    released: AtomicBool,
    pending: AtomicU64,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl GateState {
    fn flush(&self) {
        if !self.released.load(Ordering::Acquire) {
            return;
        }
        let demand = self.pending.swap(0, Ordering::SeqCst);
        if demand > 0 {
            let upstream = { self.upstream.lock().clone() };
            if let Some(upstream) = upstream {
                upstream.request(demand);
            }
        }
    }
}

struct GateSubscriber<T: Send + 'static> {
    downstream: Box<dyn Subscriber<T>>,
    gate: Arc<GateState>,
    valve_receiver: ValveReceiver,
}

impl<T: Send + 'static> Subscriber<T> for GateSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.gate.upstream.lock() = Some(subscription);
        self.downstream.on_subscribe(Arc::new(GateSubscription {
            gate: self.gate.clone(),
        }));
        (self.valve_receiver)(GateRelease {
            gate: self.gate.clone(),
        });
    }

    fn on_next(&mut self, item: T) {
        self.downstream.on_next(item);
    }

    fn on_error(&mut self, failure: Failure) {
        self.downstream.on_error(failure);
    }

    fn on_complete(&mut self) {
        self.downstream.on_complete();
    }
}

struct GateSubscription {
    gate: Arc<GateState>,
}

impl Subscription for GateSubscription {
    fn request(&self, n: u64) {
        if self.gate.released.load(Ordering::Acquire) {
            let upstream = { self.gate.upstream.lock().clone() };
            if let Some(upstream) = upstream {
                upstream.request(n);
            }
            return;
        }
        let mut observed = self.gate.pending.load(Ordering::SeqCst);
        loop {
            let target = add_demand(observed, n);
            match self.gate.pending.compare_exchange(
                observed,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(seen) => observed = seen,
            }
        }
        // The gate may have opened while we were accumulating.
        self.gate.flush();
    }

    fn cancel(&self) {
        let upstream = { self.gate.upstream.lock().clone() };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

/// Opens the gate for one subscription.
pub struct GateRelease {
    gate: Arc<GateState>,
}

impl GateRelease {
    /// Forward all withheld demand and pass future demand straight
    /// through.
    pub fn release(self) {
        self.gate.released.store(true, Ordering::Release);
        self.gate.flush();
    }
}
