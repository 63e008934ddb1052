//! Pull-based stream generation: one producer invocation per unit of
//! downstream demand.

use crate::api::{add_demand, InvalidDemandError, Publisher, Subscriber, Subscription, UNBOUNDED};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_exec::{failure, Execution, ExecutionHold, ExecResult, Failure, Promise};

/// Context for one producer invocation.
pub struct YieldRequest {
    sequence: u64,
}

impl YieldRequest {
    /// How many items have been produced before this one, across the
    /// subscription.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

type SyncProducer<T> = Arc<dyn Fn(&YieldRequest) -> Result<Option<T>, Failure> + Send + Sync>;

/// Generates items on demand from a synchronous producer.
///
/// Each unit of demand invokes the producer once; `Ok(None)` ends the
/// stream with `on_complete`, `Err` ends it with `on_error`. Each
/// subscriber gets an independent sequence.
pub struct YieldingPublisher<T: Send + 'static> {
    producer: SyncProducer<T>,
}

impl<T: Send + 'static> YieldingPublisher<T> {
    /// Create a publisher around `producer`.
    pub fn new(
        producer: impl Fn(&YieldRequest) -> Result<Option<T>, Failure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for YieldingPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = Arc::new(YieldState {
            producer: self.producer.clone(),
            demand: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            emitting: AtomicBool::new(false),
            done: AtomicBool::new(false),
            subscriber: Mutex::new(None),
        });
        subscriber.on_subscribe(Arc::new(YieldSubscription {
            state: state.clone(),
        }));
        *state.subscriber.lock() = Some(subscriber);
        YieldState::pump(&state);
    }
}

struct YieldState<T: Send + 'static> {
    producer: SyncProducer<T>,
    demand: AtomicU64,
    sequence: AtomicU64,
    emitting: AtomicBool,
    done: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send + 'static> YieldState<T> {
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

    /// Single-flight emission loop: claim, produce while demand lasts,
    /// release, re-check.
    fn pump(this: &Arc<Self>) {
        loop {
            if this
                .emitting
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            while !this.done.load(Ordering::Acquire) {
                // Produce nothing until the subscriber is attached; demand
                // requested from within on_subscribe waits here.
                if this.subscriber.lock().is_none() {
                    break;
                }
                if !this.take_one_demand() {
                    break;
                }
                let request = YieldRequest {
                    sequence: this.sequence.fetch_add(1, Ordering::Relaxed),
                };
                let produced = (this.producer)(&request);
                let mut guard = this.subscriber.lock();
                let Some(subscriber) = guard.as_mut() else {
                    break;
                };
                match produced {
                    Ok(Some(item)) => subscriber.on_next(item),
                    Ok(None) => {
                        this.done.store(true, Ordering::Release);
                        if let Some(mut subscriber) = guard.take() {
                            subscriber.on_complete();
                        }
                    }
                    Err(fail) => {
                        this.done.store(true, Ordering::Release);
                        if let Some(mut subscriber) = guard.take() {
                            subscriber.on_error(fail);
                        }
                    }
                }
            }
            this.emitting.store(false, Ordering::Release);
            if this.done.load(Ordering::Acquire)
                || this.demand.load(Ordering::SeqCst) == 0
                || this.subscriber.lock().is_none()
            {
                return;
            }
            // Demand arrived while releasing; loop to re-claim.
        }
    }
}

struct YieldSubscription<T: Send + 'static> {
    state: Arc<YieldState<T>>,
}

impl<T: Send + 'static> Subscription for YieldSubscription<T> {
    fn request(&self, n: u64) {
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        if n == 0 {
            self.state.done.store(true, Ordering::Release);
            if let Some(mut subscriber) = self.state.subscriber.lock().take() {
                subscriber.on_error(failure(InvalidDemandError));
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
        YieldState::pump(&self.state);
    }

    fn cancel(&self) {
        self.state.done.store(true, Ordering::Release);
    }
}

type FlatProducer<T> = Arc<dyn Fn(&YieldRequest) -> Promise<Option<T>> + Send + Sync>;

/// Generates items on demand from a promise-returning producer.
///
/// Each unit of demand subscribes one promise within the execution that
/// subscribed the stream; promises are pulled strictly one at a time. A
/// `None` value ends the stream with `on_complete`; a failed promise ends
/// it with `on_error`. Subscription must happen inside an execution.
pub struct FlatYieldingPublisher<T: Send + 'static> {
    producer: FlatProducer<T>,
}

impl<T: Send + 'static> FlatYieldingPublisher<T> {
    /// Create a publisher around `producer`.
    pub fn new(
        producer: impl Fn(&YieldRequest) -> Promise<Option<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for FlatYieldingPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let execution = match Execution::try_current() {
            Ok(execution) => execution,
            Err(err) => {
                subscriber.on_subscribe(Arc::new(crate::api::NoopSubscription));
                subscriber.on_error(failure(err));
                return;
            }
        };
        let state = Arc::new(FlatYieldState {
            producer: self.producer.clone(),
            execution: execution.clone(),
            hold: Mutex::new(Some(execution.hold())),
            demand: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            done: AtomicBool::new(false),
            subscriber: Mutex::new(None),
        });
        subscriber.on_subscribe(Arc::new(FlatYieldSubscription {
            state: state.clone(),
        }));
        *state.subscriber.lock() = Some(subscriber);
        FlatYieldState::pump(&state);
    }
}

struct FlatYieldState<T: Send + 'static> {
    producer: FlatProducer<T>,
    execution: Execution,
    // Keeps the subscribing execution alive between pulls.
    hold: Mutex<Option<ExecutionHold>>,
    demand: AtomicU64,
    sequence: AtomicU64,
    in_flight: AtomicBool,
    done: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send + 'static> FlatYieldState<T> {
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

    fn finish(this: &Arc<Self>, terminal: Option<Failure>) {
        this.done.store(true, Ordering::Release);
        let taken = this.subscriber.lock().take();
        if let Some(mut subscriber) = taken {
            match terminal {
                Some(fail) => subscriber.on_error(fail),
                None => subscriber.on_complete(),
            }
        }
        *this.hold.lock() = None;
    }

    fn pump(this: &Arc<Self>) {
        if this.done.load(Ordering::Acquire) {
            return;
        }
        if this
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if this.subscriber.lock().is_none() {
            // Not attached yet; the attach-time pump picks the demand up.
            this.in_flight.store(false, Ordering::Release);
            return;
        }
        if !this.take_one_demand() {
            this.in_flight.store(false, Ordering::Release);
            // Demand may have arrived during release.
            if this.demand.load(Ordering::SeqCst) > 0 && !this.done.load(Ordering::Acquire) {
                Self::pump(this);
            }
            return;
        }
        let state = this.clone();
        this.execution.schedule(move |_exec| {
            let request = YieldRequest {
                sequence: state.sequence.fetch_add(1, Ordering::Relaxed),
            };
            let promise = (state.producer)(&request);
            let delivery = state.clone();
            promise.result(move |result| {
                match result {
                    ExecResult::Success(Some(item)) => {
                        // Deliver without holding the subscriber slot, so a
                        // cancel issued from within on_next cannot deadlock.
                        let mut taken = delivery.subscriber.lock().take();
                        if let Some(subscriber) = taken.as_mut() {
                            subscriber.on_next(item);
                        }
                        if !delivery.done.load(Ordering::Acquire) {
                            *delivery.subscriber.lock() = taken;
                        }
                        delivery.in_flight.store(false, Ordering::Release);
                        Self::pump(&delivery);
                    }
                    ExecResult::Success(None) | ExecResult::Complete => {
                        Self::finish(&delivery, None);
                    }
                    ExecResult::Error(fail) => {
                        Self::finish(&delivery, Some(fail));
                    }
                }
            });
            Ok(())
        });
    }
}

struct FlatYieldSubscription<T: Send + 'static> {
    state: Arc<FlatYieldState<T>>,
}

impl<T: Send + 'static> Subscription for FlatYieldSubscription<T> {
    fn request(&self, n: u64) {
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        if n == 0 {
            FlatYieldState::finish(&self.state, Some(failure(InvalidDemandError)));
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
        FlatYieldState::pump(&self.state);
    }

    fn cancel(&self) {
        self.state.done.store(true, Ordering::Release);
        *self.state.subscriber.lock() = None;
        *self.state.hold.lock() = None;
    }
}
