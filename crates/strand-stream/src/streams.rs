//! Stream construction and composition entry points.
//!
//! The functions here are the public face of the operator types: they take
//! and return [`DynPublisher`] handles so pipelines compose without naming
//! the operator structs.

use crate::api::{DynPublisher, Publisher, Subscriber, Subscription, UNBOUNDED};
use crate::buffering::{BufferedWriteStream, BufferingPublisher, Disposer};
use crate::concat::ConcatPublisher;
use crate::forking::ForkingPublisher;
use crate::gated::{GateRelease, GatedPublisher};
use crate::merging::MergingPublisher;
use crate::multicast::MulticastPublisher;
use crate::wiretap::{StreamEvent, WiretapPublisher};
use crate::yielding::{FlatYieldingPublisher, YieldRequest, YieldingPublisher};
use parking_lot::Mutex;
use std::sync::Arc;
use strand_exec::drain::{DrainQueue, Step};
use strand_exec::{Downstream, ExecController, ExecResult, Failure, Promise};

/// A stream of the items of `items`, replayable per subscriber.
pub fn publish<T: Clone + Send + Sync + 'static>(items: Vec<T>) -> DynPublisher<T> {
    let items = Arc::new(items);
    yield_fn(move |request| Ok(items.get(request.sequence() as usize).cloned()))
}

/// A stream that completes immediately without items.
pub fn empty<T: Send + 'static>() -> DynPublisher<T> {
    yield_fn(|_request| Ok(None))
}

/// An endless stream repeating `item`.
pub fn constant<T: Clone + Send + Sync + 'static>(item: T) -> DynPublisher<T> {
    yield_fn(move |_request| Ok(Some(item.clone())))
}

/// Pull-based generation: `producer` runs once per unit of demand.
/// `Ok(None)` ends the stream; `Err` fails it.
pub fn yield_fn<T: Send + 'static>(
    producer: impl Fn(&YieldRequest) -> Result<Option<T>, Failure> + Send + Sync + 'static,
) -> DynPublisher<T> {
    Arc::new(YieldingPublisher::new(producer))
}

/// Promise-driven generation: one promise subscribed per unit of demand,
/// strictly sequentially, within the subscribing execution.
pub fn flat_yield<T: Send + 'static>(
    producer: impl Fn(&YieldRequest) -> Promise<Option<T>> + Send + Sync + 'static,
) -> DynPublisher<T> {
    Arc::new(FlatYieldingPublisher::new(producer))
}

/// Decouple `publisher` from downstream demand through a buffer: the
/// upstream is consumed as fast as it produces, items wait for demand.
pub fn buffer<T: Send + 'static>(
    publisher: DynPublisher<T>,
    disposer: Option<Disposer<T>>,
) -> DynPublisher<T> {
    Arc::new(BufferingPublisher::new(disposer, move |write| {
        connect_through(publisher.clone(), write)
    }))
}

/// Withhold demand from `publisher` until the release handed to
/// `valve_receiver` fires.
pub fn gate<T: Send + 'static>(
    publisher: DynPublisher<T>,
    valve_receiver: impl Fn(GateRelease) + Send + Sync + 'static,
) -> DynPublisher<T> {
    Arc::new(GatedPublisher::new(publisher, valve_receiver))
}

/// Interleave `publishers`; complete when all complete, fail fast on the
/// first error.
pub fn merge<T: Send + 'static>(
    publishers: Vec<DynPublisher<T>>,
    disposer: Option<Disposer<T>>,
) -> DynPublisher<T> {
    Arc::new(MergingPublisher::new(publishers, disposer))
}

/// Concatenate `publishers`, subscribing each after the previous
/// completes.
pub fn concat<T: Send + 'static>(publishers: Vec<DynPublisher<T>>) -> DynPublisher<T> {
    Arc::new(ConcatPublisher::new(publishers))
}

/// Share one upstream subscription between many subscribers, without
/// replay.
pub fn multicast<T: Clone + Send + 'static>(publisher: DynPublisher<T>) -> DynPublisher<T> {
    Arc::new(MulticastPublisher::new(publisher))
}

/// Observe every event flowing through `publisher`.
pub fn wiretap<T: Send + 'static>(
    publisher: DynPublisher<T>,
    listener: impl for<'a> Fn(StreamEvent<'a, T>) + Send + Sync + 'static,
) -> DynPublisher<T> {
    Arc::new(WiretapPublisher::new(publisher, listener))
}

/// Consume `publisher` inside an execution forked from `controller`,
/// re-buffering for the downstream's demand.
pub fn fork<T: Send + 'static>(
    controller: &ExecController,
    publisher: DynPublisher<T>,
    disposer: Option<Disposer<T>>,
) -> DynPublisher<T> {
    Arc::new(ForkingPublisher::new(
        controller.clone(),
        publisher,
        disposer,
    ))
}

/// The first item of `publisher` as a promise.
///
/// The upstream is cancelled after the first item; an empty stream
/// completes the promise without a value.
pub fn to_promise<T: Send + 'static>(publisher: DynPublisher<T>) -> Promise<T> {
    Promise::of(move |down: Downstream<T>| {
        publisher.subscribe(Box::new(HeadSubscriber {
            downstream: Some(down),
            subscription: None,
        }));
    })
}

/// All items of `publisher` as a promise of a vector.
pub fn to_list<T: Send + 'static>(publisher: DynPublisher<T>) -> Promise<Vec<T>> {
    Promise::of(move |down: Downstream<Vec<T>>| {
        publisher.subscribe(Box::new(CollectSubscriber {
            downstream: Some(down),
            collected: Vec::new(),
        }));
    })
}

/// Subscribe `publisher` into a buffered write stream, relaying demand and
/// cancellation through a signal queue until the upstream subscription
/// arrives.
fn connect_through<T: Send + 'static>(
    publisher: DynPublisher<T>,
    write: BufferedWriteStream<T>,
) -> Arc<dyn Subscription> {
    let connector = Arc::new(Connector {
        signals: DrainQueue::new(),
        upstream: Mutex::new(None),
    });
    publisher.subscribe(Box::new(ConnectorSubscriber {
        connector: connector.clone(),
        write,
    }));
    Arc::new(ConnectorSubscription { connector })
}

enum ConnectorSignal {
    Request(u64),
    Cancel,
}

struct Connector {
    signals: DrainQueue<ConnectorSignal>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl Connector {
    fn drain(this: &Arc<Self>) {
        let connector = this.clone();
        this.signals.drain_with(move |signal| {
            let upstream = { connector.upstream.lock().clone() };
            let Some(upstream) = upstream else {
                // Park until the upstream subscription arrives.
                return Step::Yield(signal);
            };
            match signal {
                ConnectorSignal::Request(n) => upstream.request(n),
                ConnectorSignal::Cancel => upstream.cancel(),
            }
            Step::Consumed
        });
    }
}

struct ConnectorSubscriber<T: Send + 'static> {
    connector: Arc<Connector>,
    write: BufferedWriteStream<T>,
}

impl<T: Send + 'static> Subscriber<T> for ConnectorSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.connector.upstream.lock() = Some(subscription);
        Connector::drain(&self.connector);
    }

    fn on_next(&mut self, item: T) {
        self.write.item(item);
    }

    fn on_error(&mut self, failure: Failure) {
        self.write.error(failure);
    }

    fn on_complete(&mut self) {
        self.write.complete();
    }
}

struct ConnectorSubscription {
    connector: Arc<Connector>,
}

impl Subscription for ConnectorSubscription {
    fn request(&self, n: u64) {
        self.connector.signals.push(ConnectorSignal::Request(n));
        Connector::drain(&self.connector);
    }

    fn cancel(&self) {
        self.connector.signals.push(ConnectorSignal::Cancel);
        Connector::drain(&self.connector);
    }
}

struct HeadSubscriber<T: Send + 'static> {
    downstream: Option<Downstream<T>>,
    subscription: Option<Arc<dyn Subscription>>,
}

impl<T: Send + 'static> Subscriber<T> for HeadSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.subscription = Some(subscription.clone());
        subscription.request(1);
    }

    fn on_next(&mut self, item: T) {
        if let Some(down) = self.downstream.take() {
            if let Some(subscription) = self.subscription.take() {
                subscription.cancel();
            }
            down.success(item);
        }
    }

    fn on_error(&mut self, failure: Failure) {
        if let Some(down) = self.downstream.take() {
            down.error(failure);
        }
    }

    fn on_complete(&mut self) {
        if let Some(down) = self.downstream.take() {
            down.complete();
        }
    }
}

struct CollectSubscriber<T: Send + 'static> {
    downstream: Option<Downstream<Vec<T>>>,
    collected: Vec<T>,
}

impl<T: Send + 'static> Subscriber<T> for CollectSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, item: T) {
        self.collected.push(item);
    }

    fn on_error(&mut self, failure: Failure) {
        if let Some(down) = self.downstream.take() {
            down.error(failure);
        }
    }

    fn on_complete(&mut self) {
        if let Some(down) = self.downstream.take() {
            down.accept(ExecResult::Success(std::mem::take(&mut self.collected)));
        }
    }
}
