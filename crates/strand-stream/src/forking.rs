//! Consuming an upstream on a forked execution.

use crate::api::{DynPublisher, Publisher, Subscriber, Subscription, UNBOUNDED};
use crate::buffering::{BufferedWriteStream, BufferingPublisher, Disposer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strand_exec::{ExecController, ExecutionHold, Failure};

/// Consumes its upstream inside a forked execution, decoupling the
/// upstream pull loop's thread from the downstream subscriber's thread.
///
/// The upstream is requested at unbounded demand internally; items are
/// re-buffered and delivered under the downstream's actual demand.
pub struct ForkingPublisher<T: Send + 'static> {
    controller: ExecController,
    upstream: DynPublisher<T>,
    disposer: Option<Disposer<T>>,
}

impl<T: Send + 'static> ForkingPublisher<T> {
    /// Fork consumption of `upstream` onto executions of `controller`.
    pub fn new(
        controller: ExecController,
        upstream: DynPublisher<T>,
        disposer: Option<Disposer<T>>,
    ) -> Self {
        Self {
            controller,
            upstream,
            disposer,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for ForkingPublisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let controller = self.controller.clone();
        let upstream = self.upstream.clone();
        let buffering = BufferingPublisher::new(self.disposer.clone(), move |write| {
            let fork = Arc::new(ForkState {
                cancelled: AtomicBool::new(false),
                upstream: Mutex::new(None),
                hold: Mutex::new(None),
            });
            let fork_for_exec = fork.clone();
            let upstream = upstream.clone();
            controller.fork().start(move |execution| {
                // Hold the forked execution open for the life of the
                // upstream subscription.
                *fork_for_exec.hold.lock() = Some(execution.hold());
                upstream.subscribe(Box::new(ForkSubscriber {
                    write,
                    fork: fork_for_exec,
                }));
                Ok(())
            });
            Arc::new(ForkSubscription { fork }) as Arc<dyn Subscription>
        });
        buffering.subscribe(subscriber);
    }
}

struct ForkState {
    cancelled: AtomicBool,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    hold: Mutex<Option<ExecutionHold>>,
}

impl ForkState {
    fn release(&self) {
        *self.hold.lock() = None;
    }
}

struct ForkSubscriber<T: Send + 'static> {
    write: BufferedWriteStream<T>,
    fork: Arc<ForkState>,
}

impl<T: Send + 'static> Subscriber<T> for ForkSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.fork.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            self.fork.release();
            return;
        }
        *self.fork.upstream.lock() = Some(subscription.clone());
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, item: T) {
        self.write.item(item);
    }

    fn on_error(&mut self, failure: Failure) {
        self.write.error(failure);
        self.fork.release();
    }

    fn on_complete(&mut self) {
        self.write.complete();
        self.fork.release();
    }
}

struct ForkSubscription {
    fork: Arc<ForkState>,
}

impl Subscription for ForkSubscription {
    fn request(&self, _n: u64) {
        // Upstream already runs at unbounded demand; the buffer enforces
        // the downstream's demand.
    }

    fn cancel(&self) {
        self.fork.cancelled.store(true, Ordering::Release);
        let upstream = { self.fork.upstream.lock().clone() };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.fork.release();
    }
}
