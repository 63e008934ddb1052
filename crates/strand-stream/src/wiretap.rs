//! Observing stream events without altering them.

use crate::api::{DynPublisher, Publisher, Subscriber, Subscription};
use std::sync::Arc;
use strand_exec::Failure;

/// A stream event observed by a wiretap listener.
pub enum StreamEvent<'a, T> {
    /// An item flowed downstream.
    Next(&'a T),
    /// The stream terminated with a failure.
    Error(&'a Failure),
    /// The stream terminated normally.
    Complete,
    /// The subscriber requested more items.
    Request(u64),
    /// The subscriber cancelled.
    Cancel,
}

type Listener<T> = Arc<dyn for<'a> Fn(StreamEvent<'a, T>) + Send + Sync>;

/// Passes all signals through unchanged, reporting each to a listener.
pub struct WiretapPublisher<T: Send + 'static> {
    upstream: DynPublisher<T>,
    listener: Listener<T>,
}

impl<T: Send + 'static> WiretapPublisher<T> {
    /// Observe `upstream` with `listener`.
    pub fn new(
        upstream: DynPublisher<T>,
        listener: impl for<'a> Fn(StreamEvent<'a, T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            upstream,
            listener: Arc::new(listener),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for WiretapPublisher<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.upstream.subscribe(Box::new(TapSubscriber {
            downstream: subscriber,
            listener: self.listener.clone(),
        }));
    }
}

struct TapSubscriber<T: Send + 'static> {
    downstream: Box<dyn Subscriber<T>>,
    listener: Listener<T>,
}

impl<T: Send + 'static> Subscriber<T> for TapSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(Arc::new(TapSubscription {
            inner: subscription,
            listener: self.listener.clone(),
        }));
    }

    fn on_next(&mut self, item: T) {
        (self.listener)(StreamEvent::Next(&item));
        self.downstream.on_next(item);
    }

    fn on_error(&mut self, failure: Failure) {
        (self.listener)(StreamEvent::Error(&failure));
        self.downstream.on_error(failure);
    }

    fn on_complete(&mut self) {
        (self.listener)(StreamEvent::Complete);
        self.downstream.on_complete();
    }
}

struct TapSubscription<T: Send + 'static> {
    inner: Arc<dyn Subscription>,
    listener: Listener<T>,
}

impl<T: Send + 'static> Subscription for TapSubscription<T> {
    fn request(&self, n: u64) {
        (self.listener)(StreamEvent::Request(n));
        self.inner.request(n);
    }

    fn cancel(&self) {
        (self.listener)(StreamEvent::Cancel);
        self.inner.cancel();
    }
}
