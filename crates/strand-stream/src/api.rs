//! The reactive stream triad.

use std::sync::Arc;
use strand_exec::Failure;
use thiserror::Error;

/// Sentinel demand meaning "no flow control": the subscriber can absorb
/// everything the publisher produces.
pub const UNBOUNDED: u64 = u64::MAX;

/// A shared, type-erased publisher handle.
pub type DynPublisher<T> = Arc<dyn Publisher<T>>;

/// Demand must be positive; `request(0)` violates the stream protocol.
///
/// Signalled to the offending subscriber via
/// [`Subscriber::on_error`], after which the subscription is cancelled.
#[derive(Debug, Error)]
#[error("subscription demand must be positive")]
pub struct InvalidDemandError;

/// Subscribing to a shared stream whose upstream has already terminated.
#[derive(Debug, Error)]
#[error("stream has already terminated; no replay is available")]
pub struct StreamTerminatedError;

/// The flow-control handle given to a subscriber.
pub trait Subscription: Send + Sync {
    /// Signal demand for `n` more items. [`UNBOUNDED`] switches off flow
    /// control for the remainder of the stream.
    fn request(&self, n: u64);

    /// Signal no further interest. After this returns, no further signal
    /// is delivered to the subscriber; already-buffered items go to the
    /// operator's disposer instead.
    fn cancel(&self);
}

/// The consumer side of a stream.
///
/// A well-behaved publisher calls `on_subscribe` first, `on_next` at most
/// as many times as cumulative requested demand, and exactly one of
/// `on_complete`/`on_error` last.
pub trait Subscriber<T>: Send {
    /// Receive the flow-control handle.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// Receive one item.
    fn on_next(&mut self, item: T);

    /// Terminal: the stream failed.
    fn on_error(&mut self, failure: Failure);

    /// Terminal: the stream finished.
    fn on_complete(&mut self);
}

/// The producer side of a stream.
pub trait Publisher<T>: Send + Sync {
    /// Begin a subscription. Flow is driven entirely by the subscriber
    /// through the [`Subscription`] it receives.
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

/// Saturating demand accounting: accumulates toward [`UNBOUNDED`] without
/// overflow.
pub(crate) fn add_demand(current: u64, n: u64) -> u64 {
    current.saturating_add(n)
}

/// A subscription that ignores all signals, for subscribers that are
/// rejected at subscribe time.
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_demand_saturates_at_unbounded() {
        assert_eq!(add_demand(1, 2), 3);
        assert_eq!(add_demand(UNBOUNDED - 1, 1), UNBOUNDED);
        assert_eq!(add_demand(UNBOUNDED, 5), UNBOUNDED);
        assert_eq!(add_demand(5, UNBOUNDED), UNBOUNDED);
    }
}
