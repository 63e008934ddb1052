//! Promises: lazy, single-subscription, composable handles to values
//! computed asynchronously.
//!
//! A [`Promise`] does nothing when constructed; work begins only when a
//! terminal consumption method is invoked. Combinators build new promises
//! by wrapping the underlying [`Upstream`] with derived [`Downstream`]
//! sinks. Single subscription is enforced by ownership: every combinator
//! and terminal method consumes the promise.

mod cache;
mod downstream;
mod fulfiller;
mod operation;
#[allow(clippy::module_inception)]
mod promise;
mod throttle;
mod upstream;

pub use cache::CachedPromise;
pub use downstream::Downstream;
pub use fulfiller::{AbandonedError, Fulfiller};
pub use operation::Operation;
pub use promise::{Promise, Release};
pub use throttle::Throttle;
pub use upstream::Upstream;
