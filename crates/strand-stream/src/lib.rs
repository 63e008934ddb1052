//! Backpressure-aware reactive stream operators.
//!
//! The [`Publisher`]/[`Subscriber`]/[`Subscription`] triad follows the
//! Reactive Streams discipline: demand is signalled with
//! [`Subscription::request`], a well-behaved publisher never emits beyond
//! cumulative demand, delivers at most one terminal signal, and propagates
//! [`Subscription::cancel`] upstream. The operators here share the
//! execution core's single-flight drain idiom: one thread at a time pulls
//! from an internal buffer, contending threads enqueue and return.
//!
//! Operators are constructed through the [`streams`] module.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod api;
mod buffering;
mod concat;
mod forking;
mod gated;
mod merging;
mod multicast;
mod partial_buffering;
pub mod streams;
mod wiretap;
mod yielding;

pub use api::{
    DynPublisher, InvalidDemandError, Publisher, StreamTerminatedError, Subscriber, Subscription,
    UNBOUNDED,
};
pub use buffering::{BufferedWriteStream, BufferingPublisher, Disposer};
pub use concat::ConcatPublisher;
pub use forking::ForkingPublisher;
pub use gated::{GateRelease, GatedPublisher};
pub use merging::MergingPublisher;
pub use multicast::MulticastPublisher;
pub use partial_buffering::{PartialBufferingPublisher, PartialWriteStream};
pub use wiretap::{StreamEvent, WiretapPublisher};
pub use yielding::{FlatYieldingPublisher, YieldRequest, YieldingPublisher};
