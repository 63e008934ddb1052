//! The producer side of an asynchronous value.

use crate::promise::Downstream;

/// A source of exactly one signal: given a [`Downstream`], eventually
/// invokes it once.
///
/// Upstreams own no state of their own; promises are composed functionally
/// by wrapping one upstream in another. Closures taking a downstream
/// implement this trait directly.
pub trait Upstream<T>: Send {
    /// Connect the downstream. The upstream must eventually deliver exactly
    /// one signal to it (ownership of the downstream makes more than one
    /// impossible).
    fn connect(self: Box<Self>, downstream: Downstream<T>);
}

impl<T, F> Upstream<T> for F
where
    F: FnOnce(Downstream<T>) + Send,
{
    fn connect(self: Box<Self>, downstream: Downstream<T>) {
        (self)(downstream)
    }
}
