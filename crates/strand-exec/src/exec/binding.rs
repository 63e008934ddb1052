//! Thread-local execution binding.
//!
//! The binding is set around each segment with an RAII guard (so it is
//! cleared even on early return) and never leaks across pooled-thread
//! reuse. Code running inside a segment discovers its execution through
//! [`Execution::current`](super::Execution::current).

use super::execution::Execution;
use std::cell::{Cell, RefCell};

thread_local! {
    static CURRENT: RefCell<Option<Execution>> = const { RefCell::new(None) };
    static MANAGED: Cell<bool> = const { Cell::new(false) };
}

/// Scope guard binding an execution to the current thread.
pub(crate) struct BindingGuard {
    previous: Option<Execution>,
}

impl BindingGuard {
    /// Bind `execution`, saving any previous binding for restoration.
    pub(crate) fn bind(execution: Execution) -> Self {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(execution));
        BindingGuard { previous }
    }
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// The execution bound to the current thread, if any.
pub(crate) fn current() -> Option<Execution> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Mark the current thread as managed by a controller pool.
///
/// Managed threads may claim the drain role directly; unmanaged threads
/// must hand drains off to an event loop.
pub(crate) fn mark_managed() {
    MANAGED.with(|cell| cell.set(true));
}

/// Whether the current thread belongs to a controller pool.
pub(crate) fn is_managed() -> bool {
    MANAGED.with(|cell| cell.get())
}
