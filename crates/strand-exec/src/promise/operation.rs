//! Fire-and-forget asynchronous work.

use crate::promise::Promise;
use crate::result::Failure;
use std::error::Error as StdError;

/// Asynchronous work without a value: "do this, then tell me when it's done
/// (or failed)".
///
/// Backed by a [`Promise<()>`]; all operation semantics are promise
/// semantics read through a value-less lens, including lazy activation and
/// ownership-enforced single subscription.
pub struct Operation {
    promise: Promise<()>,
}

impl Operation {
    /// Wrap a synchronous block: the block runs when the operation is
    /// subscribed, and the operation succeeds if it returns `Ok`.
    pub fn of<E>(block: impl FnOnce() -> Result<(), E> + Send + 'static) -> Operation
    where
        E: StdError + Send + Sync + 'static,
    {
        Operation {
            promise: Promise::sync(block),
        }
    }

    /// An operation that succeeds immediately.
    pub fn noop() -> Operation {
        Operation {
            promise: Promise::value(()),
        }
    }

    pub(crate) fn from_promise(promise: Promise<()>) -> Operation {
        Operation { promise }
    }

    /// Terminal subscription: run `block` after the operation succeeds.
    pub fn then(self, block: impl FnOnce() + Send + 'static) {
        self.promise.then(move |()| block());
    }

    /// Activate the operation purely for its side effects.
    pub fn run(self) {
        self.promise.then(|()| {});
    }

    /// Sequential composition: run `self`, and only if it succeeds, run
    /// `next`. Failure short-circuits without running `next`.
    pub fn next(self, next: Operation) -> Operation {
        Operation {
            promise: self.promise.flat_map(move |()| next.promise),
        }
    }

    /// As [`next`](Operation::next), with a synchronous block.
    pub fn next_run<E>(self, block: impl FnOnce() -> Result<(), E> + Send + 'static) -> Operation
    where
        E: StdError + Send + Sync + 'static,
    {
        self.next(Operation::of(block))
    }

    /// Consume a failure with a side-effecting handler, as
    /// [`Promise::on_error`].
    pub fn on_error(self, handler: impl FnOnce(Failure) + Send + 'static) -> Operation {
        Operation {
            promise: self.promise.on_error(handler),
        }
    }

    /// View the operation as a `Promise<()>`.
    pub fn promise(self) -> Promise<()> {
        self.promise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ExecHarness;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("op failed")]
    struct OpFailed;

    fn record(events: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) {
        events.lock().push(label);
    }

    #[test]
    fn test_then_runs_after_success() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let in_block = events.clone();
        let in_then = events.clone();
        ExecHarness::run_single(move |_exec| {
            Operation::of(move || {
                record(&in_block, "block");
                Ok::<_, Infallible>(())
            })
            .then(move || record(&in_then, "then"));
            Ok(())
        })
        .unwrap();
        assert_eq!(*events.lock(), vec!["block", "then"]);
    }

    #[test]
    fn test_next_sequences_operations() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let first = events.clone();
        let second = events.clone();
        let third = events.clone();
        ExecHarness::run_single(move |_exec| {
            Operation::of(move || {
                record(&first, "first");
                Ok::<_, Infallible>(())
            })
            .next_run(move || {
                record(&second, "second");
                Ok::<_, Infallible>(())
            })
            .then(move || record(&third, "done"));
            Ok(())
        })
        .unwrap();
        assert_eq!(*events.lock(), vec!["first", "second", "done"]);
    }

    #[test]
    fn test_failure_short_circuits_next() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let skipped = events.clone();
        let handled = events.clone();
        ExecHarness::run_single(move |_exec| {
            Operation::of(|| Err(OpFailed))
                .next_run(move || {
                    record(&skipped, "skipped");
                    Ok::<_, Infallible>(())
                })
                .on_error(move |_| record(&handled, "handled"))
                .run();
            Ok(())
        })
        .unwrap();
        assert_eq!(*events.lock(), vec!["handled"]);
    }

    #[test]
    fn test_operation_is_lazy() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let in_block = events.clone();
        let operation = Operation::of(move || {
            record(&in_block, "ran");
            Ok::<_, Infallible>(())
        });
        drop(operation);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_promise_view_round_trips() {
        let result = ExecHarness::yield_single(|_exec| {
            Operation::noop().promise().map(|()| "done")
        });
        assert_eq!(result.into_value(), Some("done"));
    }
}
