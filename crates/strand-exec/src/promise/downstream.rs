//! The consumer side of an asynchronous value.

use crate::result::{ExecResult, Failure};

/// A write-once signal sink: accepts exactly one of success, error, or
/// complete.
///
/// The write-once contract is enforced by ownership: every signal method
/// consumes the downstream, so a second signal is a compile error rather
/// than a runtime fault. Producers that cannot express single use through
/// ownership (external callback APIs) go through
/// [`Fulfiller`](crate::Fulfiller), which guards at runtime.
pub struct Downstream<T> {
    sink: Box<dyn FnOnce(ExecResult<T>) + Send>,
}

impl<T: Send + 'static> Downstream<T> {
    /// Create a downstream from a one-shot result sink.
    pub fn new(sink: impl FnOnce(ExecResult<T>) + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Signal that the value was produced.
    pub fn success(self, value: T) {
        self.accept(ExecResult::Success(value));
    }

    /// Signal that the value could not be produced.
    pub fn error(self, failure: Failure) {
        self.accept(ExecResult::Error(failure));
    }

    /// Signal that the execution completed without a value.
    pub fn complete(self) {
        self.accept(ExecResult::Complete);
    }

    /// Deliver a result, dispatching to the appropriate signal.
    pub fn accept(self, result: ExecResult<T>) {
        (self.sink)(result);
    }

    /// Derive a downstream that intercepts success and forwards the other
    /// two signals to `self` unchanged.
    ///
    /// This is the mechanism by which `map`, `flat_map` and friends are
    /// implemented without each operator re-deriving the full three-way
    /// dispatch. The interceptor receives the original downstream so it can
    /// forward a transformed signal.
    pub fn on_success<I: Send + 'static>(
        self,
        f: impl FnOnce(I, Downstream<T>) + Send + 'static,
    ) -> Downstream<I> {
        Downstream::new(move |result| match result {
            ExecResult::Success(value) => f(value, self),
            ExecResult::Error(failure) => self.error(failure),
            ExecResult::Complete => self.complete(),
        })
    }

    /// Derive a downstream that intercepts error and forwards the other two
    /// signals to `self` unchanged.
    pub fn on_error(self, f: impl FnOnce(Failure, Downstream<T>) + Send + 'static) -> Downstream<T> {
        Downstream::new(move |result| match result {
            ExecResult::Success(value) => self.success(value),
            ExecResult::Error(failure) => f(failure, self),
            ExecResult::Complete => self.complete(),
        })
    }

    /// Derive a downstream that intercepts complete and forwards the other
    /// two signals to `self` unchanged.
    pub fn on_complete(self, f: impl FnOnce(Downstream<T>) + Send + 'static) -> Downstream<T> {
        Downstream::new(move |result| match result {
            ExecResult::Success(value) => self.success(value),
            ExecResult::Error(failure) => self.error(failure),
            ExecResult::Complete => f(self),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::failure;
    use std::sync::mpsc;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn capture<T: Send + 'static>() -> (Downstream<T>, mpsc::Receiver<ExecResult<T>>) {
        let (tx, rx) = mpsc::channel();
        (
            Downstream::new(move |result| {
                tx.send(result).unwrap();
            }),
            rx,
        )
    }

    #[test]
    fn test_signals_dispatch() {
        let (down, rx) = capture::<i32>();
        down.success(7);
        assert_eq!(rx.recv().unwrap().into_value(), Some(7));

        let (down, rx) = capture::<i32>();
        down.error(failure(Boom));
        assert!(rx.recv().unwrap().is_error());

        let (down, rx) = capture::<i32>();
        down.complete();
        assert!(rx.recv().unwrap().is_complete());
    }

    #[test]
    fn test_on_success_intercepts_only_success() {
        let (down, rx) = capture::<String>();
        let derived = down.on_success(|n: i32, down| down.success(format!("got {n}")));
        derived.success(5);
        assert_eq!(rx.recv().unwrap().into_value().unwrap(), "got 5");

        let (down, rx) = capture::<String>();
        let derived = down.on_success(|_: i32, down| down.success(String::new()));
        derived.error(failure(Boom));
        assert!(rx.recv().unwrap().is_error());

        let (down, rx) = capture::<String>();
        let derived = down.on_success(|_: i32, down| down.success(String::new()));
        derived.complete();
        assert!(rx.recv().unwrap().is_complete());
    }

    #[test]
    fn test_on_error_intercepts_only_error() {
        let (down, rx) = capture::<i32>();
        let derived = down.on_error(|_, down| down.success(0));
        derived.error(failure(Boom));
        assert_eq!(rx.recv().unwrap().into_value(), Some(0));

        let (down, rx) = capture::<i32>();
        let derived = down.on_error(|_, down| down.success(0));
        derived.success(9);
        assert_eq!(rx.recv().unwrap().into_value(), Some(9));
    }

    #[test]
    fn test_on_complete_intercepts_only_complete() {
        let (down, rx) = capture::<i32>();
        let derived = down.on_complete(|down| down.success(1));
        derived.complete();
        assert_eq!(rx.recv().unwrap().into_value(), Some(1));
    }
}
