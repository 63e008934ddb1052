//! Bridging external callback APIs into the promise model.

use crate::promise::Downstream;
use crate::result::{failure, ExecResult};
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::sync::Arc;

/// Raised when every fulfiller clone is dropped without delivering a
/// signal.
#[derive(Debug, thiserror::Error)]
#[error("promise abandoned: fulfiller dropped without delivering a signal")]
pub struct AbandonedError;

struct FulfillerState<T: Send + 'static> {
    sink: Mutex<Option<Downstream<T>>>,
}

impl<T: Send + 'static> Drop for FulfillerState<T> {
    fn drop(&mut self) {
        // An unfired fulfiller would leave the execution waiting forever;
        // fail the promise instead.
        if let Some(down) = self.sink.get_mut().take() {
            down.error(failure(AbandonedError));
        }
    }
}

/// The write side of an externally fulfilled promise.
///
/// Cloneable and sendable across threads; exactly one signal is ever
/// delivered. Because external callback code cannot express single use
/// through ownership, this is the one place the write-once rule is guarded
/// at runtime: a second fulfilment is logged and dropped.
pub struct Fulfiller<T: Send + 'static> {
    state: Arc<FulfillerState<T>>,
}

impl<T: Send + 'static> Clone for Fulfiller<T> {
    fn clone(&self) -> Self {
        Fulfiller {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> Fulfiller<T> {
    pub(crate) fn new(downstream: Downstream<T>) -> Self {
        Fulfiller {
            state: Arc::new(FulfillerState {
                sink: Mutex::new(Some(downstream)),
            }),
        }
    }

    /// Fulfil the promise with a value.
    pub fn success(&self, value: T) {
        self.fire(ExecResult::Success(value));
    }

    /// Fail the promise.
    pub fn error<E: StdError + Send + Sync + 'static>(&self, err: E) {
        self.fire(ExecResult::Error(failure(err)));
    }

    /// Complete the promise without a value.
    pub fn complete(&self) {
        self.fire(ExecResult::Complete);
    }

    /// Deliver a prepared result.
    pub fn accept(&self, result: ExecResult<T>) {
        self.fire(result);
    }

    fn fire(&self, result: ExecResult<T>) {
        let taken = self.state.sink.lock().take();
        match taken {
            Some(down) => down.accept(result),
            None => tracing::error!("promise already fulfilled; signal dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

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
    fn test_first_signal_wins() {
        let (down, rx) = capture::<i32>();
        let fulfiller = Fulfiller::new(down);
        fulfiller.success(1);
        fulfiller.success(2); // logged and dropped

        assert_eq!(rx.recv().unwrap().into_value(), Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_the_guard() {
        let (down, rx) = capture::<i32>();
        let fulfiller = Fulfiller::new(down);
        let other = fulfiller.clone();
        other.complete();
        fulfiller.success(3); // dropped

        assert!(rx.recv().unwrap().is_complete());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropping_unfired_fulfiller_fails_the_promise() {
        let (down, rx) = capture::<i32>();
        {
            let fulfiller = Fulfiller::new(down);
            let _clone = fulfiller.clone();
        }
        let result = rx.recv().unwrap();
        let fail = result.failure().expect("expected failure");
        assert!(fail.to_string().contains("abandoned"));
    }
}
