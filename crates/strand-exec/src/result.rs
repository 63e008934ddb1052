//! Results of asynchronous operations.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Shared failure value carried by failed results.
///
/// Failures are reference counted so that a cached promise can replay the
/// same failure to any number of subscribers.
pub type Failure = Arc<dyn StdError + Send + Sync + 'static>;

/// Convert any error into a [`Failure`].
pub fn failure<E: StdError + Send + Sync + 'static>(err: E) -> Failure {
    Arc::new(err)
}

/// Outcome of an execution-bound asynchronous operation.
///
/// Exactly one variant is ever observed per subscription: a value, a
/// failure, or completion without a value. The latter means the execution
/// ended before a value was produced, because the value was routed away or
/// consumed upstream (see [`Promise::route`](crate::Promise::route)).
#[derive(Clone)]
pub enum ExecResult<T> {
    /// The operation produced a value.
    Success(T),
    /// The operation failed.
    Error(Failure),
    /// The execution ended before a value was produced.
    Complete,
}

impl<T> ExecResult<T> {
    /// Whether this result carries a value.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecResult::Success(_))
    }

    /// Whether this result carries a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, ExecResult::Error(_))
    }

    /// Whether the execution completed without producing a value.
    pub fn is_complete(&self) -> bool {
        matches!(self, ExecResult::Complete)
    }

    /// The value, if present.
    pub fn value(&self) -> Option<&T> {
        match self {
            ExecResult::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The value, consuming the result.
    pub fn into_value(self) -> Option<T> {
        match self {
            ExecResult::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if present.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ExecResult::Error(failure) => Some(failure),
            _ => None,
        }
    }

    /// Convert into a plain `Result`, mapping [`ExecResult::Complete`] to `None`.
    pub fn into_result(self) -> Option<Result<T, Failure>> {
        match self {
            ExecResult::Success(value) => Some(Ok(value)),
            ExecResult::Error(failure) => Some(Err(failure)),
            ExecResult::Complete => None,
        }
    }
}

impl<T> From<Result<T, Failure>> for ExecResult<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(value) => ExecResult::Success(value),
            Err(failure) => ExecResult::Error(failure),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ExecResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecResult::Success(value) => f.debug_tuple("Success").field(value).finish(),
            ExecResult::Error(failure) => f.debug_tuple("Error").field(failure).finish(),
            ExecResult::Complete => f.write_str("Complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_success_accessors() {
        let result = ExecResult::Success(42);
        assert!(result.is_success());
        assert!(!result.is_error());
        assert!(!result.is_complete());
        assert_eq!(result.value(), Some(&42));
        assert_eq!(result.into_value(), Some(42));
    }

    #[test]
    fn test_error_accessors() {
        let result: ExecResult<i32> = ExecResult::Error(failure(Boom));
        assert!(result.is_error());
        assert!(result.failure().is_some());
        assert_eq!(result.value(), None);
        assert!(matches!(result.into_result(), Some(Err(_))));
    }

    #[test]
    fn test_complete_accessors() {
        let result: ExecResult<i32> = ExecResult::Complete;
        assert!(result.is_complete());
        assert_eq!(result.value(), None);
        assert!(result.into_result().is_none());
    }

    #[test]
    fn test_from_std_result() {
        let ok: ExecResult<i32> = Ok(1).into();
        assert!(ok.is_success());

        let err: ExecResult<i32> = Err(failure(Boom)).into();
        assert!(err.is_error());
    }

    #[test]
    fn test_clone_replays_same_failure() {
        let result: ExecResult<i32> = ExecResult::Error(failure(Boom));
        let copy = result.clone();
        let a = result.failure().unwrap();
        let b = copy.failure().unwrap();
        assert!(Arc::ptr_eq(a, b));
    }
}
