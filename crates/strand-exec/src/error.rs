//! Contract errors raised by the execution core.

use thiserror::Error;

/// Errors indicating misuse of the execution core.
///
/// These are programming errors in calling code, not runtime conditions;
/// no attempt is made to recover from them gracefully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The current thread has no bound execution.
    ///
    /// Raised when an operation that must run inside an execution (such as
    /// subscribing a promise or offloading blocking work) is invoked from a
    /// thread that is not currently draining an execution.
    #[error("current thread is not managed by an execution controller")]
    UnmanagedThread,

    /// Work was scheduled against an execution that has already completed.
    ///
    /// Typically caused by using a promise from a completion callback.
    #[error("execution has completed (a promise may be in use from a cleanup callback)")]
    ExecutionComplete,

    /// The controller has been shut down and no longer accepts work.
    #[error("execution controller has been shut down")]
    ControllerShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ExecError::UnmanagedThread.to_string(),
            "current thread is not managed by an execution controller"
        );
        assert!(ExecError::ExecutionComplete.to_string().contains("completed"));
        assert!(ExecError::ControllerShutDown.to_string().contains("shut down"));
    }
}
