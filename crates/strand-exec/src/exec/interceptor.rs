//! Execution interceptors.

use super::execution::Execution;

/// Classification of the segment being intercepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecType {
    /// A segment running on a compute (event-loop) thread.
    Compute,
    /// A blocking operation running on the blocking pool.
    Blocking,
}

/// The rest of the intercepted segment.
///
/// An interceptor must invoke this exactly once, synchronously or
/// asynchronously, for the segment to proceed. An interceptor that never
/// invokes it permanently stalls the execution; this is a contract
/// violation, not a recoverable error.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Intercepts every segment of an execution.
///
/// Interceptors nest: the first registered interceptor is the outermost
/// wrapper. They are used for cross-cutting concerns such as timing and
/// request-scoped diagnostics; the execution registry is available through
/// the `execution` argument for cross-segment state.
pub trait ExecInterceptor: Send + Sync {
    /// Wrap a segment of `execution`. `continuation` runs the remainder of
    /// the interceptor chain and then the segment itself.
    fn intercept(&self, execution: &Execution, exec_type: ExecType, continuation: Continuation);
}

impl<F> ExecInterceptor for F
where
    F: Fn(&Execution, ExecType, Continuation) + Send + Sync,
{
    fn intercept(&self, execution: &Execution, exec_type: ExecType, continuation: Continuation) {
        self(execution, exec_type, continuation)
    }
}
