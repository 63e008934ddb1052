//! Executions and their segment scheduler.
//!
//! An execution owns a FIFO queue of *segments* (units of work: run a
//! continuation, or deliver a downstream signal). Whichever thread wins the
//! single-drainer claim pops and runs segments until the queue is empty, so
//! segments of one execution are totally ordered and never overlap in time
//! even when scheduled from many threads.

use super::binding::{self, BindingGuard};
use super::controller::ExecController;
use super::event_loop::EventLoopHandle;
use super::interceptor::{Continuation, ExecInterceptor, ExecType};
use super::registry::Registry;
use crate::drain::DrainQueue;
use crate::promise::Downstream;
use crate::result::Failure;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Unique identifier for an execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(u64);

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

impl ExecutionId {
    pub(crate) fn next() -> Self {
        ExecutionId(NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A user continuation: reports failure by returning `Err`, which is routed
/// to the execution's error handler.
pub(crate) type UserFn = Box<dyn FnOnce(&Execution) -> Result<(), Failure> + Send>;

/// The execution's own error handler. A failure returned from the handler
/// itself is logged and swallowed so the drain loop always terminates.
pub(crate) type ErrorHandler = Box<dyn Fn(&Execution, Failure) -> Result<(), Failure> + Send + Sync>;

pub(crate) enum Segment {
    /// User code: wrapped by the interceptor chain, failures routed to the
    /// execution's error handler.
    User(UserFn),
    /// Infrastructure bookkeeping; must not fail.
    System(Box<dyn FnOnce(&Execution) + Send>),
}

pub(crate) struct ExecState {
    id: ExecutionId,
    controller: ExecController,
    event_loop: EventLoopHandle,
    queue: DrainQueue<Segment>,
    // Execution-bound downstream signals not yet delivered. The execution is
    // complete only when the queue is empty and this is zero.
    pending: AtomicUsize,
    done: AtomicBool,
    registry: Registry,
    interceptors: parking_lot::Mutex<Arc<Vec<Arc<dyn ExecInterceptor>>>>,
    on_error: ErrorHandler,
    on_complete: parking_lot::Mutex<Vec<Box<dyn FnOnce(&Execution) + Send>>>,
}

/// A logical unit of work whose segments run strictly sequentially.
///
/// Cheap to clone; all clones refer to the same execution. Created via
/// [`ExecController::fork`](super::ExecController::fork).
#[derive(Clone)]
pub struct Execution {
    state: Arc<ExecState>,
}

impl Execution {
    pub(crate) fn new(
        controller: ExecController,
        event_loop: EventLoopHandle,
        interceptors: Vec<Arc<dyn ExecInterceptor>>,
        on_error: ErrorHandler,
        on_complete: Vec<Box<dyn FnOnce(&Execution) + Send>>,
    ) -> Self {
        Execution {
            state: Arc::new(ExecState {
                id: ExecutionId::next(),
                controller,
                event_loop,
                queue: DrainQueue::new(),
                pending: AtomicUsize::new(0),
                done: AtomicBool::new(false),
                registry: Registry::new(),
                interceptors: parking_lot::Mutex::new(Arc::new(interceptors)),
                on_error,
                on_complete: parking_lot::Mutex::new(on_complete),
            }),
        }
    }

    /// The execution bound to the current thread, if any.
    pub fn current() -> Option<Execution> {
        binding::current()
    }

    /// The execution bound to the current thread, or
    /// [`ExecError::UnmanagedThread`](crate::ExecError::UnmanagedThread).
    pub fn try_current() -> Result<Execution, crate::ExecError> {
        binding::current().ok_or(crate::ExecError::UnmanagedThread)
    }

    /// This execution's unique ID.
    pub fn id(&self) -> ExecutionId {
        self.state.id
    }

    /// The controller this execution runs under.
    pub fn controller(&self) -> &ExecController {
        &self.state.controller
    }

    /// Whether this execution has completed.
    pub fn is_complete(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    /// Whether `other` is the same execution.
    pub fn same_execution(&self, other: &Execution) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Store a value in the execution registry, replacing any previous
    /// value of the same type. The registry is released when the execution
    /// completes.
    pub fn register<V: Send + Sync + 'static>(&self, value: V) {
        self.state.registry.insert(value);
    }

    /// Look up a registry value by type.
    pub fn get<V: Send + Sync + 'static>(&self) -> Option<Arc<V>> {
        self.state.registry.get()
    }

    /// Register an interceptor scoped to the remainder of this execution,
    /// then run `f` as a new segment wrapped by it.
    pub fn add_interceptor(
        &self,
        interceptor: Arc<dyn ExecInterceptor>,
        f: impl FnOnce(&Execution) -> Result<(), Failure> + Send + 'static,
    ) {
        {
            let mut current = self.state.interceptors.lock();
            let mut list = (**current).clone();
            list.push(interceptor);
            *current = Arc::new(list);
        }
        self.schedule(f);
    }

    /// Run `f` as a new segment of this execution.
    ///
    /// Callable from any thread; the segment is queued FIFO behind any
    /// segments already scheduled. Scheduling against a completed execution
    /// is a contract violation: the segment is dropped and an error logged.
    pub fn schedule(&self, f: impl FnOnce(&Execution) -> Result<(), Failure> + Send + 'static) {
        if self.is_complete() {
            tracing::error!(
                execution = self.state.id.as_u64(),
                "segment scheduled against completed execution; dropped"
            );
            return;
        }
        self.state.queue.push(Segment::User(Box::new(f)));
        self.drain();
    }

    /// Prevent this execution from completing while the returned guard is
    /// alive.
    ///
    /// Used by signal sources that deliver segments from outside the
    /// execution (stream subscriptions, external event bridges): between
    /// deliveries the segment queue is empty, and without a hold the
    /// execution would be considered finished.
    pub fn hold(&self) -> ExecutionHold {
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        ExecutionHold {
            execution: self.clone(),
        }
    }

    /// Register a callback to run when this execution completes.
    pub fn on_complete(&self, f: impl FnOnce(&Execution) + Send + 'static) {
        if self.is_complete() {
            f(self);
            return;
        }
        self.state.on_complete.lock().push(Box::new(f));
    }

    /// Wrap `downstream` so its signal is delivered as a new segment of
    /// this execution, whichever thread it is fired from. The execution is
    /// kept alive until the signal is delivered.
    pub(crate) fn bind_downstream<T: Send + 'static>(
        &self,
        downstream: Downstream<T>,
    ) -> Downstream<T> {
        if self.is_complete() {
            tracing::error!(
                execution = self.state.id.as_u64(),
                "downstream bound to completed execution; its signal will be dropped"
            );
            return Downstream::new(|_| {
                tracing::error!("signal for completed execution dropped");
            });
        }
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let execution = self.clone();
        Downstream::new(move |result| {
            execution
                .state
                .queue
                .push(Segment::User(Box::new(move |_exec| {
                    downstream.accept(result);
                    Ok(())
                })));
            // Order matters: the queue must be non-empty before pending
            // drops, so a racing completion check never sees both clear.
            execution.state.pending.fetch_sub(1, Ordering::SeqCst);
            execution.drain();
        })
    }

    pub(crate) fn interceptors_snapshot(&self) -> Arc<Vec<Arc<dyn ExecInterceptor>>> {
        self.state.interceptors.lock().clone()
    }

    /// Route a failure that escaped a segment to the execution's error
    /// handler.
    pub(crate) fn route_error(&self, failure: Failure) {
        if let Err(handler_failure) = (self.state.on_error)(self, failure) {
            tracing::error!(
                execution = self.state.id.as_u64(),
                error = %handler_failure,
                "execution error handler failed; failure swallowed"
            );
        }
    }

    /// Drain the segment queue, claiming the sole-drainer role if the
    /// current thread may run segments, otherwise handing off to the
    /// execution's event loop.
    pub(crate) fn drain(&self) {
        if self.is_complete() {
            return;
        }
        match binding::current() {
            Some(bound) if bound.same_execution(self) => {
                // A running drain (this thread's, during a compute segment,
                // or another's) will observe the newly pushed segments. A
                // thread bound inside a blocking segment holds no drain
                // claim, so hand off to the event loop instead of nesting.
                if !self.state.queue.is_draining() {
                    self.schedule_drain();
                }
                return;
            }
            // Another execution's segment is running here; never nest.
            Some(_) => {
                self.schedule_drain();
                return;
            }
            None => {}
        }
        if binding::is_managed() {
            self.drain_now();
        } else {
            self.schedule_drain();
        }
    }

    fn schedule_drain(&self) {
        let execution = self.clone();
        let accepted = self
            .state
            .event_loop
            .execute(Box::new(move || execution.drain()));
        if !accepted {
            tracing::warn!(
                execution = self.state.id.as_u64(),
                "drain dropped: controller has shut down"
            );
        }
    }

    fn drain_now(&self) {
        let performed = self.state.queue.drain(|segment| self.run_segment(segment));
        if performed {
            self.check_done();
        }
    }

    fn run_segment(&self, segment: Segment) {
        let execution = self.clone();
        match segment {
            Segment::System(f) => {
                let _guard = BindingGuard::bind(execution.clone());
                f(&execution);
            }
            Segment::User(f) => {
                let interceptors = self.interceptors_snapshot();
                run_intercepted(execution, ExecType::Compute, interceptors, f);
            }
        }
    }

    fn check_done(&self) {
        if !self.state.queue.is_empty() || self.state.pending.load(Ordering::SeqCst) != 0 {
            return;
        }
        if self
            .state
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let callbacks = mem::take(&mut *self.state.on_complete.lock());
            for callback in callbacks {
                callback(self);
            }
            self.state.registry.clear();
        }
    }
}

/// Guard returned by [`Execution::hold`]; releasing it re-checks completion.
pub struct ExecutionHold {
    execution: Execution,
}

impl Drop for ExecutionHold {
    fn drop(&mut self) {
        self.execution.state.pending.fetch_sub(1, Ordering::SeqCst);
        // Force a drain so an otherwise idle execution notices it is done.
        self.execution.drain();
    }
}

/// Run a user continuation wrapped by the execution's interceptor chain.
///
/// The innermost continuation binds the execution to the running thread and
/// routes any failure to the error handler, so interceptors that defer the
/// continuation to another thread still observe the full contract.
pub(crate) fn run_intercepted(
    execution: Execution,
    exec_type: ExecType,
    interceptors: Arc<Vec<Arc<dyn ExecInterceptor>>>,
    f: UserFn,
) {
    let innermost: Continuation = {
        let execution = execution.clone();
        Box::new(move || {
            let _guard = BindingGuard::bind(execution.clone());
            if let Err(failure) = f(&execution) {
                execution.route_error(failure);
            }
        })
    };
    intercept_chain(execution, exec_type, interceptors, 0, innermost);
}

fn intercept_chain(
    execution: Execution,
    exec_type: ExecType,
    chain: Arc<Vec<Arc<dyn ExecInterceptor>>>,
    index: usize,
    continuation: Continuation,
) {
    match chain.get(index).cloned() {
        Some(interceptor) => {
            let next_execution = execution.clone();
            let next: Continuation = Box::new(move || {
                intercept_chain(next_execution, exec_type, chain, index + 1, continuation)
            });
            interceptor.intercept(&execution, exec_type, next);
        }
        None => continuation(),
    }
}
