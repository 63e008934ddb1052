//! Blocking entry points for driving executions from plain threads.
//!
//! Primarily test tooling: a harness forks an execution, waits on the
//! calling thread for its outcome, and shuts its controller down when
//! dropped. Production servers drive executions from their own event
//! sources instead.

use crate::exec::{ExecController, Execution};
use crate::promise::Promise;
use crate::result::{failure, ExecResult, Failure};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

const WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Raised when a harness wait exceeds its limit, indicating a hung
/// execution (for example a fulfiller that was never fired and never
/// dropped).
#[derive(Debug, thiserror::Error)]
#[error("execution did not produce a result within {WAIT_LIMIT:?}")]
pub struct HarnessTimeout;

/// Drives promise-producing functions to completion from the calling
/// thread.
pub struct ExecHarness {
    controller: ExecController,
}

impl ExecHarness {
    /// A harness with a small dedicated controller.
    pub fn new() -> Self {
        ExecHarness {
            controller: ExecController::builder()
                .num_threads(2)
                .blocking_threads(4)
                .build(),
        }
    }

    /// A harness over an existing controller. The controller is still shut
    /// down when the harness drops.
    pub fn with_controller(controller: ExecController) -> Self {
        ExecHarness { controller }
    }

    /// The underlying controller.
    pub fn controller(&self) -> &ExecController {
        &self.controller
    }

    /// Fork an execution, subscribe the promise produced by `f`, and block
    /// until its terminal signal arrives.
    pub fn yield_promise<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Execution) -> Promise<T> + Send + 'static,
    ) -> ExecResult<T> {
        let rendezvous = Arc::new((Mutex::new(None::<ExecResult<T>>), Condvar::new()));
        let on_error = rendezvous.clone();
        let delivery = rendezvous.clone();
        self.controller
            .fork()
            .on_error(move |_execution, fail| {
                deliver(&on_error, ExecResult::Error(fail));
                Ok(())
            })
            .start(move |execution| {
                f(execution).result(move |result| deliver(&delivery, result));
                Ok(())
            });
        self.wait(&rendezvous)
    }

    /// Fork an execution running `action` and block until the execution
    /// completes. Returns the first unhandled failure, if any.
    pub fn run(
        &self,
        action: impl FnOnce(&Execution) -> Result<(), Failure> + Send + 'static,
    ) -> Result<(), Failure> {
        let rendezvous = Arc::new((Mutex::new(None::<ExecResult<()>>), Condvar::new()));
        let on_error = rendezvous.clone();
        let on_complete = rendezvous.clone();
        self.controller
            .fork()
            .on_error(move |_execution, fail| {
                deliver(&on_error, ExecResult::Error(fail));
                Ok(())
            })
            .on_complete(move |_execution| deliver(&on_complete, ExecResult::Success(())))
            .start(action);
        match self.wait(&rendezvous) {
            ExecResult::Error(fail) => Err(fail),
            _ => Ok(()),
        }
    }

    /// One-shot convenience: spin a harness, yield one promise, shut down.
    pub fn yield_single<T: Send + 'static>(
        f: impl FnOnce(&Execution) -> Promise<T> + Send + 'static,
    ) -> ExecResult<T> {
        ExecHarness::new().yield_promise(f)
    }

    /// One-shot convenience: spin a harness, run one execution, shut down.
    pub fn run_single(
        action: impl FnOnce(&Execution) -> Result<(), Failure> + Send + 'static,
    ) -> Result<(), Failure> {
        ExecHarness::new().run(action)
    }

    fn wait<T: Send + 'static>(
        &self,
        rendezvous: &Arc<(Mutex<Option<ExecResult<T>>>, Condvar)>,
    ) -> ExecResult<T> {
        let (slot, signal) = &**rendezvous;
        let mut guard = slot.lock();
        while guard.is_none() {
            if signal.wait_for(&mut guard, WAIT_LIMIT).timed_out() && guard.is_none() {
                return ExecResult::Error(failure(HarnessTimeout));
            }
        }
        guard.take().expect("rendezvous slot emptied concurrently")
    }
}

impl Default for ExecHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecHarness {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

fn deliver<T>(rendezvous: &Arc<(Mutex<Option<T>>, Condvar)>, value: T) {
    let (slot, signal) = &**rendezvous;
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(value);
        signal.notify_all();
    }
}
