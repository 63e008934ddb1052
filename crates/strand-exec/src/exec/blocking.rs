//! Offloading blocking work from compute threads.

use super::execution::{run_intercepted, Execution};
use super::interceptor::ExecType;
use crate::promise::{Downstream, Promise};
use crate::result::{failure, ExecResult, Failure};
use parking_lot::{Condvar, Mutex};
use std::error::Error as StdError;
use std::sync::Arc;

/// Entry points for blocking IO.
pub struct Blocking;

impl Blocking {
    /// Run `f` on the blocking pool, resuming the current execution with
    /// its result.
    ///
    /// This is the sole entry point for blocking IO. The current segment
    /// ends when the returned promise is subscribed; `f` runs on a blocking
    /// thread (wrapped by the execution's interceptor chain, classified
    /// [`ExecType::Blocking`]); the result resumes the execution as a new
    /// segment on a compute thread.
    pub fn get<T, E, F>(f: F) -> Promise<T>
    where
        T: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Promise::of(move |down: Downstream<T>| {
            let execution = match Execution::try_current() {
                Ok(execution) => execution,
                Err(err) => return down.error(failure(err)),
            };
            if execution.controller().is_shut_down() {
                return down.error(failure(crate::ExecError::ControllerShutDown));
            }
            let bound = execution.bind_downstream(down);
            let interceptors = execution.interceptors_snapshot();
            let blocking_execution = execution.clone();
            let submitted = execution.controller().submit_blocking(Box::new(move || {
                run_intercepted(
                    blocking_execution,
                    ExecType::Blocking,
                    interceptors,
                    Box::new(move |_exec| {
                        let result: Result<T, Failure> = f().map_err(failure);
                        bound.accept(result.into());
                        Ok(())
                    }),
                );
            }));
            if !submitted {
                tracing::warn!(
                    execution = execution.id().as_u64(),
                    "blocking work rejected: controller has shut down"
                );
            }
        })
    }

    /// From a blocking thread, await a promise subscribed on the current
    /// execution.
    ///
    /// The promise's segments run on the execution's compute side while the
    /// calling blocking thread parks; the terminal result is returned here.
    /// Must be called inside a [`Blocking::get`] operation (or any code
    /// with a bound execution running off the compute pool).
    pub fn on<T: Send + 'static>(promise: Promise<T>) -> Result<ExecResult<T>, crate::ExecError> {
        let execution = Execution::try_current()?;
        let rendezvous = Arc::new((Mutex::new(None::<ExecResult<T>>), Condvar::new()));
        let delivery = rendezvous.clone();
        execution.schedule(move |_exec| {
            promise.result(move |result| {
                let (slot, signal) = &*delivery;
                *slot.lock() = Some(result);
                signal.notify_one();
            });
            Ok(())
        });
        let (slot, signal) = &*rendezvous;
        let mut guard = slot.lock();
        while guard.is_none() {
            signal.wait(&mut guard);
        }
        Ok(guard.take().expect("rendezvous slot emptied concurrently"))
    }
}
