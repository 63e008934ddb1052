//! Forking new executions.

use super::controller::ExecController;
use super::execution::{ErrorHandler, Execution};
use crate::result::Failure;

/// Configures and starts a new execution.
///
/// Obtained from [`ExecController::fork`]. The started action is the
/// execution's initial segment; the execution completes when its segment
/// queue drains and no asynchronous work remains outstanding.
pub struct ExecStarter {
    controller: ExecController,
    event_loop: Option<usize>,
    on_error: ErrorHandler,
    on_start: Vec<Box<dyn FnOnce(&Execution) + Send>>,
    on_complete: Vec<Box<dyn FnOnce(&Execution) + Send>>,
}

impl ExecStarter {
    pub(crate) fn new(controller: ExecController) -> Self {
        ExecStarter {
            controller,
            event_loop: None,
            // Unhandled failures terminate the execution with a logged error.
            on_error: Box::new(|execution, failure| {
                tracing::error!(
                    execution = execution.id().as_u64(),
                    error = %failure,
                    "unhandled error in execution"
                );
                Ok(())
            }),
            on_start: Vec::new(),
            on_complete: Vec::new(),
        }
    }

    /// Set the handler for failures that reach the execution unhandled.
    ///
    /// If the handler itself returns `Err`, that failure is logged and
    /// swallowed; the drain loop always terminates.
    pub fn on_error(
        mut self,
        handler: impl Fn(&Execution, Failure) -> Result<(), Failure> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Box::new(handler);
        self
    }

    /// Run `f` on the forking thread before the initial segment is queued.
    pub fn on_start(mut self, f: impl FnOnce(&Execution) + Send + 'static) -> Self {
        self.on_start.push(Box::new(f));
        self
    }

    /// Run `f` when the execution completes.
    pub fn on_complete(mut self, f: impl FnOnce(&Execution) + Send + 'static) -> Self {
        self.on_complete.push(Box::new(f));
        self
    }

    /// Store `value` in the execution's registry before it starts.
    pub fn register<V: Send + Sync + 'static>(self, value: V) -> Self {
        self.on_start(move |execution| execution.register(value))
    }

    /// Pin the execution to a specific event loop instead of the default
    /// round-robin assignment.
    pub fn event_loop(mut self, index: usize) -> Self {
        self.event_loop = Some(index);
        self
    }

    /// Start the execution with `action` as its initial segment.
    pub fn start(
        self,
        action: impl FnOnce(&Execution) -> Result<(), Failure> + Send + 'static,
    ) -> Execution {
        let event_loop = match self.event_loop {
            Some(index) => self.controller.event_loop(index),
            None => self.controller.next_event_loop(),
        };
        let execution = Execution::new(
            self.controller.clone(),
            event_loop,
            self.controller.global_interceptors(),
            self.on_error,
            self.on_complete,
        );
        for f in self.on_start {
            f(&execution);
        }
        execution.schedule(action);
        execution
    }
}
