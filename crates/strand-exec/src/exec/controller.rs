//! The execution controller: owns the compute and blocking pools.

use super::blocking_pool::BlockingPool;
use super::event_loop::{EventLoopHandle, EventLoopPool, Job};
use super::interceptor::ExecInterceptor;
use super::spec::ExecStarter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct ControllerState {
    compute: EventLoopPool,
    blocking: BlockingPool,
    interceptors: Vec<Arc<dyn ExecInterceptor>>,
    next_loop: AtomicUsize,
    down: AtomicBool,
}

/// Owns the thread pools and forks executions.
///
/// Cheap to clone; all clones refer to the same controller. The pools shut
/// down when [`ExecController::shutdown`] is called or the last handle is
/// dropped.
#[derive(Clone)]
pub struct ExecController {
    state: Arc<ControllerState>,
}

impl ExecController {
    /// Create a controller with default pool sizes.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a controller.
    pub fn builder() -> ExecControllerBuilder {
        ExecControllerBuilder {
            compute_threads: 0,
            blocking_threads: 0,
            interceptors: Vec::new(),
        }
    }

    /// Begin a new execution. See [`ExecStarter`].
    pub fn fork(&self) -> ExecStarter {
        ExecStarter::new(self.clone())
    }

    /// Number of compute (event-loop) threads.
    pub fn compute_threads(&self) -> usize {
        self.state.compute.len()
    }

    /// Number of blocking threads.
    pub fn blocking_threads(&self) -> usize {
        self.state.blocking.len()
    }

    /// Whether [`shutdown`](ExecController::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.state.down.load(Ordering::SeqCst)
    }

    /// Stop accepting work and shut the pools down.
    ///
    /// Queued work is allowed to finish; work submitted afterwards is
    /// rejected. Idempotent.
    pub fn shutdown(&self) {
        if self.state.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.compute.shutdown();
        self.state.blocking.shutdown();
    }

    pub(crate) fn next_event_loop(&self) -> EventLoopHandle {
        let index = self.state.next_loop.fetch_add(1, Ordering::Relaxed);
        self.state.compute.handle(index)
    }

    pub(crate) fn event_loop(&self, index: usize) -> EventLoopHandle {
        self.state.compute.handle(index)
    }

    pub(crate) fn submit_blocking(&self, job: Job) -> bool {
        !self.state.down.load(Ordering::SeqCst) && self.state.blocking.submit(job)
    }

    pub(crate) fn global_interceptors(&self) -> Vec<Arc<dyn ExecInterceptor>> {
        self.state.interceptors.clone()
    }
}

impl Default for ExecController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ControllerState {
    fn drop(&mut self) {
        if !self.down.swap(true, Ordering::SeqCst) {
            self.compute.shutdown();
            self.blocking.shutdown();
        }
    }
}

/// Builder for [`ExecController`].
pub struct ExecControllerBuilder {
    compute_threads: usize,
    blocking_threads: usize,
    interceptors: Vec<Arc<dyn ExecInterceptor>>,
}

impl ExecControllerBuilder {
    /// Number of compute threads. `0` (the default) means one per CPU core.
    pub fn num_threads(mut self, count: usize) -> Self {
        self.compute_threads = count;
        self
    }

    /// Number of blocking threads. `0` (the default) means four per CPU
    /// core, reflecting that blocking work parks rather than computes.
    pub fn blocking_threads(mut self, count: usize) -> Self {
        self.blocking_threads = count;
        self
    }

    /// Add an interceptor applied to every execution forked from this
    /// controller.
    pub fn interceptor(mut self, interceptor: Arc<dyn ExecInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Spawn the pools and produce the controller.
    pub fn build(self) -> ExecController {
        let compute = if self.compute_threads == 0 {
            num_cpus::get()
        } else {
            self.compute_threads
        };
        let blocking = if self.blocking_threads == 0 {
            num_cpus::get() * 4
        } else {
            self.blocking_threads
        };
        ExecController {
            state: Arc::new(ControllerState {
                compute: EventLoopPool::new(compute),
                blocking: BlockingPool::new(blocking),
                interceptors: self.interceptors,
                next_loop: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let controller = ExecController::builder()
            .num_threads(2)
            .blocking_threads(3)
            .build();
        assert_eq!(controller.compute_threads(), 2);
        assert_eq!(controller.blocking_threads(), 3);
        controller.shutdown();
    }

    #[test]
    fn test_default_sizes_track_cpus() {
        let controller = ExecController::new();
        assert_eq!(controller.compute_threads(), num_cpus::get());
        assert_eq!(controller.blocking_threads(), num_cpus::get() * 4);
        controller.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let controller = ExecController::builder().num_threads(1).build();
        controller.shutdown();
        controller.shutdown();
    }

    #[test]
    fn test_submit_blocking_rejected_after_shutdown() {
        let controller = ExecController::builder()
            .num_threads(1)
            .blocking_threads(1)
            .build();
        controller.shutdown();
        assert!(!controller.submit_blocking(Box::new(|| {})));
    }
}
