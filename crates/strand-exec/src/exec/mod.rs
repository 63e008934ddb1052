//! Execution scheduling: controllers, event loops, executions, blocking.
//!
//! An [`ExecController`] owns a small pool of compute (event-loop) threads
//! and a larger pool of blocking threads. Work is organised into
//! *executions*: logical units whose segments run strictly sequentially,
//! possibly across different physical threads, until the execution
//! completes. [`Blocking`] is the sole entry point for offloading blocking
//! IO from a compute thread.

mod binding;
mod blocking;
mod blocking_pool;
mod controller;
mod event_loop;
mod execution;
mod interceptor;
mod registry;
mod spec;

pub use blocking::Blocking;
pub use controller::{ExecController, ExecControllerBuilder};
pub use execution::{Execution, ExecutionHold, ExecutionId};
pub use interceptor::{Continuation, ExecInterceptor, ExecType};
pub use spec::ExecStarter;
