//! Strand Execution Core
//!
//! This crate provides the cooperative execution machinery of a
//! request-processing server:
//! - **Executions**: logical units of work whose segments run strictly
//!   sequentially while hopping between a small compute (event-loop) pool
//!   and a blocking pool (`exec` module)
//! - **Promises**: lazy, single-subscription, composable handles to
//!   asynchronously computed values (`promise` module)
//! - **Operations**: value-less asynchronous work with sequential
//!   composition (`promise::operation`)
//! - **Throttles**: bounded-concurrency gates with FIFO queuing
//!   (`promise::throttle`)
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_exec::{Blocking, ExecHarness};
//!
//! let result = ExecHarness::yield_single(|_exec| {
//!     Blocking::get(|| Ok(load_from_disk()))
//!         .map(|text| text.to_uppercase())
//! });
//! assert!(result.is_success());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod drain;
mod error;
pub mod exec;
pub mod harness;
pub mod promise;
mod result;

pub use error::ExecError;
pub use exec::{
    Blocking, Continuation, ExecController, ExecControllerBuilder, ExecInterceptor, ExecStarter,
    ExecType, Execution, ExecutionHold, ExecutionId,
};
pub use harness::{ExecHarness, HarnessTimeout};
pub use promise::{
    AbandonedError, CachedPromise, Downstream, Fulfiller, Operation, Promise, Release, Throttle,
    Upstream,
};
pub use result::{failure, ExecResult, Failure};
