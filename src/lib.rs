//! Fan out independent async jobs on an isolated worker thread and get
//! their results back in submission order.
//!
//! [`Executor`] is the public entry point: submit closures that return
//! futures, then call [`Executor::results`]. The batch runs on a dedicated
//! thread with its own single-threaded tokio runtime ([`crate::core::Runner`]), so
//! the caller's own runtime, if any, is never re-entered.

// Core modules
pub mod config;
pub mod core;
pub mod error;
mod executor;
pub mod progress;


// Re-export key types
pub use config::ExecutorConfig;
pub use crate::core::{JobIndex, JobOutcome, PendingJob, ResultRecord, RunOutcome};
pub use error::{ExecutorError, ExecutorResult, JobError, JobErrorKind};
pub use executor::Executor;
pub use progress::{NoProgress, ProgressSink, ProgressSpec, TracingProgress};
