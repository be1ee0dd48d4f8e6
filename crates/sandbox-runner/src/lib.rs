//! Action execution for the sandbox session runtime.
//!
//! Provides:
//! - `ActionRunner` - the single-flight command state machine
//! - `Executor` trait + `ShellExecutor` - the process boundary seam

pub mod executor;
pub mod runner;

pub use executor::{ExecOutcome, Executor, ExecutorError, OutputSink, ShellExecutor};
pub use runner::{ActionRunner, RunnerError};
