//! Bounded, timeout-aware child process execution.
//!
//! [`ProcessRunner::run`] launches a program with stdout and stderr merged
//! into one pipe, keeps at most `max_output_bytes` of what it prints, kills
//! it once the timeout passes and reports success iff it exited with code 0.

mod config;
mod error;
mod output;
mod pump;
mod request;
mod runner;

pub use config::{RunnerConfig, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
pub use error::ProcessError;
pub use output::{ExitOutcome, ProcessOutput};
pub use request::ProcessRequest;
pub use runner::{spawn_child_process, ProcessRunner, RunningProcess};
