//! Managed background worker threads with cooperative stop and restart.
//!
//! A [`ManagedThread`] owns at most one OS thread at a time. Its task is a
//! zero-argument closure that is re-run on every [`ManagedThread::start`].
//! Stopping is cooperative: [`ManagedThread::stop`] clears a flag and joins,
//! so a task that never polls its [`StopSignal`] is not guaranteed to honour
//! a stop request promptly.

mod error;
mod main_thread;
mod managed;

pub use error::ThreadError;
pub use main_thread::{is_main_thread, main_thread_set, set_as_main_thread};
pub use managed::{ManagedThread, StopSignal, Task, ThreadState};
