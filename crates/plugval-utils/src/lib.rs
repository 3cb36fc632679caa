//! Shared utilities for the plugval workspace.

pub mod profiling;
pub mod text;
pub mod time;

pub use profiling::SpanTimer;
pub use text::truncate_utf8;
pub use time::{format_duration_ms, Deadline};

/// Convenience type alias for wall-clock timestamps expressed in milliseconds since the Unix epoch.
pub type EpochMillis = i64;
