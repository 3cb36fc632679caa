//! Helpers for wall-clock timestamps, deadlines and duration formatting.

use std::fmt::{self, Write as _};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};

use crate::EpochMillis;

/// Current local wall-clock time.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Milliseconds since the Unix epoch.
pub fn milliseconds() -> EpochMillis {
    now().timestamp_millis()
}

/// Formats `time` with a strftime-style `format` string.
///
/// An empty format yields an empty string. A format containing an unknown
/// specifier also yields an empty string instead of panicking.
pub fn format_time<Tz>(time: &DateTime<Tz>, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let mut out = String::new();
    if write!(out, "{}", time.format(format)).is_err() {
        tracing::debug!(format, "rejected time format string");
        return String::new();
    }
    out
}

/// Renders a duration as `"<n> ms"` below one second and `"<s.sss> s"` above.
pub fn format_duration_ms(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis} ms")
    } else {
        format!("{:.3} s", duration.as_secs_f64())
    }
}

/// A point in monotonic time after which an operation gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Starts a deadline that expires `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// The expiry point, or `None` when it lies beyond what `Instant` can hold.
    pub fn instant(&self) -> Option<Instant> {
        self.start.checked_add(self.limit)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// True once more than `limit` has passed since the deadline was started.
    pub fn expired(&self) -> bool {
        self.elapsed() > self.limit
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }
}
