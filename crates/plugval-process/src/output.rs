use std::fmt;
use std::time::Duration;

use plugval_utils::text::decode_output;

/// How a child process run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The child exited on its own with this code.
    Exited { code: i32 },
    /// The child was ended by a signal it did not raise through us.
    Signalled,
    /// The timeout passed and the child was killed.
    TimedOut,
    /// The output cap was reached and the child was killed.
    OutputLimitExceeded,
    /// The child could not be created.
    LaunchFailed,
    /// Waiting on the child failed; it was killed.
    WaitFailed,
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: 0 })
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited { code } => write!(f, "exited with code {code}"),
            ExitOutcome::Signalled => f.write_str("terminated by signal"),
            ExitOutcome::TimedOut => f.write_str("timed out"),
            ExitOutcome::OutputLimitExceeded => f.write_str("output limit exceeded"),
            ExitOutcome::LaunchFailed => f.write_str("failed to launch"),
            ExitOutcome::WaitFailed => f.write_str("failed to wait for exit"),
        }
    }
}

/// Result of one bounded child process run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// True iff the child exited by itself with code 0.
    pub success: bool,
    /// Captured stdout and stderr, at most `max_output_bytes` long.
    pub output: String,
    pub outcome: ExitOutcome,
    /// Whether output beyond the cap was dropped.
    pub truncated: bool,
    /// Bytes the child wrote, including dropped ones.
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub pid: Option<u32>,
}

impl ProcessOutput {
    pub(crate) fn launch_failed(message: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: message,
            outcome: ExitOutcome::LaunchFailed,
            truncated: false,
            total_bytes: 0,
            elapsed,
            pid: None,
        }
    }
}

/// Accumulates pipe chunks up to a byte cap.
#[derive(Debug)]
pub(crate) struct OutputCapture {
    buffer: Vec<u8>,
    limit: usize,
    total: u64,
}

impl OutputCapture {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            total: 0,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.limit.saturating_sub(self.buffer.len());
        let keep = room.min(chunk.len());
        self.buffer.extend_from_slice(&chunk[..keep]);
    }

    pub(crate) fn limit_reached(&self) -> bool {
        self.buffer.len() >= self.limit
    }

    pub(crate) fn truncated(&self) -> bool {
        self.total > self.buffer.len() as u64
    }

    pub(crate) fn finish(
        self,
        outcome: ExitOutcome,
        elapsed: Duration,
        pid: Option<u32>,
    ) -> ProcessOutput {
        let truncated = self.truncated();
        ProcessOutput {
            success: outcome.is_success(),
            output: decode_output(&self.buffer, self.limit),
            outcome,
            truncated,
            total_bytes: self.total,
            elapsed,
            pid,
        }
    }
}
