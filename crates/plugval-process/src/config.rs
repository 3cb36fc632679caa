use std::time::Duration;

/// Output cap applied when none is configured.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wall-clock limit before the child is killed.
    pub timeout: Duration,
    /// Maximum number of output bytes kept. Later bytes are read and discarded.
    pub max_output_bytes: usize,
    /// Granularity of exit and timeout checks.
    pub poll_interval: Duration,
    /// Size of a single read from the output pipe.
    pub read_chunk_size: usize,
    /// How long to keep draining the pipe after the child has exited.
    pub drain_grace: Duration,
    /// Kill the child as soon as the output cap is reached.
    pub kill_on_output_limit: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            poll_interval: Duration::from_millis(1),
            read_chunk_size: 4096,
            drain_grace: Duration::from_millis(50),
            kill_on_output_limit: false,
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_kill_on_output_limit(mut self, kill: bool) -> Self {
        self.kill_on_output_limit = kill;
        self
    }
}
