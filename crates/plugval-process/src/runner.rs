use std::io;
use std::process::{Child, ExitStatus, Stdio};
use std::time::Duration;

use plugval_utils::{format_duration_ms, Deadline, SpanTimer};

use crate::config::RunnerConfig;
use crate::error::ProcessError;
use crate::output::{ExitOutcome, OutputCapture, ProcessOutput};
use crate::pump::OutputPump;
use crate::request::ProcessRequest;

/// Launches child processes under a [`RunnerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Starts `request` with stdout and stderr merged into one pipe.
    pub fn spawn(&self, request: &ProcessRequest) -> Result<RunningProcess, ProcessError> {
        let deadline = Deadline::after(self.config.timeout);
        let (reader, writer) = os_pipe::pipe().map_err(ProcessError::Pipe)?;
        let child = {
            let stderr_writer = writer.try_clone().map_err(ProcessError::Pipe)?;
            let mut command = request.command();
            command
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer);
            // Dropping `command` closes our copies of the write end.
            command.spawn().map_err(|source| ProcessError::Launch {
                program: request.program.clone(),
                source,
            })?
        };
        tracing::debug!(program = %request.program, pid = child.id(), "spawned child process");

        let mut running = RunningProcess {
            child,
            pump: None,
            config: self.config.clone(),
            deadline,
            status: None,
        };
        match OutputPump::spawn(reader, self.config.read_chunk_size) {
            Ok(pump) => running.pump = Some(pump),
            Err(err) => {
                running.kill_and_reap();
                return Err(ProcessError::Reader(err));
            }
        }
        Ok(running)
    }

    /// Runs `request` to completion, timeout or output-cap kill.
    ///
    /// Never fails: launch errors come back as `success == false` with the
    /// OS error text as output.
    pub fn run(&self, request: &ProcessRequest) -> ProcessOutput {
        let span = SpanTimer::new("process-run");
        let result = match self.spawn(request) {
            Ok(running) => running.wait(),
            Err(err) => {
                tracing::debug!(program = %request.program, "launch failed: {err}");
                ProcessOutput::launch_failed(err.to_string(), span.elapsed())
            }
        };
        span.finish();
        result
    }

    /// Runs `command` with a whitespace-separated argument string.
    pub fn run_line(&self, command: &str, arguments: &str) -> ProcessOutput {
        self.run(&ProcessRequest::from_line(command, arguments))
    }
}

/// Runs `command` with `arguments` and the default output cap, returning
/// whether it exited with code 0 together with everything it printed.
pub fn spawn_child_process(command: &str, arguments: &str, timeout_ms: u64) -> (bool, String) {
    let config = RunnerConfig::default().with_timeout(Duration::from_millis(timeout_ms));
    let output = ProcessRunner::new(config).run_line(command, arguments);
    (output.success, output.output)
}

/// A launched child whose output is being captured.
///
/// Dropping it kills and reaps the child if it is still running.
pub struct RunningProcess {
    child: Child,
    pump: Option<OutputPump>,
    config: RunnerConfig,
    deadline: Deadline,
    status: Option<ExitStatus>,
}

impl RunningProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Forcibly ends the child and waits for it to be reaped.
    ///
    /// Unlike a cooperative stop the child gets no chance to clean up.
    pub fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        if let Err(err) = self.child.kill() {
            // Already exited between the last poll and now.
            tracing::debug!(pid = self.child.id(), "kill failed: {err}");
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    fn kill_and_reap(&mut self) {
        if let Err(err) = self.terminate() {
            tracing::warn!(pid = self.child.id(), "failed to reap child: {err}");
        }
    }

    /// Polls the child until it exits, the timeout passes, or the output cap
    /// forces a kill, capturing output along the way.
    pub fn wait(mut self) -> ProcessOutput {
        let mut capture = OutputCapture::new(self.config.max_output_bytes);
        let Some(mut pump) = self.pump.take() else {
            self.kill_and_reap();
            let elapsed = self.deadline.elapsed();
            return capture.finish(ExitOutcome::WaitFailed, elapsed, Some(self.pid()));
        };

        let outcome = loop {
            match self.try_status() {
                Ok(Some(status)) => {
                    pump.drain(&mut capture, self.config.drain_grace);
                    break exit_outcome(status);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(pid = self.pid(), "failed to poll child: {err}");
                    self.kill_and_reap();
                    pump.collect_ready(&mut capture);
                    break ExitOutcome::WaitFailed;
                }
            }

            pump.collect(&mut capture, self.config.poll_interval);

            if capture.limit_reached() && self.config.kill_on_output_limit {
                if let Ok(Some(status)) = self.try_status() {
                    pump.drain(&mut capture, self.config.drain_grace);
                    break exit_outcome(status);
                }
                tracing::debug!(pid = self.pid(), "output limit reached, killing child");
                self.kill_and_reap();
                break ExitOutcome::OutputLimitExceeded;
            }

            if self.deadline.expired() {
                if let Ok(Some(status)) = self.try_status() {
                    pump.drain(&mut capture, self.config.drain_grace);
                    break exit_outcome(status);
                }
                tracing::warn!(
                    pid = self.pid(),
                    timeout = %format_duration_ms(self.config.timeout),
                    "child process timed out"
                );
                self.kill_and_reap();
                pump.collect_ready(&mut capture);
                break ExitOutcome::TimedOut;
            }
        };

        let elapsed = self.deadline.elapsed();
        tracing::debug!(
            pid = self.pid(),
            %outcome,
            elapsed = %format_duration_ms(elapsed),
            "child process finished"
        );
        pump.finish();
        capture.finish(outcome, elapsed, Some(self.pid()))
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.kill_and_reap();
        }
    }
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    match status.code() {
        Some(code) => ExitOutcome::Exited { code },
        None => ExitOutcome::Signalled,
    }
}
