//! Background reader moving bytes from the merged output pipe into a channel.

use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use os_pipe::PipeReader;

use crate::output::OutputCapture;

/// Chunks buffered between the reader thread and the runner.
const CHANNEL_DEPTH: usize = 64;

pub(crate) struct OutputPump {
    chunks: Receiver<Vec<u8>>,
    worker: Option<JoinHandle<()>>,
    disconnected: bool,
}

impl OutputPump {
    pub(crate) fn spawn(mut reader: PipeReader, chunk_size: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_DEPTH);
        let worker = thread::Builder::new()
            .name("plugval-output-pump".into())
            .spawn(move || {
                let mut buffer = vec![0u8; chunk_size.max(1)];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(count) => {
                            if tx.send(buffer[..count].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            tracing::debug!("output pipe read failed: {err}");
                            break;
                        }
                    }
                }
            })?;
        Ok(Self {
            chunks: rx,
            worker: Some(worker),
            disconnected: false,
        })
    }

    /// Waits up to `wait` for output, then takes whatever else is already queued.
    pub(crate) fn collect(&mut self, capture: &mut OutputCapture, wait: Duration) {
        if self.disconnected {
            thread::sleep(wait);
            return;
        }
        match self.chunks.recv_timeout(wait) {
            Ok(chunk) => capture.push(&chunk),
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => {
                self.disconnected = true;
                return;
            }
        }
        self.collect_ready(capture);
    }

    /// Takes queued chunks without blocking. Bounded so a fast writer cannot starve the caller.
    pub(crate) fn collect_ready(&mut self, capture: &mut OutputCapture) {
        for _ in 0..CHANNEL_DEPTH {
            match self.chunks.try_recv() {
                Ok(chunk) => capture.push(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    /// Reads until the pipe closes or `grace` passes.
    pub(crate) fn drain(&mut self, capture: &mut OutputCapture, grace: Duration) {
        let until = Instant::now().checked_add(grace);
        while !self.disconnected {
            let received = match until {
                Some(until) => self.chunks.recv_deadline(until),
                None => self
                    .chunks
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(chunk) => capture.push(&chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.disconnected = true,
            }
        }
    }

    /// Joins the reader if the pipe has closed, otherwise leaves it detached.
    pub(crate) fn finish(mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.disconnected {
            if worker.join().is_err() {
                tracing::error!("output pump thread exited abnormally");
            }
        } else {
            // Something else still holds the write end, e.g. a grandchild.
            tracing::debug!("output pipe still open, detaching reader");
        }
    }
}
