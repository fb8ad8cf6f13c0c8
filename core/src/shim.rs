//! Stdio Redirection Shim
//!
//! One [`StdioShim`] replaces the interpreter's stdout, stderr and stdin at
//! once, so all three streams share a single line buffer and a single input
//! poll loop.
//!
//! Output is line-buffered: nothing reaches the host until its newline has
//! been written, and a partial line is carried over to the next write.
//!
//! Input is a poll with a handshake: the host answers every request, but only
//! an answer containing the completion marker is a real line. Anything else
//! is dropped and the request repeated after a fixed backoff. The backoff is
//! cancellable so that stopping the interpreter can break a pending read.

use std::sync::{mpsc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::InputConfig;
use crate::error::BridgeError;
use crate::host::HostAdapter;

/// Background runtime driving the input backoff timers
static TIMER_RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn timer_runtime() -> &'static Runtime {
    TIMER_RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pybridge-timer")
            .enable_time()
            .build()
            .expect("Failed to create Tokio runtime")
    })
}

/// Accumulates output text until it forms complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`, returning every line completed by it
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);

        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete[..last_newline]
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    /// Text written since the last newline
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Completion-marker handshake for input requests
#[derive(Debug, Clone)]
pub struct InputGate {
    marker: String,
    interval: Duration,
    cancel: CancellationToken,
}

impl InputGate {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            marker: config.completion_marker.clone(),
            interval: config.poll_interval(),
            cancel: CancellationToken::new(),
        }
    }

    /// The line carried by `response`, if the host marked it complete
    ///
    /// Every occurrence of the marker is removed.
    pub fn accept(&self, response: &str) -> Option<String> {
        if response.contains(&self.marker) {
            Some(response.replace(&self.marker, ""))
        } else {
            None
        }
    }

    /// Poll until a response carries the completion marker
    ///
    /// Each unmarked (or missing) response costs exactly one backoff wait.
    /// Returns `InputCancelled` once [`InputGate::cancel`] has been called.
    pub fn read_line<F>(&self, mut poll: F) -> Result<String, BridgeError>
    where
        F: FnMut() -> Option<String>,
    {
        let mut retries: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(BridgeError::InputCancelled);
            }

            if let Some(line) = poll().and_then(|response| self.accept(&response)) {
                debug!(retries, "Input line received from host");
                return Ok(line);
            }

            retries += 1;
            if !self.wait() {
                debug!(retries, "Input request cancelled");
                return Err(BridgeError::InputCancelled);
            }
        }
    }

    /// Wake any pending and future reads with `InputCancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Sleep one backoff interval; false if cancelled first
    ///
    /// The timer runs on the background runtime and the caller blocks on a
    /// plain channel, so this also works from a thread driving its own
    /// runtime.
    fn wait(&self) -> bool {
        let token = self.cancel.clone();
        let interval = self.interval;
        let (tx, rx) = mpsc::channel();

        timer_runtime().spawn(async move {
            let elapsed = tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(interval) => true,
            };
            let _ = tx.send(elapsed);
        });

        rx.recv().unwrap_or(false)
    }
}

/// Replacement for the interpreter's standard streams
pub struct StdioShim {
    host: HostAdapter,
    buffer: Mutex<LineBuffer>,
    gate: InputGate,
}

impl StdioShim {
    pub fn new(host: HostAdapter, input: &InputConfig) -> Self {
        Self {
            host,
            buffer: Mutex::new(LineBuffer::new()),
            gate: InputGate::new(input),
        }
    }

    /// Output path shared by stdout and stderr
    pub fn write(&self, text: &str) {
        let lines = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);

        for line in lines {
            self.host.emit(&line);
        }
    }

    /// No-op: a partial trailing line is never forced out
    pub fn flush(&self) {}

    /// Input path for stdin; blocks until the host completes a line
    pub fn readline(&self) -> Result<String, BridgeError> {
        self.gate.read_line(|| self.host.request_line())
    }

    /// Forward one line to the host without buffering
    pub fn log(&self, text: &str) {
        self.host.emit(text);
    }

    /// One raw input request, without the completion handshake
    pub fn get(&self) -> String {
        self.host.request_line().unwrap_or_default()
    }

    pub fn pending(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending()
            .to_string()
    }

    pub fn cancel_input(&self) {
        self.gate.cancel();
    }
}
