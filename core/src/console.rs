//! Console host
//!
//! Hosts the bridge in a plain native process: output lines go to a writer,
//! input lines come from a reader and are always complete, so they are handed
//! back with the completion marker already appended.

use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::{Mutex, PoisonError};

use crate::error::HostError;
use crate::host::{HostRuntime, HostTarget};

/// A native process has no managed runtime; every thread may call the host
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleRuntime;

impl HostRuntime for ConsoleRuntime {
    fn is_thread_attached(&self) -> bool {
        true
    }

    fn attach_thread(&self) -> Result<(), HostError> {
        Ok(())
    }

    fn detach_thread(&self) -> Result<(), HostError> {
        Ok(())
    }
}

pub struct ConsoleHost<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
    marker: String,
}

impl ConsoleHost<BufReader<Stdin>, Stdout> {
    /// Host reading the process's stdin and writing its stdout
    pub fn stdio(marker: &str) -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout(), marker)
    }
}

impl<R, W> ConsoleHost<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W, marker: &str) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            marker: marker.to_string(),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> HostTarget for ConsoleHost<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn emit(&self, line: &str) -> Result<(), HostError> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(output, "{}", line)
            .and_then(|_| output.flush())
            .map_err(|e| HostError::Invocation {
                method: "emit".to_string(),
                reason: e.to_string(),
            })
    }

    /// End of input reads as an empty, completed line
    fn request_line(&self) -> Result<Option<String>, HostError> {
        let mut line = String::new();
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_line(&mut line)
            .map_err(|e| HostError::Invocation {
                method: "requestLine".to_string(),
                reason: e.to_string(),
            })?;

        let trimmed = line.trim_end_matches(['\n', '\r']);
        Ok(Some(format!("{}{}", trimmed, self.marker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_emit_writes_one_line_per_call() {
        let host = ConsoleHost::new(Cursor::new(Vec::new()), Vec::new(), ":ok");
        host.emit("first").unwrap();
        host.emit("").unwrap();
        host.emit("third").unwrap();
        assert_eq!(
            String::from_utf8(host.into_output()).unwrap(),
            "first\n\nthird\n"
        );
    }

    #[test]
    fn test_request_line_appends_marker() {
        let host = ConsoleHost::new(Cursor::new(b"alice\r\nbob\n".to_vec()), Vec::new(), ":ok");
        assert_eq!(host.request_line().unwrap(), Some("alice:ok".to_string()));
        assert_eq!(host.request_line().unwrap(), Some("bob:ok".to_string()));
        assert_eq!(host.request_line().unwrap(), Some(":ok".to_string()));
    }

    #[test]
    fn test_console_runtime_is_always_attached() {
        let runtime = ConsoleRuntime;
        assert!(runtime.is_thread_attached());
        assert!(runtime.attach_thread().is_ok());
        assert!(runtime.detach_thread().is_ok());
    }
}
