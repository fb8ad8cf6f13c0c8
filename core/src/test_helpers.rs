//! Test doubles for the host runtime, the host target and the interpreter

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::config::InputConfig;
use crate::error::{BridgeError, HostError};
use crate::host::{HostRuntime, HostTarget};
use crate::interpreter::Interpreter;
use crate::paths::SearchPath;
use crate::shim::StdioShim;

/// Input settings with a short backoff so retry tests stay fast
pub fn fast_input() -> InputConfig {
    InputConfig {
        completion_marker: ":ok".to_string(),
        poll_interval_ms: 5,
    }
}

/// Host runtime that records which threads it attached
#[derive(Default)]
pub struct CountingRuntime {
    attached: Mutex<HashSet<ThreadId>>,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    fail_attach: bool,
}

impl CountingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_attach: true,
            ..Self::default()
        })
    }

    /// Pretend the host created the current thread
    pub fn mark_current_thread_attached(&self) {
        self.attached
            .lock()
            .unwrap()
            .insert(std::thread::current().id());
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_calls(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }
}

impl HostRuntime for CountingRuntime {
    fn is_thread_attached(&self) -> bool {
        self.attached
            .lock()
            .unwrap()
            .contains(&std::thread::current().id())
    }

    fn attach_thread(&self) -> Result<(), HostError> {
        if self.fail_attach {
            return Err(HostError::Attach("JNI_ERR".to_string()));
        }
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        self.attached
            .lock()
            .unwrap()
            .insert(std::thread::current().id());
        Ok(())
    }

    fn detach_thread(&self) -> Result<(), HostError> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        self.attached
            .lock()
            .unwrap()
            .remove(&std::thread::current().id());
        Ok(())
    }
}

/// Host target recording emitted lines and replaying canned input responses
#[derive(Default)]
pub struct RecordingTarget {
    lines: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Option<String>>>,
    requests: AtomicUsize,
    unresolvable: bool,
}

impl RecordingTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_responses(responses: Vec<Option<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    /// Target whose callback methods cannot be found
    pub fn unresolvable() -> Arc<Self> {
        Arc::new(Self {
            unresolvable: true,
            ..Self::default()
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HostTarget for RecordingTarget {
    fn emit(&self, line: &str) -> Result<(), HostError> {
        if self.unresolvable {
            return Err(HostError::MethodResolution {
                method: "emit".to_string(),
                reason: "NoSuchMethodError".to_string(),
            });
        }
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn request_line(&self) -> Result<Option<String>, HostError> {
        if self.unresolvable {
            return Err(HostError::MethodResolution {
                method: "requestLine".to_string(),
                reason: "NoSuchMethodError".to_string(),
            });
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses.lock().unwrap().pop_front().flatten())
    }
}

/// Everything a [`ScriptedInterpreter`] was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RegisterModules,
    Initialize(String),
    InstallStdio,
    Import(String),
    Run(String),
    Finalize,
}

/// Interpreter stand-in understanding a handful of one-line statements
///
/// - `print('text')` writes `text\n` to stdout
/// - `write('text')` writes `text` without a newline
/// - `input()` reads one line and prints it back
/// - `raise Name` writes a traceback to stderr and fails
#[derive(Default)]
pub struct ScriptedInterpreter {
    events: Arc<Mutex<Vec<Event>>>,
    shim: Option<Arc<StdioShim>>,
    pub fail_initialize: bool,
    pub fail_install_stdio: bool,
    pub fail_finalize: bool,
    pub missing_modules: Vec<String>,
    finalized: Arc<AtomicBool>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the event log, usable after the interpreter moved
    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        self.events.clone()
    }

    pub fn finalized_flag(&self) -> Arc<AtomicBool> {
        self.finalized.clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn stdio(&self) -> Result<&Arc<StdioShim>, BridgeError> {
        self.shim.as_ref().ok_or(BridgeError::NotRunning)
    }

    fn traceback(&self, name: &str) -> Result<(), BridgeError> {
        let stdio = self.stdio()?;
        stdio.write("Traceback (most recent call last):\n");
        stdio.write(&format!("{}\n", name));
        Err(BridgeError::Script(name.to_string()))
    }
}

fn quoted_argument<'a>(source: &'a str, call: &str) -> Option<&'a str> {
    let inner = source.strip_prefix(call)?.strip_prefix('(')?.strip_suffix(')')?;
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

impl Interpreter for ScriptedInterpreter {
    fn register_modules(&mut self) -> Result<(), BridgeError> {
        self.record(Event::RegisterModules);
        Ok(())
    }

    fn initialize(&mut self, search_path: &SearchPath) -> Result<(), BridgeError> {
        self.record(Event::Initialize(search_path.to_string()));
        if self.fail_initialize {
            return Err(BridgeError::Initialization(
                "Fatal Python error: failed to get the Python codec of the filesystem encoding"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn install_stdio(&mut self, shim: Arc<StdioShim>) -> Result<(), BridgeError> {
        self.record(Event::InstallStdio);
        if self.fail_install_stdio {
            return Err(BridgeError::Initialization(
                "failed to install stdio shim".to_string(),
            ));
        }
        self.shim = Some(shim);
        Ok(())
    }

    fn import(&mut self, module: &str) -> Result<(), BridgeError> {
        self.record(Event::Import(module.to_string()));
        if self.missing_modules.iter().any(|m| m == module) {
            return self.traceback(&format!(
                "ModuleNotFoundError: No module named '{}'",
                module
            ));
        }
        Ok(())
    }

    fn run(&mut self, source: &str) -> Result<(), BridgeError> {
        self.record(Event::Run(source.to_string()));
        let stdio = self.stdio()?.clone();

        for statement in source.lines().map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(text) = quoted_argument(statement, "print") {
                stdio.write(text);
                stdio.write("\n");
            } else if let Some(text) = quoted_argument(statement, "write") {
                stdio.write(text);
            } else if statement == "input()" {
                match stdio.readline() {
                    Ok(line) => {
                        stdio.write(&line);
                        stdio.write("\n");
                    }
                    Err(_) => return self.traceback("EOFError"),
                }
            } else if let Some(name) = statement.strip_prefix("raise ") {
                return self.traceback(name);
            } else {
                return self.traceback(&format!("SyntaxError: {}", statement));
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), BridgeError> {
        self.record(Event::Finalize);
        self.shim = None;
        self.finalized.store(true, Ordering::SeqCst);
        if self.fail_finalize {
            return Err(BridgeError::Initialization(
                "buffered data could not be flushed during finalization".to_string(),
            ));
        }
        Ok(())
    }
}
