//! Host Call Adapter
//!
//! Lets interpreter-side code call back into the host from any native thread.
//! Every crossing first asks the host runtime whether the calling thread is
//! registered and attaches it if not. Threads the bridge attached itself are
//! remembered per thread so they can be detached again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::HostError;

/// The host's managed runtime, as seen from a native thread
pub trait HostRuntime: Send + Sync {
    /// Whether the calling thread can already call host methods
    fn is_thread_attached(&self) -> bool;

    fn attach_thread(&self) -> Result<(), HostError>;

    fn detach_thread(&self) -> Result<(), HostError>;
}

/// The host object owning the output and input callbacks
///
/// Both methods are only invoked on threads attached to the host runtime.
pub trait HostTarget: Send + Sync {
    /// Deliver one complete output line
    fn emit(&self, line: &str) -> Result<(), HostError>;

    /// Ask the host for input; `None` means nothing is available
    fn request_line(&self) -> Result<Option<String>, HostError>;
}

/// How the current thread came to be attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSession {
    /// Attached before the bridge saw it (e.g. a host-created thread)
    Inherited,
    /// Attached by the bridge
    Attached,
}

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SESSIONS: RefCell<HashMap<u64, ThreadSession>> = RefCell::new(HashMap::new());
}

/// Process-wide handle to the host runtime
#[derive(Clone)]
pub struct RuntimeHandle {
    id: u64,
    runtime: Arc<dyn HostRuntime>,
}

impl RuntimeHandle {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            runtime,
        }
    }

    /// Attach the current thread unless it already is
    ///
    /// The runtime is asked on every crossing, so a thread detached behind
    /// the bridge's back is attached again. Only bridge attachments are
    /// remembered, for [`RuntimeHandle::release_thread`].
    pub fn ensure_attached(&self) -> Result<ThreadSession, HostError> {
        if self.runtime.is_thread_attached() {
            return Ok(self.current_session().unwrap_or(ThreadSession::Inherited));
        }

        self.runtime.attach_thread()?;
        debug!(thread = ?std::thread::current().id(), "Attached native thread to host runtime");
        SESSIONS.with(|s| s.borrow_mut().insert(self.id, ThreadSession::Attached));
        Ok(ThreadSession::Attached)
    }

    /// Detach the current thread if the bridge attached it
    ///
    /// Returns whether a detach happened. Threads the host attached are left
    /// alone.
    pub fn release_thread(&self) -> Result<bool, HostError> {
        let session = SESSIONS.with(|s| s.borrow_mut().remove(&self.id));
        match session {
            Some(ThreadSession::Attached) => {
                self.runtime.detach_thread()?;
                debug!(thread = ?std::thread::current().id(), "Detached native thread from host runtime");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// `Attached` if the bridge attached the current thread
    pub fn current_session(&self) -> Option<ThreadSession> {
        SESSIONS.with(|s| s.borrow().get(&self.id).copied())
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle").field("id", &self.id).finish()
    }
}

/// Runtime handle plus the host callback target of the current session
#[derive(Clone)]
pub struct HostAdapter {
    runtime: RuntimeHandle,
    target: Arc<dyn HostTarget>,
}

impl HostAdapter {
    pub fn new(runtime: RuntimeHandle, target: Arc<dyn HostTarget>) -> Self {
        Self { runtime, target }
    }

    pub fn try_emit(&self, line: &str) -> Result<(), HostError> {
        self.runtime.ensure_attached()?;
        self.target.emit(line)
    }

    pub fn try_request_line(&self) -> Result<Option<String>, HostError> {
        self.runtime.ensure_attached()?;
        self.target.request_line()
    }

    /// Forward one line to the host; failures are logged and the line dropped
    pub fn emit(&self, line: &str) {
        if let Err(e) = self.try_emit(line) {
            log_host_error("emit", &e);
        }
    }

    /// Ask the host for input; failures are logged and read as "no input"
    pub fn request_line(&self) -> Option<String> {
        match self.try_request_line() {
            Ok(line) => line,
            Err(e) => {
                log_host_error("request_line", &e);
                None
            }
        }
    }
}

fn log_host_error(operation: &str, err: &HostError) {
    match err {
        HostError::Attach(_) => error!(operation, error = %err, "Host call abandoned"),
        _ => warn!(operation, error = %err, "Host call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountingRuntime, RecordingTarget};

    #[test]
    fn test_fresh_thread_is_attached_once() {
        let runtime = CountingRuntime::new();
        let handle = RuntimeHandle::new(runtime.clone());

        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Attached);
        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Attached);
        assert_eq!(runtime.attach_calls(), 1);
    }

    #[test]
    fn test_host_thread_is_not_reattached() {
        let runtime = CountingRuntime::new();
        runtime.mark_current_thread_attached();
        let handle = RuntimeHandle::new(runtime.clone());

        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Inherited);
        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Inherited);
        assert_eq!(runtime.attach_calls(), 0);
    }

    #[test]
    fn test_each_new_thread_attaches_exactly_once() {
        let runtime = CountingRuntime::new();
        let handle = RuntimeHandle::new(runtime.clone());

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    handle.ensure_attached().unwrap();
                    handle.ensure_attached().unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(runtime.attach_calls(), 3);
    }

    #[test]
    fn test_thread_detached_elsewhere_is_attached_again() {
        let runtime = CountingRuntime::new();
        runtime.mark_current_thread_attached();
        let handle = RuntimeHandle::new(runtime.clone());
        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Inherited);

        // another library detaches the host's thread
        runtime.detach_thread().unwrap();
        assert!(!runtime.is_thread_attached());

        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Attached);
        assert!(runtime.is_thread_attached());
        assert_eq!(runtime.attach_calls(), 1);
        assert_eq!(handle.current_session(), Some(ThreadSession::Attached));
    }

    #[test]
    fn test_bridge_attached_thread_reattaches_after_external_detach() {
        let runtime = CountingRuntime::new();
        let handle = RuntimeHandle::new(runtime.clone());

        handle.ensure_attached().unwrap();
        runtime.detach_thread().unwrap();
        assert_eq!(handle.ensure_attached().unwrap(), ThreadSession::Attached);
        assert_eq!(runtime.attach_calls(), 2);
    }

    #[test]
    fn test_attach_failure_abandons_the_call() {
        let runtime = CountingRuntime::failing();
        let target = RecordingTarget::new();
        let adapter = HostAdapter::new(RuntimeHandle::new(runtime), target.clone());

        assert!(matches!(adapter.try_emit("lost"), Err(HostError::Attach(_))));
        adapter.emit("lost");
        assert!(target.lines().is_empty());
        assert_eq!(adapter.request_line(), None);
        assert_eq!(target.request_count(), 0);
    }

    #[test]
    fn test_release_only_detaches_bridge_attached_threads() {
        let runtime = CountingRuntime::new();
        let handle = RuntimeHandle::new(runtime.clone());

        handle.ensure_attached().unwrap();
        assert!(handle.release_thread().unwrap());
        assert_eq!(runtime.detach_calls(), 1);
        assert_eq!(handle.current_session(), None);
        assert!(!handle.release_thread().unwrap());

        let inherited = CountingRuntime::new();
        inherited.mark_current_thread_attached();
        let handle = RuntimeHandle::new(inherited.clone());
        handle.ensure_attached().unwrap();
        assert!(!handle.release_thread().unwrap());
        assert_eq!(inherited.detach_calls(), 0);
    }

    #[test]
    fn test_emit_and_request_forward_to_target() {
        let runtime = CountingRuntime::new();
        let target = RecordingTarget::with_responses(vec![Some("hello:ok".to_string())]);
        let adapter = HostAdapter::new(RuntimeHandle::new(runtime), target.clone());

        adapter.emit("one");
        assert_eq!(target.lines(), vec!["one".to_string()]);
        assert_eq!(adapter.request_line(), Some("hello:ok".to_string()));
    }

    #[test]
    fn test_method_resolution_failure_drops_output_and_yields_no_input() {
        let runtime = CountingRuntime::new();
        let target = RecordingTarget::unresolvable();
        let adapter = HostAdapter::new(RuntimeHandle::new(runtime), target.clone());

        assert!(matches!(
            adapter.try_emit("x"),
            Err(HostError::MethodResolution { .. })
        ));
        adapter.emit("x");
        assert_eq!(adapter.request_line(), None);
        assert!(target.lines().is_empty());
    }
}
