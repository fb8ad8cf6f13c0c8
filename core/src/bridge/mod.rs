//! Bridge - entry points for the host
//!
//! [`Bridge`] is the only stateful object in the crate. It owns the runtime
//! handle, the interpreter lifecycle and the stdio shim of the running
//! session. Host bindings (JNI, the console host) create one and route their
//! `start`, `stop` and `call` entry points through it.
//!
//! Every entry point comes in two forms: `try_*` returning a typed result, and
//! a plain form returning the [`Status`] code the host sees. Errors never
//! cross the host boundary as anything richer than that code and a log line.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::{HostAdapter, HostRuntime, HostTarget, RuntimeHandle};
use crate::interpreter::{Interpreter, Lifecycle, StartRequest};
use crate::paths::SearchPath;
use crate::shim::StdioShim;
use crate::types::{LifecycleState, Severity, Status};

pub struct Bridge<I> {
    runtime: RuntimeHandle,
    lifecycle: Mutex<Lifecycle<I>>,
    /// Kept outside the lifecycle lock so `stop` can cancel a blocked read
    active_shim: Mutex<Option<Arc<StdioShim>>>,
}

impl<I: Interpreter> Bridge<I> {
    pub fn new(runtime: Arc<dyn HostRuntime>, interpreter: I) -> Self {
        Self {
            runtime: RuntimeHandle::new(runtime),
            lifecycle: Mutex::new(Lifecycle::new(interpreter)),
            active_shim: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock_lifecycle().state()
    }

    /* ===================== Entry Points ===================== */

    /// Start the interpreter rooted at `root`
    ///
    /// `make_target` builds the host callback target once the configuration
    /// is known; it is not called if the bridge cannot start.
    pub fn start<F>(&self, root: &str, make_target: F) -> Status
    where
        F: FnOnce(&BridgeConfig) -> Result<Arc<dyn HostTarget>, BridgeError>,
    {
        report("start", self.try_start(root, make_target))
    }

    pub fn stop(&self) -> Status {
        report("stop", self.try_stop())
    }

    pub fn call(&self, payload: &str) -> Status {
        report("call", self.try_call(payload))
    }

    /* ===================== Typed Variants ===================== */

    pub fn try_start<F>(&self, root: &str, make_target: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&BridgeConfig) -> Result<Arc<dyn HostTarget>, BridgeError>,
    {
        let mut lifecycle = self.lock_lifecycle();

        // Refuse before building a new callback target over the live one
        lifecycle.ensure_startable()?;
        SearchPath::validate_root(root)?;

        let config = BridgeConfig::load(Path::new(root))?;
        let search_path = SearchPath::build(
            root,
            &config.interpreter.stdlib_archive,
            &config.interpreter.extra_search_paths,
        )?;
        search_path.joined()?;

        let target = make_target(&config)?;
        let adapter = HostAdapter::new(self.runtime.clone(), target);
        let shim = Arc::new(StdioShim::new(adapter, &config.input));

        *self.lock_active_shim() = Some(shim.clone());

        let result = lifecycle.start(StartRequest {
            search_path,
            shim,
            bootstrap_module: config.interpreter.bootstrap_module.clone(),
        });

        if lifecycle.state() != LifecycleState::Running {
            self.lock_active_shim().take();
        }
        result
    }

    /// Stop the interpreter and release the host callback target
    ///
    /// A read blocked on host input is cancelled first; its call then
    /// finishes with `EOFError` and releases the interpreter.
    pub fn try_stop(&self) -> Result<(), BridgeError> {
        if let Some(shim) = self.lock_active_shim().take() {
            debug!("Cancelling pending input requests");
            shim.cancel_input();
        }

        let result = self.lock_lifecycle().stop();

        if let Err(e) = self.runtime.release_thread() {
            warn!(error = %e, "Failed to detach thread after stop");
        }
        result
    }

    pub fn try_call(&self, payload: &str) -> Result<(), BridgeError> {
        if payload.contains('\0') {
            return Err(BridgeError::InvalidArgument(
                "payload contains a NUL byte".to_string(),
            ));
        }
        self.lock_lifecycle().call(payload)
    }

    /* ===================== Internals ===================== */

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle<I>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active_shim(&self) -> MutexGuard<'_, Option<Arc<StdioShim>>> {
        self.active_shim.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Log a failed entry point and collapse the result to a status code
pub fn report(operation: &str, result: Result<(), BridgeError>) -> Status {
    let status = Status::from_result(&result);
    match result {
        Ok(()) => debug!(operation, "Bridge call succeeded"),
        Err(BridgeError::Script(message)) => {
            info!(operation, error = %message, "Script raised an error")
        }
        Err(e) => match e.severity() {
            Severity::Fatal => error!(operation, error = %e, %status, "Bridge call failed"),
            Severity::Recoverable => warn!(operation, error = %e, %status, "Bridge call failed"),
        },
    }
    status
}
