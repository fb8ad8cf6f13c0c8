//! Interpreter Lifecycle Manager
//!
//! Drives one embedded interpreter through
//! `Uninitialized -> Running -> Finalized`:
//!
//! 1. register native modules (once per process)
//! 2. initialize with the module-search path
//! 3. install the stdio shim
//! 4. import the bootstrap module
//!
//! The backend is abstracted behind [`Interpreter`] so the state machine does
//! not depend on a particular embedding.

#[cfg(feature = "python")]
pub mod python;

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::paths::SearchPath;
use crate::shim::StdioShim;
use crate::types::LifecycleState;

/// An embeddable interpreter
pub trait Interpreter: Send {
    /// Make native modules importable; called before the first `initialize`
    fn register_modules(&mut self) -> Result<(), BridgeError>;

    fn initialize(&mut self, search_path: &SearchPath) -> Result<(), BridgeError>;

    /// Route stdout, stderr and stdin through `shim`
    fn install_stdio(&mut self, shim: Arc<StdioShim>) -> Result<(), BridgeError>;

    fn import(&mut self, module: &str) -> Result<(), BridgeError>;

    /// Execute `source` as statements in the global namespace
    ///
    /// Script errors are printed to the interpreter's stderr before being
    /// returned.
    fn run(&mut self, source: &str) -> Result<(), BridgeError>;

    fn finalize(&mut self) -> Result<(), BridgeError>;
}

/// What `start` needs once arguments have been validated
pub struct StartRequest {
    pub search_path: SearchPath,
    pub shim: Arc<StdioShim>,
    pub bootstrap_module: String,
}

pub struct Lifecycle<I> {
    interpreter: I,
    state: LifecycleState,
    modules_registered: bool,
    shim: Option<Arc<StdioShim>>,
}

impl<I: Interpreter> Lifecycle<I> {
    pub fn new(interpreter: I) -> Self {
        Self {
            interpreter,
            state: LifecycleState::Uninitialized,
            modules_registered: false,
            shim: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Shim of the running session
    pub fn shim(&self) -> Option<&Arc<StdioShim>> {
        self.shim.as_ref()
    }

    /// Fails unless the interpreter could be started now
    pub fn ensure_startable(&self) -> Result<(), BridgeError> {
        match self.state {
            LifecycleState::Uninitialized => Ok(()),
            LifecycleState::Running => Err(BridgeError::AlreadyRunning),
            LifecycleState::Finalized => Err(BridgeError::Finalized),
        }
    }

    /// Bring the interpreter up and run the bootstrap module
    ///
    /// A failed bootstrap import leaves the interpreter running; the error is
    /// still returned so the host learns about it.
    pub fn start(&mut self, request: StartRequest) -> Result<(), BridgeError> {
        self.ensure_startable()?;

        if !self.modules_registered {
            self.interpreter.register_modules()?;
            self.modules_registered = true;
        }

        info!(search_path = %request.search_path, "Initializing the Python interpreter");
        if let Err(e) = self.interpreter.initialize(&request.search_path) {
            self.state = LifecycleState::Finalized;
            return Err(e);
        }
        self.state = LifecycleState::Running;

        if let Err(e) = self.interpreter.install_stdio(request.shim.clone()) {
            // Without the shim nothing reaches the host; treat as a failed start
            if let Err(finalize_err) = self.interpreter.finalize() {
                warn!(error = %finalize_err, "Finalize after failed stdio install also failed");
            }
            self.state = LifecycleState::Finalized;
            return Err(e);
        }
        self.shim = Some(request.shim);

        if let Err(e) = self.interpreter.import(&request.bootstrap_module) {
            warn!(module = %request.bootstrap_module, error = %e, "Bootstrap import failed");
            return Err(e);
        }

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BridgeError> {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Uninitialized => return Err(BridgeError::NotRunning),
            LifecycleState::Finalized => return Err(BridgeError::Finalized),
        }

        info!("Finalizing the Python interpreter");
        self.state = LifecycleState::Finalized;
        let result = self.interpreter.finalize();
        self.shim = None;
        result
    }

    pub fn call(&mut self, payload: &str) -> Result<(), BridgeError> {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Uninitialized => return Err(BridgeError::NotRunning),
            LifecycleState::Finalized => return Err(BridgeError::Finalized),
        }

        info!(bytes = payload.len(), "Call into Python interpreter");
        self.interpreter.run(payload)
    }
}
