//! Error taxonomy for the bridge
//!
//! Nothing here crosses the host boundary as a structured value: entry points
//! collapse every error into a [`Status`] code and a log line.

use thiserror::Error;

use crate::types::{Severity, Status};

/// Failures talking to the host runtime
#[derive(Debug, Error)]
pub enum HostError {
    /// The current native thread could not be registered with the host runtime
    #[error("failed to attach thread to host runtime: {0}")]
    Attach(String),

    #[error("host method `{method}` could not be resolved: {reason}")]
    MethodResolution { method: String, reason: String },

    #[error("host method `{method}` failed: {reason}")]
    Invocation { method: String, reason: String },

    #[error("could not convert host value: {0}")]
    Conversion(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("interpreter is already running")]
    AlreadyRunning,

    #[error("interpreter is not running")]
    NotRunning,

    #[error("interpreter was finalized and cannot be used again in this process")]
    Finalized,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("interpreter initialization failed: {0}")]
    Initialization(String),

    #[error("script raised an error: {0}")]
    Script(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("input request cancelled")]
    InputCancelled,

    #[error("panic at the host boundary: {0}")]
    Panic(String),
}

impl BridgeError {
    pub fn status(&self) -> Status {
        match self {
            BridgeError::InvalidArgument(_) | BridgeError::Config(_) => Status::InvalidArgument,
            BridgeError::AlreadyRunning
            | BridgeError::NotRunning
            | BridgeError::Finalized
            | BridgeError::InputCancelled => Status::InvalidState,
            BridgeError::Script(_) => Status::ScriptError,
            BridgeError::Host(HostError::Attach(_)) => Status::Fatal,
            BridgeError::Host(_) => Status::HostFailure,
            BridgeError::Initialization(_) | BridgeError::Panic(_) => Status::Fatal,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.status() {
            Status::Fatal => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl Status {
    /// Collapse an entry point result into the code handed to the host
    pub fn from_result(result: &Result<(), BridgeError>) -> Status {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}
