//! Embeds a Python interpreter in a host runtime
//!
//! The host drives the interpreter through three entry points on [`Bridge`]
//! (`start`, `stop`, `call`), while the interpreter's standard streams are
//! routed back to two host callbacks (`emit` for output, `requestLine` for
//! input) through the [`shim::StdioShim`].

pub mod bridge;
pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod logging;
pub mod paths;
pub mod shim;
pub mod types;

#[cfg(feature = "python")]
pub mod cli;

#[cfg(test)]
pub mod test_helpers;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, HostError};
pub use host::{HostAdapter, HostRuntime, HostTarget, RuntimeHandle, ThreadSession};
pub use interpreter::{Interpreter, Lifecycle};
pub use types::*;

#[cfg(feature = "python")]
pub use interpreter::python::PythonInterpreter;
