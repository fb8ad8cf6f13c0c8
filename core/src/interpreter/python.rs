//! Embedded CPython backend
//!
//! Uses the `PyConfig` initialization API so the module-search path is exactly
//! the one built from the root passed to `start`. The native `androidlog`
//! module is appended to the inittab before initialization, which makes it
//! importable as soon as the interpreter is live.
//!
//! After initialization the GIL is released; every later entry re-acquires it
//! with [`Python::with_gil`], so calls may come from any host thread.

use pyo3::exceptions::{PyEOFError, PyRuntimeError, PySystemExit};
use pyo3::ffi;
use pyo3::prelude::*;
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::ThreadId;
use tracing::{debug, warn};

use super::Interpreter;
use crate::error::BridgeError;
use crate::paths::SearchPath;
use crate::shim::StdioShim;

/// Import name of the native log/input module
pub const NATIVE_MODULE: &str = "androidlog";

/// Module attribute holding the installed [`HostStream`]
const STREAM_ATTR: &str = "_stream";

static CLAIMED: AtomicBool = AtomicBool::new(false);
static REGISTER_MODULES: Once = Once::new();

/// File-like object installed as `sys.stdin`, `sys.stdout` and `sys.stderr`
#[pyclass(frozen, module = "androidlog")]
pub struct HostStream {
    shim: Arc<StdioShim>,
}

#[pymethods]
impl HostStream {
    fn write(&self, text: &str) -> usize {
        self.shim.write(text);
        text.chars().count()
    }

    fn flush(&self) {
        self.shim.flush();
    }

    /// Blocks (with the GIL released) until the host completes a line
    #[pyo3(signature = (_size = -1))]
    fn readline(&self, py: Python<'_>, _size: i64) -> PyResult<String> {
        let shim = self.shim.clone();
        py.allow_threads(move || shim.readline())
            .map_err(|e| PyEOFError::new_err(e.to_string()))
    }

    fn isatty(&self) -> bool {
        false
    }

    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        true
    }

    #[getter]
    fn encoding(&self) -> &'static str {
        "utf-8"
    }
}

fn installed_stream<'py>(module: &Bound<'py, PyModule>) -> PyResult<Bound<'py, HostStream>> {
    let stream = module
        .getattr(STREAM_ATTR)
        .map_err(|_| PyRuntimeError::new_err("host stream is not installed"))?;
    Ok(stream.downcast_into::<HostStream>()?)
}

/// Send one line to the host
#[pyfunction]
#[pyo3(pass_module)]
fn log(module: &Bound<'_, PyModule>, text: &str) -> PyResult<()> {
    installed_stream(module)?.get().shim.log(text);
    Ok(())
}

/// Ask the host for input once, without waiting for the completion marker
#[pyfunction]
#[pyo3(pass_module)]
fn get(module: &Bound<'_, PyModule>) -> PyResult<String> {
    let shim = installed_stream(module)?.get().shim.clone();
    Ok(module.py().allow_threads(move || shim.get()))
}

/// Log for the host
#[pymodule]
fn androidlog(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(log, m)?)?;
    m.add_function(wrap_pyfunction!(get, m)?)?;
    m.add_class::<HostStream>()?;
    Ok(())
}

/// Thread state parked by `PyEval_SaveThread`
struct SavedThread {
    state: NonNull<ffi::PyThreadState>,
    owner: ThreadId,
}

// SAFETY: the state is only restored on `owner`; other threads take the GIL
// through PyGILState_Ensure instead.
unsafe impl Send for SavedThread {}

/// The process's single embedded CPython
pub struct PythonInterpreter {
    saved: Option<SavedThread>,
}

impl PythonInterpreter {
    /// Claim the embedded interpreter; only one claim succeeds per process
    pub fn new() -> Result<Self, BridgeError> {
        if CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyRunning);
        }
        Ok(Self { saved: None })
    }
}

impl Interpreter for PythonInterpreter {
    fn register_modules(&mut self) -> Result<(), BridgeError> {
        if unsafe { ffi::Py_IsInitialized() } != 0 {
            return Err(BridgeError::Initialization(
                "native modules must be registered before the interpreter starts".to_string(),
            ));
        }
        REGISTER_MODULES.call_once(|| pyo3::append_to_inittab!(androidlog));
        debug!(module = NATIVE_MODULE, "Registered native module");
        Ok(())
    }

    fn initialize(&mut self, search_path: &SearchPath) -> Result<(), BridgeError> {
        let entries = search_path
            .entries()
            .iter()
            .map(|entry| path_to_cstring(entry))
            .collect::<Result<Vec<_>, _>>()?;

        unsafe {
            let mut config = MaybeUninit::<ffi::PyConfig>::uninit();
            ffi::PyConfig_InitIsolatedConfig(config.as_mut_ptr());
            let mut config = config.assume_init();

            let result = configure_and_initialize(&mut config, &entries);
            ffi::PyConfig_Clear(&mut config);
            result?;

            let state = ffi::PyEval_SaveThread();
            self.saved = NonNull::new(state).map(|state| SavedThread {
                state,
                owner: std::thread::current().id(),
            });
        }

        Ok(())
    }

    fn install_stdio(&mut self, shim: Arc<StdioShim>) -> Result<(), BridgeError> {
        Python::with_gil(|py| -> PyResult<()> {
            let stream = Bound::new(py, HostStream { shim })?;
            py.import(NATIVE_MODULE)?.setattr(STREAM_ATTR, &stream)?;

            let sys = py.import("sys")?;
            for name in ["stdin", "stdout", "stderr"] {
                sys.setattr(name, &stream)?;
            }
            Ok(())
        })
        .map_err(|e| BridgeError::Initialization(format!("failed to install stdio shim: {}", e)))
    }

    /// `import <module>` in `__main__`, so payloads can refer to it by name
    fn import(&mut self, module: &str) -> Result<(), BridgeError> {
        self.run(&format!("import {}", module))
    }

    fn run(&mut self, source: &str) -> Result<(), BridgeError> {
        let code = CString::new(source).map_err(|_| {
            BridgeError::InvalidArgument("payload contains a NUL byte".to_string())
        })?;

        Python::with_gil(|py| {
            let result = py.import("__main__").and_then(|main| {
                let globals = main.dict();
                py.run(&code, Some(&globals), None)
            });

            result.map_err(|err| {
                let message = err.to_string();
                if err.is_instance_of::<PySystemExit>(py) {
                    // PyErr_Print would exit the host process
                    warn!(error = %message, "Script requested interpreter exit; ignored");
                } else {
                    err.print(py);
                }
                BridgeError::Script(message)
            })
        })
    }

    fn finalize(&mut self) -> Result<(), BridgeError> {
        unsafe {
            match self.saved.take() {
                Some(saved) if saved.owner == std::thread::current().id() => {
                    ffi::PyEval_RestoreThread(saved.state.as_ptr());
                }
                _ => {
                    ffi::PyGILState_Ensure();
                }
            }

            if ffi::Py_FinalizeEx() != 0 {
                return Err(BridgeError::Initialization(
                    "buffered data could not be flushed during finalization".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, BridgeError> {
    let text = path.to_str().ok_or_else(|| {
        BridgeError::InvalidArgument(format!("search path entry is not UTF-8: {}", path.display()))
    })?;
    CString::new(text).map_err(|_| {
        BridgeError::InvalidArgument(format!("search path entry contains a NUL byte: {}", text))
    })
}

unsafe fn configure_and_initialize(
    config: &mut ffi::PyConfig,
    entries: &[CString],
) -> Result<(), BridgeError> {
    config.module_search_paths_set = 1;
    for entry in entries {
        let wide = ffi::Py_DecodeLocale(entry.as_ptr(), std::ptr::null_mut());
        if wide.is_null() {
            return Err(BridgeError::Initialization(format!(
                "could not decode search path entry {:?}",
                entry
            )));
        }
        let status = ffi::PyWideStringList_Append(&mut config.module_search_paths, wide);
        ffi::PyMem_RawFree(wide.cast());
        check_status(status)?;
    }

    check_status(ffi::Py_InitializeFromConfig(config))
}

unsafe fn check_status(status: ffi::PyStatus) -> Result<(), BridgeError> {
    let err_msg = status.err_msg;
    if ffi::PyStatus_Exception(status) == 0 {
        return Ok(());
    }

    let message = if err_msg.is_null() {
        "unknown initialization error".to_string()
    } else {
        CStr::from_ptr(err_msg).to_string_lossy().into_owned()
    };
    Err(BridgeError::Initialization(message))
}
