//! JNI entry points for `flutterdesign.learning.com.flutterpy.interpreter.PyBridge`
//!
//! The Java class declares `native int start(String)`, `native int stop()` and
//! `native int call(String)` and loads this library as `pybridge`. Each entry
//! point returns a status code; see [`pybridge_core::Status`].

mod host;

use jni::objects::{JObject, JString};
use jni::sys::{jint, JNI_ERR, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

use pybridge_core::bridge::report;
use pybridge_core::{logging, Bridge, BridgeError, HostTarget, PythonInterpreter, Status};

pub use host::{JniTarget, JvmRuntime, EMIT_SIGNATURE, REQUEST_SIGNATURE};

struct JvmBridge {
    vm: Arc<JavaVM>,
    bridge: Bridge<PythonInterpreter>,
}

static BRIDGE: OnceLock<JvmBridge> = OnceLock::new();

fn bridge() -> Result<&'static JvmBridge, BridgeError> {
    BRIDGE
        .get()
        .ok_or_else(|| BridgeError::Initialization("JNI_OnLoad did not run".to_string()))
}

/// Called by the JVM when `System.loadLibrary("pybridge")` loads this library
#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    logging::init();

    // SAFETY: the JVM passes a valid pointer that outlives the library
    let vm = match unsafe { JavaVM::from_raw(vm) } {
        Ok(vm) => Arc::new(vm),
        Err(e) => {
            error!(error = %e, "Invalid JavaVM pointer");
            return JNI_ERR;
        }
    };

    let interpreter = match PythonInterpreter::new() {
        Ok(interpreter) => interpreter,
        Err(e) => {
            error!(error = %e, "Embedded interpreter unavailable");
            return JNI_ERR;
        }
    };

    let runtime = Arc::new(JvmRuntime::new(vm.clone()));
    let _ = BRIDGE.set(JvmBridge {
        vm,
        bridge: Bridge::new(runtime, interpreter),
    });

    info!("pybridge loaded");
    JNI_VERSION_1_6
}

/// `int start(String root)`
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_flutterdesign_learning_com_flutterpy_interpreter_PyBridge_start<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    root: JString<'local>,
) -> jint {
    guard("start", || {
        let context = bridge()?;
        let root = read_string(&mut env, &root, "root")?;

        Ok(context.bridge.start(&root, |config| {
            let target = JniTarget::new(&mut env, context.vm.clone(), &this, &config.host)?;
            Ok(Arc::new(target) as Arc<dyn HostTarget>)
        }))
    })
}

/// `int stop()`
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_flutterdesign_learning_com_flutterpy_interpreter_PyBridge_stop<'local>(
    _env: JNIEnv<'local>,
    _this: JObject<'local>,
) -> jint {
    guard("stop", || Ok(bridge()?.bridge.stop()))
}

/// `int call(String payload)`
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_flutterdesign_learning_com_flutterpy_interpreter_PyBridge_call<'local>(
    mut env: JNIEnv<'local>,
    _this: JObject<'local>,
    payload: JString<'local>,
) -> jint {
    guard("call", || {
        let context = bridge()?;
        let payload = read_string(&mut env, &payload, "payload")?;
        Ok(context.bridge.call(&payload))
    })
}

fn read_string(env: &mut JNIEnv, value: &JString, name: &str) -> Result<String, BridgeError> {
    if value.is_null() {
        return Err(BridgeError::InvalidArgument(format!("{} must not be null", name)));
    }
    env.get_string(value)
        .map(String::from)
        .map_err(|e| BridgeError::InvalidArgument(format!("{} is not a valid string: {}", name, e)))
}

/// Collapse an entry point to a status code; panics never unwind into the JVM
fn guard<F>(operation: &str, f: F) -> jint
where
    F: FnOnce() -> Result<Status, BridgeError>,
{
    let status = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => report(operation, Err(e)),
        Err(panic) => report(operation, Err(BridgeError::Panic(panic_message(&*panic)))),
    };
    status.code()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_status_through() {
        assert_eq!(guard("call", || Ok(Status::ScriptError)), Status::ScriptError.code());
    }

    #[test]
    fn test_guard_maps_errors_to_status() {
        assert_eq!(
            guard("call", || Err(BridgeError::NotRunning)),
            Status::InvalidState.code()
        );
    }

    #[test]
    fn test_guard_catches_panics() {
        assert_eq!(guard("start", || panic!("boom")), Status::Fatal.code());
    }

    #[test]
    fn test_entry_points_before_load() {
        assert!(matches!(bridge(), Err(BridgeError::Initialization(_))));
    }

    #[test]
    fn test_panic_message() {
        let panic = catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*panic), "bad 1");
    }
}
