//! JVM side of the host adapter

use jni::errors::Error as JniError;
use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::{JNIEnv, JavaVM};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use pybridge_core::config::HostConfig;
use pybridge_core::{HostError, HostRuntime, HostTarget};

/// `void emit(String)`
pub const EMIT_SIGNATURE: &str = "(Ljava/lang/String;)V";

/// `String requestLine()`
pub const REQUEST_SIGNATURE: &str = "()Ljava/lang/String;";

/// Local references one callback needs: the argument string or the result
const LOCAL_FRAME_CAPACITY: i32 = 4;

#[derive(Debug, Error)]
enum CallError {
    #[error(transparent)]
    Jni(#[from] JniError),

    #[error("no JNI environment on this thread: {0}")]
    Detached(JniError),

    #[error("host returned an unreadable string: {0}")]
    Conversion(JniError),
}

impl CallError {
    fn into_host_error(self, method: &str) -> HostError {
        match self {
            CallError::Detached(e) => HostError::Attach(e.to_string()),
            CallError::Conversion(e) => HostError::Conversion(e.to_string()),
            CallError::Jni(JniError::MethodNotFound { name, sig }) => HostError::MethodResolution {
                method: method.to_string(),
                reason: format!("no method {}{}", name, sig),
            },
            CallError::Jni(JniError::JavaException) => HostError::Invocation {
                method: method.to_string(),
                reason: "Java exception thrown".to_string(),
            },
            CallError::Jni(e) => HostError::Invocation {
                method: method.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

/// The JVM as a [`HostRuntime`]
pub struct JvmRuntime {
    vm: Arc<JavaVM>,
}

impl JvmRuntime {
    pub fn new(vm: Arc<JavaVM>) -> Self {
        Self { vm }
    }
}

impl HostRuntime for JvmRuntime {
    fn is_thread_attached(&self) -> bool {
        self.vm.get_env().is_ok()
    }

    /// Permanent attachment: the thread is detached when it exits
    fn attach_thread(&self) -> Result<(), HostError> {
        self.vm
            .attach_current_thread_permanently()
            .map(|_| ())
            .map_err(|e| HostError::Attach(e.to_string()))
    }

    fn detach_thread(&self) -> Result<(), HostError> {
        // SAFETY: callbacks run inside their own local frame, so no local
        // reference created on this thread outlives the call that made it.
        unsafe { self.vm.detach_current_thread() };
        Ok(())
    }
}

/// Global references to the Java object owning the callbacks and its class
pub struct JniTarget {
    vm: Arc<JavaVM>,
    instance: GlobalRef,
    class: GlobalRef,
    emit_method: String,
    request_method: String,
}

impl JniTarget {
    /// Pin `instance` and its class, and check both callbacks resolve
    pub fn new(
        env: &mut JNIEnv,
        vm: Arc<JavaVM>,
        instance: &JObject,
        host: &HostConfig,
    ) -> Result<Self, HostError> {
        let target = Self::pin(env, vm, instance, host).map_err(|e| {
            clear_exception(env, "start");
            e.into_host_error("start")
        })?;

        for (method, signature) in [
            (&target.emit_method, EMIT_SIGNATURE),
            (&target.request_method, REQUEST_SIGNATURE),
        ] {
            if let Err(e) = env.get_method_id(target.class(), method, signature) {
                clear_exception(env, method);
                return Err(CallError::from(e).into_host_error(method));
            }
        }

        Ok(target)
    }

    fn pin(
        env: &mut JNIEnv,
        vm: Arc<JavaVM>,
        instance: &JObject,
        host: &HostConfig,
    ) -> Result<Self, CallError> {
        let class = env.get_object_class(instance)?;
        Ok(Self {
            vm,
            instance: env.new_global_ref(instance)?,
            class: env.new_global_ref(class)?,
            emit_method: host.emit_method.clone(),
            request_method: host.request_method.clone(),
        })
    }

    fn class(&self) -> &JClass<'static> {
        self.class.as_obj().into()
    }

    /// Run `f` in a fresh local frame on the current (attached) thread
    fn with_frame<T, F>(&self, method: &str, f: F) -> Result<T, HostError>
    where
        F: FnOnce(&mut JNIEnv) -> Result<T, CallError>,
    {
        let mut env = self
            .vm
            .get_env()
            .map_err(|e| CallError::Detached(e).into_host_error(method))?;

        env.with_local_frame(LOCAL_FRAME_CAPACITY, |env| {
            f(env).map_err(|e| {
                clear_exception(env, method);
                e
            })
        })
        .map_err(|e| e.into_host_error(method))
    }
}

impl HostTarget for JniTarget {
    fn emit(&self, line: &str) -> Result<(), HostError> {
        self.with_frame(&self.emit_method, |env| {
            let method = env.get_method_id(self.class(), &self.emit_method, EMIT_SIGNATURE)?;
            let text = env.new_string(line)?;
            // SAFETY: `method` was resolved on the instance's class with
            // EMIT_SIGNATURE and the argument matches it.
            unsafe {
                env.call_method_unchecked(
                    &self.instance,
                    method,
                    ReturnType::Primitive(Primitive::Void),
                    &[JValue::Object(&text).as_jni()],
                )?;
            }
            Ok(())
        })
    }

    fn request_line(&self) -> Result<Option<String>, HostError> {
        self.with_frame(&self.request_method, |env| {
            let method =
                env.get_method_id(self.class(), &self.request_method, REQUEST_SIGNATURE)?;
            // SAFETY: resolved with REQUEST_SIGNATURE, which takes no arguments
            // and returns an object.
            let value = unsafe {
                env.call_method_unchecked(&self.instance, method, ReturnType::Object, &[])?
            }
            .l()?;

            if value.is_null() {
                return Ok(None);
            }
            let text = JString::from(value);
            let line: String = env
                .get_string(&text)
                .map_err(CallError::Conversion)?
                .into();
            Ok(Some(line))
        })
    }
}

/// Describe and clear a pending Java exception so later JNI calls are legal
fn clear_exception(env: &mut JNIEnv, method: &str) {
    if env.exception_check().unwrap_or(false) {
        warn!(method, "Java exception during host callback");
        let _ = env.exception_describe();
        let _ = env.exception_clear();
    }
}
