//! Boa-backed sandbox with a small timer-driven event loop

use crate::sandbox::error::SandboxError;
use crate::sandbox::globals::SandboxGlobals;
use crate::sandbox::host::HostBindings;
use crate::sandbox::{ExecutionOutcome, SandboxBackend};
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction, Source,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PRELUDE: &str = include_str!("prelude.js");

/// Upper bound on a single sleep of the event loop, so interrupts are noticed
const MAX_IDLE_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    name: String,
    message: String,
    stack: Option<String>,
}

impl From<ErrorInfo> for SandboxError {
    fn from(info: ErrorInfo) -> Self {
        SandboxError::ScriptRuntime {
            name: info.name,
            message: info.message,
            stack: info.stack,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleReport {
    settled: bool,
    failed: bool,
    exited: bool,
    exit_code: i32,
    pending_timers: usize,
    error: Option<ErrorInfo>,
    value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drive {
    /// Wait for the value to settle and every timer to fire
    UntilIdle,
    /// Wait for the value only
    UntilSettled,
}

/// A live Boa context plus the host it was built against
pub struct BoaContext {
    context: Context,
    /// Event-loop handle returned by the prelude; never exposed to scripts
    runtime: JsObject,
    host: Arc<HostBindings>,
}

impl BoaContext {
    pub fn host(&self) -> &Arc<HostBindings> {
        &self.host
    }
}

#[derive(Debug, Default)]
pub struct BoaBackend {
    interrupted: AtomicBool,
}

impl BoaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn call_runtime(
        runtime: &JsObject,
        context: &mut Context,
        method: &str,
        args: &[JsValue],
    ) -> JsResult<JsValue> {
        let function = runtime.get(JsString::from(method), context)?;
        let Some(function) = function.as_callable() else {
            return Err(JsNativeError::typ()
                .with_message("runtime method is not callable")
                .into());
        };
        function.call(&JsValue::from(runtime.clone()), args, context)
    }

    fn runtime_string(
        runtime: &JsObject,
        context: &mut Context,
        method: &str,
        args: &[JsValue],
    ) -> Result<String, SandboxError> {
        let value = Self::call_runtime(runtime, context, method, args).map_err(|e| internal(&e))?;
        value
            .to_string(context)
            .map(|s| s.to_std_string_escaped())
            .map_err(|e| internal(&e))
    }

    /// Convert an engine error into the script-visible name and message
    fn script_error(runtime: &JsObject, context: &mut Context, error: JsError) -> SandboxError {
        let value = error.to_opaque(context);
        let described = Self::runtime_string(runtime, context, "describe", &[value]);

        match described.map(|json| serde_json::from_str::<ErrorInfo>(&json)) {
            Ok(Ok(info)) => info.into(),
            _ => SandboxError::ScriptRuntime {
                name: "Error".to_string(),
                message: error.to_string(),
                stack: None,
            },
        }
    }

    fn report(runtime: &JsObject, context: &mut Context) -> Result<SettleReport, SandboxError> {
        let json = Self::runtime_string(runtime, context, "report", &[])?;
        serde_json::from_str(&json).map_err(|e| SandboxError::Worker {
            message: format!("unreadable run state: {e}"),
        })
    }

    fn run_jobs(runtime: &JsObject, context: &mut Context) -> Result<(), SandboxError> {
        context
            .run_jobs()
            .map_err(|e| Self::script_error(runtime, context, e))
    }

    fn cancel(runtime: &JsObject, context: &mut Context) {
        let _ = Self::call_runtime(runtime, context, "cancel", &[]);
    }

    /// Evaluate `code`, then pump microtasks and timers until `drive` is satisfied
    fn run(
        &self,
        ctx: &mut BoaContext,
        code: &str,
        origin: Option<&str>,
        drive: Drive,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let BoaContext {
            context, runtime, ..
        } = ctx;

        let source = Source::from_bytes(code.as_bytes());
        let evaluated = match origin {
            Some(origin) => context.eval(source.with_path(Path::new(origin))),
            None => context.eval(source),
        };
        let value = match evaluated {
            Ok(value) => value,
            Err(e) => {
                // `process.exit` unwinds synchronously when called outside an async body
                let report = Self::report(runtime, context)?;
                if report.exited {
                    Self::cancel(runtime, context);
                    return Ok(ExecutionOutcome::exited(report.exit_code));
                }
                return Err(Self::script_error(runtime, context, e));
            }
        };

        Self::call_runtime(runtime, context, "track", &[value]).map_err(|e| internal(&e))?;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                Self::cancel(runtime, context);
                return Err(SandboxError::Interrupted);
            }

            Self::run_jobs(runtime, context)?;
            let next_timer = Self::call_runtime(runtime, context, "runTimers", &[])
                .map_err(|e| internal(&e))?
                .as_number()
                .unwrap_or(-1.0);
            Self::run_jobs(runtime, context)?;

            let report = Self::report(runtime, context)?;
            if report.exited {
                debug!("Script exited with code {}", report.exit_code);
                Self::cancel(runtime, context);
                return Ok(ExecutionOutcome::exited(report.exit_code));
            }
            if report.failed {
                Self::cancel(runtime, context);
                let info = report.error.unwrap_or(ErrorInfo {
                    name: "Error".to_string(),
                    message: "Script failed".to_string(),
                    stack: None,
                });
                return Err(info.into());
            }

            let done = match drive {
                Drive::UntilIdle => report.settled && report.pending_timers == 0,
                Drive::UntilSettled => report.settled,
            };
            if done {
                return Ok(ExecutionOutcome::completed(report.value));
            }

            if next_timer < 0.0 {
                // Nothing left that could settle the pending value
                warn!("Script promise never settled and no timers are pending");
                return Ok(ExecutionOutcome::completed(None));
            }

            let wait = Duration::from_millis(next_timer as u64).min(MAX_IDLE_SLICE);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }
}

impl SandboxBackend for BoaBackend {
    type Context = BoaContext;

    fn build(&self, globals: SandboxGlobals) -> Result<BoaContext, SandboxError> {
        let mut context = Context::default();
        let build_error = |e: JsError| SandboxError::Build {
            message: e.to_string(),
        };

        let host = globals.host.clone();
        let dispatcher = host.clone();
        // SAFETY: the closure captures only an `Arc<HostBindings>`, which holds no
        // garbage-collected values and therefore needs no tracing.
        let dispatch = unsafe {
            NativeFunction::from_closure(move |_this, args, context| {
                let op = args
                    .get_or_undefined(0)
                    .to_string(context)?
                    .to_std_string_escaped();
                let payload = args
                    .get_or_undefined(1)
                    .to_string(context)?
                    .to_std_string_escaped();
                let reply = dispatcher.dispatch(&op, &payload);
                Ok(JsValue::from(JsString::from(reply.as_str())))
            })
        };
        context
            .register_global_callable(js_string!("__rustle_host"), 2, dispatch)
            .map_err(build_error)?;

        let environment = globals
            .environment_json()
            .map_err(|e| SandboxError::Build {
                message: e.to_string(),
            })?;
        context
            .global_object()
            .set(
                js_string!("__rustle_init"),
                JsValue::from(JsString::from(environment.as_str())),
                false,
                &mut context,
            )
            .map_err(build_error)?;

        let runtime = context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(build_error)?
            .as_object()
            .map(|object| object.clone())
            .ok_or_else(|| SandboxError::Build {
                message: "prelude did not return a runtime handle".to_string(),
            })?;

        debug!("Sandbox context built with {} globals", globals.names().len());
        Ok(BoaContext {
            context,
            runtime,
            host,
        })
    }

    fn execute(
        &self,
        context: &mut BoaContext,
        code: &str,
        origin: &str,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.run(context, code, Some(origin), Drive::UntilIdle)
    }

    fn evaluate(
        &self,
        context: &mut BoaContext,
        code: &str,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.run(context, code, None, Drive::UntilSettled)
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn reset_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

fn internal(error: &JsError) -> SandboxError {
    SandboxError::Worker {
        message: error.to_string(),
    }
}
