//! Pass 3: sandboxed evaluation of the bundled unit.
//!
//! A fresh interpreter instance evaluates the bundle's modules in order.
//! Its global environment is an allow-list: a `console.log` hook forwarded
//! to `tracing`, the `__emit` entry point, and a few pure helpers. Nothing
//! reaches the file system, the process, the network, timers or dynamic
//! code evaluation.
//!
//! The run must call `__emit` exactly once. The emitted value is captured
//! into plain JSON at the moment of the call.

mod builtins;
mod capture;
mod interp;
mod value;

use crate::config::SandboxLimits;
use crate::error::Diagnostic;
use crate::library::ENTRY_SPECIFIER;
use crate::pass2_bundle::Bundle;
use interp::Interpreter;

/// Evaluation runs on a dedicated thread with this much stack so that the
/// configured call depth is reachable regardless of the caller's stack.
const SANDBOX_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Output of a successful evaluation.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The single emitted value.
    pub value: serde_json::Value,
    /// Lines written through `console.log`, in order.
    pub logs: Vec<String>,
    pub steps: u64,
}

pub fn execute(bundle: &Bundle, limits: &SandboxLimits) -> Result<Execution, Diagnostic> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("rankplan-sandbox".to_owned())
            .stack_size(SANDBOX_STACK_BYTES)
            .spawn_scoped(scope, || evaluate(bundle, limits))
            .map_err(|e| {
                Diagnostic::new(
                    ENTRY_SPECIFIER,
                    1,
                    1,
                    format!("failed to start the plan sandbox: {}", e),
                )
            })?;
        handle.join().unwrap_or_else(|_| {
            Err(Diagnostic::new(
                ENTRY_SPECIFIER,
                1,
                1,
                "plan sandbox terminated unexpectedly",
            ))
        })
    })
}

fn evaluate(bundle: &Bundle, limits: &SandboxLimits) -> Result<Execution, Diagnostic> {
    let mut interp = Interpreter::new(&bundle.modules, limits)?;
    interp.run()?;
    match interp.emitted.take() {
        Some(value) => Ok(Execution {
            value,
            logs: std::mem::take(&mut interp.logs),
            steps: interp.steps,
        }),
        None => Err(interp
            .plan_diagnostic("plan did not emit an artifact")
            .with_hint("export the plan with `export default definePlan({ name, build })`")),
    }
}
