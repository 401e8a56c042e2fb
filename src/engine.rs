//! The execution engine: spec §4.1.
//!
//! One entry point, [`evaluate`], implements the classification algorithm as
//! a single parse + a single module evaluation rather than three separate
//! code paths: Starlark's own module evaluation already yields the value of
//! a trailing bare-expression statement (or `NoneType` otherwise), which is
//! exactly the "last-expression-returns-a-value" behavior the algorithm
//! describes.

use std::sync::Mutex;

use serde::Serialize;
use starlark::environment::{Globals, Module};
use starlark::eval::{Evaluator, PrintHandler};
use starlark::syntax::{AstModule, Dialect};
use starlark::values::Value;

use crate::fs_context::FsContext;
use crate::repr::safe_repr;

/// Structured failure reported inside an [`EngineOutcome`]: kind name,
/// message, and a formatted multi-line traceback. Never propagated as a
/// service-level error (spec §7, *User-code error*).
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionError {
    pub kind: String,
    pub message: String,
    pub traceback: Vec<String>,
}

/// The engine's half of an execution result: everything except the
/// execution-counter value, which only the session knows how to assign
/// (spec §3 "Execution result").
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub value: Option<String>,
    pub error: Option<ExecutionError>,
}

impl EngineOutcome {
    fn empty_success() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            value: None,
            error: None,
        }
    }
}

/// Captures `print()` output into a buffer instead of a real stream. This is
/// the whole of "stdout" for a Starlark evaluation: there is no user-facing
/// write-to-stderr primitive in the language, so stderr is populated solely
/// from a raised error's formatted traceback.
struct CapturingPrinter {
    buf: Mutex<String>,
}

impl PrintHandler for CapturingPrinter {
    fn println(&self, text: &str) -> anyhow::Result<()> {
        let mut guard = self.buf.lock().unwrap_or_else(|poison| poison.into_inner());
        guard.push_str(text);
        guard.push('\n');
        Ok(())
    }
}

/// Evaluates one snippet of source against `module`, the session's
/// persistent namespace. Never panics on user-code failure; every failure
/// path is folded into the returned [`EngineOutcome`].
///
/// Must run on the same thread that owns `module`'s heap: Starlark's
/// `Module`/`Value` types are not `Send`, so this function is only ever
/// called from a session's dedicated worker thread (see `session.rs`).
pub fn evaluate(source: &str, module: &Module, globals: &Globals, fs_ctx: &FsContext) -> EngineOutcome {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return EngineOutcome::empty_success();
    }

    let ast = match AstModule::parse("<session>", trimmed.to_owned(), &Dialect::Extended) {
        Ok(ast) => ast,
        Err(err) => return syntax_error_outcome(&err),
    };

    let printer = CapturingPrinter {
        buf: Mutex::new(String::new()),
    };

    let mut eval = Evaluator::new(module);
    eval.set_print_handler(&printer);
    eval.extra = Some(fs_ctx);

    let result = eval.eval_module(ast, globals);
    drop(eval);

    let stdout = printer.buf.into_inner().unwrap_or_else(|poison| poison.into_inner());

    match result {
        Ok(value) => {
            let value = if value.is_none() {
                None
            } else {
                Some(safe_repr(value))
            };
            EngineOutcome {
                success: true,
                stdout,
                stderr: String::new(),
                value,
                error: None,
            }
        }
        Err(err) => {
            let error = classify_error(&err);
            EngineOutcome {
                success: false,
                stdout,
                stderr: error.traceback.join("\n") + "\n",
                value: None,
                error: Some(error),
            }
        }
    }
}

fn syntax_error_outcome(err: &anyhow::Error) -> EngineOutcome {
    let message = err.to_string();
    let traceback: Vec<String> = format!("{err:#}").lines().map(str::to_owned).collect();
    EngineOutcome {
        success: false,
        stdout: String::new(),
        stderr: traceback.join("\n") + "\n",
        value: None,
        error: Some(ExecutionError {
            kind: "SyntaxError".to_string(),
            message,
            traceback,
        }),
    }
}

/// Starlark's runtime errors don't carry a machine-checkable kind tag the
/// way Python exceptions do, so the taxonomy is recovered from the rendered
/// message. Good enough for the scenarios this service needs to distinguish
/// (division by zero, unbound names); everything else falls back to
/// `RuntimeError`.
fn classify_error(err: &anyhow::Error) -> ExecutionError {
    let message = err.to_string();
    let traceback: Vec<String> = format!("{err:#}").lines().map(str::to_owned).collect();
    let lower = message.to_lowercase();

    let kind = if lower.contains("divi") && lower.contains("zero") {
        "ZeroDivisionError"
    } else if lower.contains("not defined") || lower.contains("not found") && lower.contains("variable") {
        "NameError"
    } else if lower.contains("type") && (lower.contains("expected") || lower.contains("mismatch")) {
        "TypeError"
    } else if lower.contains("index") && lower.contains("range") {
        "IndexError"
    } else {
        "RuntimeError"
    };

    ExecutionError {
        kind: kind.to_string(),
        message,
        traceback,
    }
}

/// Builds the `Globals` shared by every session: the Starlark standard
/// library extended with the injected filesystem helpers (spec §4.2). Built
/// once at process startup.
pub fn build_globals() -> Globals {
    starlark::environment::GlobalsBuilder::extended_by(&[starlark::environment::LibraryExtension::StructType])
        .with(crate::fs_helpers::filesystem_helpers)
        .build()
}

/// Three sentinel bindings every namespace starts (and, after `reset`, ends
/// up back at): `__name__`, `__doc__`, and the stable session-id entry.
pub const SENTINEL_NAMES: [&str; 3] = ["__name__", "__doc__", "__session_id__"];

pub fn inject_sentinels(module: &Module, session_id: &str) {
    let heap = module.heap();
    module.set("__name__", heap.alloc_str("__main__").to_value());
    module.set("__doc__", Value::new_none());
    module.set("__session_id__", heap.alloc_str(session_id).to_value());
}

pub const HELPER_NAMES: [&str; 14] = [
    "cd", "pwd", "ls", "cat", "mkdir", "touch", "rm", "cp", "mv", "write", "exists", "isfile", "isdir", "abspath",
];

/// Names excluded from `list_variables`: the sentinels, the injected
/// helpers, and (by the session's own convention, spec §4.3) any name
/// beginning with `_`. This table only covers the first two; the
/// leading-underscore rule is applied by the caller.
pub fn is_hidden_name(name: &str) -> bool {
    SENTINEL_NAMES.contains(&name) || HELPER_NAMES.contains(&name) || name.starts_with('_')
}

/// A namespace entry's name, runtime-kind name, and safe-printed
/// representation (spec §3 "Variable descriptor").
#[derive(Debug, Clone, Serialize)]
pub struct VariableDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
}

/// Looks up a single binding by name, regardless of whether it would be
/// hidden from `list_variables`. `get_variables` is a targeted lookup (spec
/// §4.3: "descriptor or null if absent"), not a re-application of
/// `list_variables`'s hiding rule — a user who explicitly asks for `_x` (or
/// even a sentinel name) gets its real descriptor back, not `null`.
pub fn describe_variable(module: &Module, name: &str) -> Option<VariableDescriptor> {
    let value = module.get(name)?;
    Some(VariableDescriptor {
        name: name.to_string(),
        type_name: value.get_type().to_string(),
        repr: safe_repr(value),
    })
}

/// Every visible namespace entry, excluding sentinels, helpers, and any
/// name starting with `_` (spec §4.3 `list_variables`).
pub fn list_variables(module: &Module) -> Vec<VariableDescriptor> {
    module
        .names()
        .filter(|name| !is_hidden_name(name.as_str()))
        .filter_map(|name| describe_variable(module, name.as_str()))
        .collect()
}
