//! Safe-repr formatting shared by the engine and the variable-inspection
//! endpoints: §3's "Variable descriptor" and §4.1's "Value printing".

use std::panic::{catch_unwind, AssertUnwindSafe};

use starlark::values::Value;

const MAX_REPR_CHARS: usize = 2000;

/// Best-effort printable form of a Starlark value.
///
/// `to_repr` on the builtin value types never panics, but a user-registered
/// native type theoretically could; `catch_unwind` is the one place in the
/// engine that treats a panic as data instead of letting it take the worker
/// thread down.
pub fn safe_repr(value: Value<'_>) -> String {
    let rendered = catch_unwind(AssertUnwindSafe(|| value.to_repr()))
        .unwrap_or_else(|_| format!("<unrepresentable: {}>", value.get_type()));
    truncate(rendered)
}

/// Truncates to 2000 characters, appending a `[truncated N chars]` marker.
pub fn truncate(s: String) -> String {
    let char_count = s.chars().count();
    if char_count <= MAX_REPR_CHARS {
        return s;
    }
    let head: String = s.chars().take(MAX_REPR_CHARS).collect();
    let remaining = char_count - MAX_REPR_CHARS;
    format!("{head} ... [truncated {remaining} chars]")
}
