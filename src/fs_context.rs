//! The context threaded into every filesystem helper invocation.
//!
//! Starlark's `Value`/`Module`/`Heap` types are not `Send`: a session's
//! evaluation state lives entirely on one dedicated OS thread (see
//! `session.rs`). The virtual working directory, by contrast, is read from
//! outside that thread too (session info, `list`), so it is the one piece of
//! per-session state that crosses thread boundaries, via a plain
//! `Arc<Mutex<PathBuf>>`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use starlark::any::ProvidesStaticType;

/// Shared, thread-safe handle to a session's virtual working directory.
///
/// Cloning is cheap (it's an `Arc`); every clone observes the same directory.
/// `ProvidesStaticType` is what lets this be stored behind
/// `Evaluator::extra` and recovered with `downcast_ref` in `fs_helpers.rs`.
#[derive(Clone, ProvidesStaticType)]
pub struct FsContext {
    workdir: Arc<Mutex<PathBuf>>,
}

impl FsContext {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir: Arc::new(Mutex::new(workdir)),
        }
    }

    pub fn get(&self) -> PathBuf {
        self.lock_workdir().clone()
    }

    pub fn set(&self, dir: PathBuf) {
        *self.lock_workdir() = dir;
    }

    fn lock_workdir(&self) -> std::sync::MutexGuard<'_, PathBuf> {
        self.workdir.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
