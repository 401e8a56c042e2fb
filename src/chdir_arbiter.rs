//! The cross-session chdir arbiter: spec §4.5.
//!
//! The process has exactly one real working directory, shared by every
//! thread; each session's helpers instead resolve paths against a virtual
//! workdir (`fs_context.rs`) and never touch the real one. But user code
//! can still reach host primitives that *do* consult the process cwd (the
//! spec calls out "subprocess, file I/O through non-helper channels").
//! This arbiter is the strict mutex that pins the real cwd to one session's
//! virtual workdir for the span of that session's evaluation call, and
//! restores the prior value afterwards no matter the outcome.
//!
//! The evaluation itself runs to completion on a session's dedicated worker
//! thread and is not forcibly cancellable (spec §9 "Cooperative timeout").
//! If the pin-and-restore were held for the full, unbounded span of that
//! call, one session's timed-out, still-running execution would keep every
//! *other* session's next `exec` blocked on this process-wide lock for as
//! long as the straggler runs — an isolation violation, not an accepted
//! cost. So the pin is instead taken and released from the async side
//! (`Session::execute`), bounded by the same effective timeout that bounds
//! the call: the guard is always dropped, restoring the real cwd and
//! releasing the arbiter, at the point the caller gives up waiting, whether
//! or not the worker thread has actually finished.

use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, MutexGuard};

pub struct ChdirArbiter {
    lock: Mutex<()>,
}

impl ChdirArbiter {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Acquires the arbiter and pins the real process cwd to `dir`. Returns
    /// a guard that restores the previous cwd and releases the arbiter when
    /// dropped — drop it (or let it go out of scope) as soon as the caller
    /// stops waiting on the pinned work, not when that work actually
    /// finishes.
    pub async fn pin(&self, dir: &Path) -> ChdirGuard<'_> {
        let guard = self.lock.lock().await;
        let previous = std::env::current_dir().ok();
        // A failed pin is not fatal to evaluation: helpers resolve paths
        // against the virtual workdir regardless, this only affects code
        // that bypasses the helpers to consult the real cwd directly.
        let _ = std::env::set_current_dir(dir);
        ChdirGuard {
            _lock: guard,
            previous,
        }
    }
}

impl Default for ChdirArbiter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChdirGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    previous: Option<PathBuf>,
}

impl Drop for ChdirGuard<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.previous.take() {
            let _ = std::env::set_current_dir(prev);
        }
    }
}
