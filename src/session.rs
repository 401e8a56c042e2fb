//! A single execution session: spec §4.3.
//!
//! Starlark's `Module`/`Value`/`Heap` types are not `Send`, so a session's
//! namespace cannot live behind a `tokio::sync::Mutex` accessed from
//! arbitrary worker-pool threads the way the rest of this service's shared
//! state does. Instead each session owns a dedicated OS thread that is the
//! sole, permanent owner of its `Module`; the async side talks to it over a
//! small request/reply channel. This also gives the session's "serialization
//! primitive" for free in the happy path (the channel is drained one message
//! at a time), with an explicit `tokio::sync::Mutex` still guarding
//! `execute` so that execution-counter assignment and history ordering are
//! correct under concurrent callers (see the module-level ordering note in
//! spec §5).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Local};
use serde::Serialize;
use starlark::environment::{Globals, Module};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::chdir_arbiter::ChdirArbiter;
use crate::engine::{self, EngineOutcome, ExecutionError, VariableDescriptor};
use crate::error::ServiceError;
use crate::fs_context::FsContext;
use crate::history::{HistoryEntry, HistoryRing};

enum WorkerRequest {
    Exec {
        source: String,
        reply: oneshot::Sender<EngineOutcome>,
    },
    ListVariables {
        reply: oneshot::Sender<Vec<VariableDescriptor>>,
    },
    GetVariables {
        names: Vec<String>,
        reply: oneshot::Sender<Vec<(String, Option<VariableDescriptor>)>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

fn run_worker(rx: std_mpsc::Receiver<WorkerRequest>, globals: Arc<Globals>, fs_ctx: FsContext, session_id: String) {
    let mut module = Module::new();
    engine::inject_sentinels(&module, &session_id);

    while let Ok(request) = rx.recv() {
        match request {
            WorkerRequest::Exec { source, reply } => {
                let outcome = engine::evaluate(&source, &module, &globals, &fs_ctx);
                let _ = reply.send(outcome);
            }
            WorkerRequest::ListVariables { reply } => {
                let _ = reply.send(engine::list_variables(&module));
            }
            WorkerRequest::GetVariables { names, reply } => {
                let resolved = names
                    .into_iter()
                    .map(|name| {
                        let descriptor = engine::describe_variable(&module, &name);
                        (name, descriptor)
                    })
                    .collect();
                let _ = reply.send(resolved);
            }
            WorkerRequest::Reset { reply } => {
                module = Module::new();
                engine::inject_sentinels(&module, &session_id);
                let _ = reply.send(());
            }
        }
    }
}

/// Fields of an execution result, plus the execution-counter value only a
/// session can assign (spec §3 "Execution result").
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub value: Option<String>,
    pub error: Option<ExecutionError>,
    pub timed_out: bool,
    pub execution_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: String,
    pub execution_count: u64,
    pub closed: bool,
    pub uptime_seconds: f64,
    pub workdir: String,
}

pub struct Session {
    pub id: String,
    created_at: DateTime<Local>,
    counter: AtomicU64,
    closed: AtomicBool,
    fs_ctx: FsContext,
    history: AsyncMutex<HistoryRing>,
    exec_lock: AsyncMutex<()>,
    worker: StdMutex<Option<std_mpsc::Sender<WorkerRequest>>>,
    default_timeout: Option<Duration>,
    chdir_arbiter: Arc<ChdirArbiter>,
}

impl Session {
    pub fn new(
        id: String,
        workdir: PathBuf,
        globals: Arc<Globals>,
        chdir_arbiter: Arc<ChdirArbiter>,
        default_timeout: Option<Duration>,
        history_capacity: usize,
    ) -> anyhow::Result<Self> {
        let fs_ctx = FsContext::new(workdir);
        let (tx, rx) = std_mpsc::channel();

        let worker_fs_ctx = fs_ctx.clone();
        let worker_id = id.clone();
        std::thread::Builder::new()
            .name(format!("session-{id}"))
            .spawn(move || run_worker(rx, globals, worker_fs_ctx, worker_id))
            .context("failed to spawn session worker thread")?;

        Ok(Self {
            id,
            created_at: Local::now(),
            counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            fs_ctx,
            history: AsyncMutex::new(HistoryRing::new(history_capacity)),
            exec_lock: AsyncMutex::new(()),
            worker: StdMutex::new(Some(tx)),
            default_timeout,
            chdir_arbiter,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn workdir(&self) -> PathBuf {
        self.fs_ctx.get()
    }

    pub fn info(&self) -> SessionInfo {
        let uptime_seconds = (Local::now() - self.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at.to_rfc3339(),
            execution_count: self.counter.load(Ordering::SeqCst),
            closed: self.is_closed(),
            uptime_seconds,
            workdir: self.fs_ctx.get().display().to_string(),
        }
    }

    fn sender(&self) -> Result<std_mpsc::Sender<WorkerRequest>, ServiceError> {
        self.worker
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("session worker is no longer running")))
    }

    fn check_open(&self) -> Result<(), ServiceError> {
        if self.is_closed() {
            return Err(ServiceError::SessionNotFound(self.id.clone()));
        }
        Ok(())
    }

    /// Executes `source` against this session's namespace. The effective
    /// timeout is `timeout_override` if given, else the service default
    /// (`None` disables timeouts entirely). The session's serialization
    /// primitive (`exec_lock`) is released automatically when this function
    /// returns, including on the timeout path: that's what lets a
    /// straggling worker thread's eventual result fall on the floor
    /// (spec §4.3, §9 "Cooperative timeout").
    ///
    /// The process-wide chdir arbiter (spec §4.5) is pinned and released
    /// from here, not from the worker thread: the worker's evaluation is not
    /// forcibly cancellable, so if the pin were held for its full,
    /// unbounded span, one session's timed-out call would keep every other
    /// session's `exec` blocked behind it. Pinning it around this bounded
    /// timeout race instead means the arbiter is always released when this
    /// call stops waiting, whether or not the worker has actually finished.
    pub async fn execute(
        &self,
        source: String,
        timeout_override: Option<Duration>,
    ) -> Result<ExecutionResult, ServiceError> {
        self.check_open()?;
        let _guard = self.exec_lock.lock().await;
        self.check_open()?;

        let execution_count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let effective_timeout = timeout_override.or(self.default_timeout);

        let sender = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let workdir = self.fs_ctx.get();
        let chdir_guard = self.chdir_arbiter.pin(&workdir).await;

        sender
            .send(WorkerRequest::Exec {
                source: source.clone(),
                reply: reply_tx,
            })
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker is no longer running")))?;

        let (outcome, timed_out) = match effective_timeout {
            Some(duration) => match tokio::time::timeout(duration, reply_rx).await {
                Ok(Ok(outcome)) => (outcome, false),
                Ok(Err(_)) => {
                    return Err(ServiceError::Internal(anyhow::anyhow!(
                        "session worker dropped without replying"
                    )))
                }
                Err(_) => (
                    EngineOutcome {
                        success: false,
                        stdout: String::new(),
                        stderr: String::new(),
                        value: None,
                        error: Some(ExecutionError {
                            kind: "TimeoutError".to_string(),
                            message: format!("execution exceeded {duration:?}"),
                            traceback: Vec::new(),
                        }),
                    },
                    true,
                ),
            },
            None => match reply_rx.await {
                Ok(outcome) => (outcome, false),
                Err(_) => {
                    return Err(ServiceError::Internal(anyhow::anyhow!(
                        "session worker dropped without replying"
                    )))
                }
            },
        };

        // Released here regardless of whether the worker thread itself has
        // finished; see the doc comment above.
        drop(chdir_guard);

        let result = ExecutionResult {
            success: outcome.success,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            value: outcome.value,
            error: outcome.error,
            timed_out,
            execution_count,
        };

        self.history.lock().await.push(HistoryEntry {
            execution_count: result.execution_count,
            source,
            success: result.success,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            value: result.value.clone(),
            error: result.error.clone(),
            timed_out: result.timed_out,
        });

        Ok(result)
    }

    pub async fn list_variables(&self) -> Result<Vec<VariableDescriptor>, ServiceError> {
        self.check_open()?;
        let sender = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(WorkerRequest::ListVariables { reply: reply_tx })
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker is no longer running")))?;
        reply_rx
            .await
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker dropped without replying")))
    }

    pub async fn get_variables(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<(String, Option<VariableDescriptor>)>, ServiceError> {
        self.check_open()?;
        let sender = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(WorkerRequest::GetVariables { names, reply: reply_tx })
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker is no longer running")))?;
        reply_rx
            .await
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker dropped without replying")))
    }

    pub async fn get_history(&self, n: i64) -> Result<Vec<HistoryEntry>, ServiceError> {
        self.check_open()?;
        Ok(self.history.lock().await.last_n(n))
    }

    /// Clears the namespace back to the three sentinels and all helpers,
    /// resets the execution counter, and empties history. Does not change
    /// the virtual workdir (spec §4.3).
    pub async fn reset(&self) -> Result<(), ServiceError> {
        self.check_open()?;
        let _guard = self.exec_lock.lock().await;
        self.check_open()?;

        let sender = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(WorkerRequest::Reset { reply: reply_tx })
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker is no longer running")))?;
        reply_rx
            .await
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session worker dropped without replying")))?;

        self.counter.store(0, Ordering::SeqCst);
        self.history.lock().await.clear();
        Ok(())
    }

    /// Idempotent: closing a session twice leaves identical observable
    /// state (spec §8 Testable Properties, "Idempotence of close").
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut guard = self.worker.lock().unwrap_or_else(|poison| poison.into_inner());
        // Dropping the sender makes the worker thread's `recv` return `Err`,
        // which ends its loop and lets the thread exit.
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::engine::build_globals;

    fn new_session(workdir: PathBuf) -> Session {
        Session::new(
            "test-session".to_string(),
            workdir,
            Arc::new(build_globals()),
            Arc::new(ChdirArbiter::new()),
            Some(Duration::from_secs(5)),
            100,
        )
        .expect("failed to start session worker")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn counter_is_monotonic_and_resets() {
        let dir = tempdir().expect("tempdir");
        let session = new_session(dir.path().to_path_buf());

        let r1 = session.execute("1 + 1".to_string(), None).await.expect("exec 1");
        assert_eq!(r1.execution_count, 1);
        let r2 = session.execute("2 + 2".to_string(), None).await.expect("exec 2");
        assert_eq!(r2.execution_count, 2);

        session.reset().await.expect("reset");
        let r3 = session.execute("3 + 3".to_string(), None).await.expect("exec 3");
        assert_eq!(r3.execution_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn namespace_persists_and_round_trips_through_vars() {
        let dir = tempdir().expect("tempdir");
        let session = new_session(dir.path().to_path_buf());

        let result = session.execute("x = 41\nx + 1".to_string(), None).await.expect("exec");
        assert_eq!(result.value.as_deref(), Some("42"));

        let values = session
            .get_variables(vec!["x".to_string(), "missing".to_string()])
            .await
            .expect("get_variables");
        let x = values.iter().find(|(name, _)| name == "x").expect("x present");
        assert_eq!(x.1.as_ref().expect("x has a descriptor").repr, "41");
        let missing = values.iter().find(|(name, _)| name == "missing").expect("present");
        assert!(missing.1.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_sessions_are_isolated() {
        let dir_a = tempdir().expect("tempdir");
        let dir_b = tempdir().expect("tempdir");
        let a = new_session(dir_a.path().to_path_buf());
        let b = new_session(dir_b.path().to_path_buf());

        a.execute("x = 1".to_string(), None).await.expect("exec a");
        b.execute("x = 2".to_string(), None).await.expect("exec b");

        let a_vars = a.get_variables(vec!["x".to_string()]).await.expect("vars a");
        let b_vars = b.get_variables(vec!["x".to_string()]).await.expect("vars b");
        assert_eq!(a_vars[0].1.as_ref().expect("present").repr, "1");
        assert_eq!(b_vars[0].1.as_ref().expect("present").repr, "2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_produces_timeout_result_and_session_stays_usable() {
        let dir = tempdir().expect("tempdir");
        let session = new_session(dir.path().to_path_buf());

        // Starlark has no `while` statement (loops are always over a finite
        // iterable, by design); a large bounded `for` is the idiomatic way
        // to write something that will reliably blow past a tiny timeout.
        let result = session
            .execute(
                "for _ in range(1000000000):\n    pass".to_string(),
                Some(Duration::from_millis(30)),
            )
            .await
            .expect("exec times out rather than erroring");
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.error.expect("timeout error").kind, "TimeoutError");

        // A fresh, independent session must still work; the spec only
        // requires the *session* to remain serializable, not that this
        // exact straggling worker thread be reclaimed.
        let other = new_session(dir.path().to_path_buf());
        let ok = other.execute("1".to_string(), None).await.expect("exec");
        assert!(ok.success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let session = new_session(dir.path().to_path_buf());
        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(session.execute("1".to_string(), None).await.is_err());
    }
}
