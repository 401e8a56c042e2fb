//! The session manager: spec §4.4. Owns the id → session mapping.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use starlark::environment::Globals;
use tokio::sync::Mutex;

use crate::chdir_arbiter::ChdirArbiter;
use crate::error::ServiceError;
use crate::session::{Session, SessionInfo};

fn generate_session_id() -> String {
    let mut bytes = [0u8; 12]; // 96 bits of entropy, spec §3.
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    globals: Arc<Globals>,
    chdir_arbiter: Arc<ChdirArbiter>,
    default_workdir: PathBuf,
    default_timeout: Option<Duration>,
    history_capacity: usize,
}

impl SessionManager {
    pub fn new(default_workdir: PathBuf, default_timeout: Option<Duration>, history_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            globals: Arc::new(crate::engine::build_globals()),
            chdir_arbiter: Arc::new(ChdirArbiter::new()),
            default_workdir,
            default_timeout,
            history_capacity,
        }
    }

    /// Validates `workdir` (if given) and allocates a new session. Mutually
    /// exclusive with other `create`/`close` calls via the sessions map's
    /// own lock; never blocks on any in-flight `execute` (spec §4.4).
    pub async fn create(&self, workdir: Option<PathBuf>) -> Result<Arc<Session>, ServiceError> {
        let workdir = match workdir {
            Some(candidate) => candidate
                .canonicalize()
                .map_err(|_| ServiceError::InvalidArgument(format!("workdir does not exist: {}", candidate.display())))
                .and_then(|canonical| {
                    if canonical.is_dir() {
                        Ok(canonical)
                    } else {
                        Err(ServiceError::InvalidArgument(format!(
                            "workdir is not a directory: {}",
                            candidate.display()
                        )))
                    }
                })?,
            None => self.default_workdir.clone(),
        };

        let mut sessions = self.sessions.lock().await;

        let id = loop {
            let candidate = generate_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(
            Session::new(
                id.clone(),
                workdir,
                Arc::clone(&self.globals),
                Arc::clone(&self.chdir_arbiter),
                self.default_timeout,
                self.history_capacity,
            )
            .map_err(ServiceError::Internal)?,
        );

        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).filter(|s| !s.is_closed()).cloned()
    }

    /// Closes and removes the session. Idempotent in effect: a missing id
    /// is reported as not-found rather than silently succeeding (spec
    /// §4.4).
    pub async fn close(&self, id: &str) -> Result<(), ServiceError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(id) {
            Some(session) => {
                session.close();
                Ok(())
            }
            None => Err(ServiceError::SessionNotFound(id.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|s| !s.is_closed()).map(|s| s.info()).collect()
    }

    /// Drops any entries left in the map whose session is already closed.
    /// Under this manager's own `close`, sessions are removed from the map
    /// at close time, so this is a defensive sweep rather than a load-
    /// bearing part of the lifecycle.
    pub async fn cleanup_closed(&self) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, session| !session.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(std::env::temp_dir(), Some(Duration::from_secs(5)), 100)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_then_get_round_trips() {
        let mgr = manager();
        let session = mgr.create(None).await.expect("create");
        let fetched = mgr.get(&session.id).await.expect("present");
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_removes_from_map_and_is_idempotent_in_effect() {
        let mgr = manager();
        let session = mgr.create(None).await.expect("create");
        mgr.close(&session.id).await.expect("close");
        assert!(mgr.get(&session.id).await.is_none());
        assert!(matches!(mgr.close(&session.id).await, Err(ServiceError::SessionNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_rejects_missing_workdir() {
        let mgr = manager();
        let result = mgr.create(Some(PathBuf::from("/does/not/exist/at/all"))).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn list_reflects_only_open_sessions() {
        let mgr = manager();
        let a = mgr.create(None).await.expect("create a");
        let _b = mgr.create(None).await.expect("create b");
        mgr.close(&a.id).await.expect("close a");

        let infos = mgr.list().await;
        assert_eq!(infos.len(), 1);
        assert_ne!(infos[0].session_id, a.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_with_explicit_workdir_uses_it() {
        let mgr = manager();
        let dir = tempdir().expect("tempdir");
        let session = mgr.create(Some(dir.path().to_path_buf())).await.expect("create");
        assert_eq!(session.workdir(), dir.path().canonicalize().expect("canonicalize"));
    }
}
