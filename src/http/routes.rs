//! HTTP handlers: spec §6. Thin glue over `SessionManager`/`Session` —
//! request validation *is* argument validation (spec §7), so these bodies
//! are deserialized directly into the DTOs in `dto.rs` with no separate
//! schema layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;

use crate::error::ServiceError;
use crate::http::dto::{
    ExecRequest, ExecResponse, GetVarsRequest, GetVarsResponse, HealthResponse, HistoryQuery, HistoryResponse,
    ListSessionsResponse, StartSessionRequest, StartSessionResponse, StatusMessageResponse, VarsResponse,
};
use crate::http::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state.manager.list().await.len();
    Json(HealthResponse {
        status: "ok",
        service: "py-session-service",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions,
    })
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ServiceError> {
    let workdir = body.workdir.map(PathBuf::from);
    let session = state.manager.create(workdir).await?;
    let info = session.info();
    Ok(Json(StartSessionResponse {
        session_id: info.session_id,
        created_at: info.created_at,
        workdir: info.workdir,
        message: "session started".to_string(),
    }))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ListSessionsResponse> {
    let sessions = state.manager.list().await;
    Json(ListSessionsResponse {
        total: sessions.len(),
        sessions,
    })
}

async fn lookup(state: &AppState, id: &str) -> Result<Arc<crate::session::Session>, ServiceError> {
    state.manager.get(id).await.ok_or_else(|| ServiceError::SessionNotFound(id.to_string()))
}

pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::session::SessionInfo>, ServiceError> {
    let session = lookup(&state, &id).await?;
    Ok(Json(session.info()))
}

pub async fn exec(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecRequest>,
) -> Result<Json<ExecResponse>, ServiceError> {
    let session = lookup(&state, &id).await?;
    // A timeout of exactly 0 means "no timeout", matching the service
    // default's own 0-disables convention (spec §4.3/§6).
    let timeout_override = match body.timeout {
        None | Some(0.0) => None,
        Some(seconds) => Some(Duration::from_secs_f64(seconds.max(0.0))),
    };
    let result = session.execute(body.code, timeout_override).await?;
    Ok(Json(result))
}

pub async fn list_vars(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VarsResponse>, ServiceError> {
    let session = lookup(&state, &id).await?;
    let variables = session.list_variables().await?;
    Ok(Json(VarsResponse { variables }))
}

pub async fn get_vars(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<GetVarsRequest>,
) -> Result<Json<GetVarsResponse>, ServiceError> {
    let session = lookup(&state, &id).await?;
    let resolved = session.get_variables(body.names).await?;
    let values: HashMap<_, _> = resolved.into_iter().collect();
    Ok(Json(GetVarsResponse { values }))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ServiceError> {
    let session = lookup(&state, &id).await?;
    let entries = session.get_history(query.n.unwrap_or(0)).await?;
    Ok(Json(HistoryResponse {
        total: entries.len(),
        entries,
    }))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusMessageResponse>, ServiceError> {
    let session = lookup(&state, &id).await?;
    session.reset().await?;
    Ok(Json(StatusMessageResponse::ok("session reset")))
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusMessageResponse>, ServiceError> {
    state.manager.close(&id).await?;
    Ok(Json(StatusMessageResponse::ok("session closed")))
}
