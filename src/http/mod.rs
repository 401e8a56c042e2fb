//! The HTTP surface: spec §4.8/§6. Thin `axum` glue over the session
//! manager; the interesting behavior all lives in `engine`/`session`/
//! `manager`.

pub mod auth;
pub mod dto;
pub mod routes;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::config::Config;
use crate::manager::SessionManager;

pub struct AppState {
    pub manager: SessionManager,
    pub config: Config,
}

/// Builds the full router: `/health` unauthenticated, everything under
/// `/v1` behind `auth::require_local_and_token`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/v1/session/start", post(routes::start_session))
        .route("/v1/sessions", get(routes::list_sessions))
        .route("/v1/session/{id}/info", get(routes::session_info))
        .route("/v1/session/{id}/exec", post(routes::exec))
        .route("/v1/session/{id}/vars", get(routes::list_vars))
        .route("/v1/session/{id}/vars/get", post(routes::get_vars))
        .route("/v1/session/{id}/history", get(routes::history))
        .route("/v1/session/{id}/reset", post(routes::reset))
        .route("/v1/session/{id}", delete(routes::close_session))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_local_and_token,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(authenticated)
        .with_state(state)
}
