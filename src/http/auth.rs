//! Auth middleware: spec §4.8/§7. Applied to every `/v1/*` route; `/health`
//! is the one unauthenticated route and never passes through here.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServiceError;
use crate::http::AppState;

fn is_loopback(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

pub async fn require_local_and_token(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if !is_loopback(&addr) {
        return Err(ServiceError::NonLocalSource);
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(ServiceError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| ServiceError::MalformedAuthHeader)?;

    let token = header.strip_prefix("Bearer ").ok_or(ServiceError::MalformedAuthHeader)?;

    if token != state.config.token {
        return Err(ServiceError::InvalidToken);
    }

    Ok(next.run(request).await)
}
