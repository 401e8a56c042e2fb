//! Service-level error taxonomy: spec §7, minus the *User-code error*
//! category, which never becomes a `ServiceError` — it stays inside a
//! successful `ExecutionResult` (see `engine.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Configuration-fatal, Authentication, Not-found, Invalid-argument, and
/// Service-internal, per spec §7.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing Authorization header")]
    MissingAuthHeader,
    #[error("malformed Authorization header")]
    MalformedAuthHeader,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("request did not originate from a loopback address")]
    NonLocalSource,

    #[error("unknown session id {0}; create a session first via POST /v1/session/start")]
    SessionNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    traceback: Option<Vec<String>>,
}

impl ServiceError {
    fn kind(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "ConfigurationError",
            ServiceError::MissingAuthHeader => "MissingAuthHeader",
            ServiceError::MalformedAuthHeader => "MalformedAuthHeader",
            ServiceError::InvalidToken => "InvalidToken",
            ServiceError::NonLocalSource => "NonLocalSource",
            ServiceError::SessionNotFound(_) => "NotFound",
            ServiceError::InvalidArgument(_) => "InvalidArgument",
            ServiceError::Internal(_) => "InternalError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::MissingAuthHeader | ServiceError::MalformedAuthHeader | ServiceError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::NonLocalSource => StatusCode::FORBIDDEN,
            ServiceError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind().to_string();

        // The message text never includes the configured token: none of the
        // variants above ever carry it, by construction (auth middleware
        // reports only which check failed, never the value it compared).
        let message = self.to_string();

        let traceback = match &self {
            ServiceError::Internal(err) => {
                tracing::error!(error = ?err, "unhandled internal error");
                Some(format!("{err:#}").lines().map(str::to_owned).collect())
            }
            other => {
                tracing::debug!(kind = %kind, "request rejected: {other}");
                None
            }
        };

        (status, Json(ErrorBody { kind, message, traceback })).into_response()
    }
}
