//! End-to-end HTTP surface tests: spec §6, exercised via `tower::ServiceExt::oneshot`
//! rather than a bound socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use py_session_service::config::Config;
use py_session_service::http::{build_router, AppState};
use py_session_service::manager::SessionManager;
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "test-secret-token";

fn test_config() -> Config {
    Config {
        token: TOKEN.to_string(),
        port: 0,
        workdir: std::env::temp_dir(),
        default_timeout: Some(Duration::from_secs(5)),
        history_capacity: 100,
    }
}

fn app() -> Router {
    let config = test_config();
    let manager = SessionManager::new(config.workdir.clone(), config.default_timeout, config.history_capacity);
    let state = Arc::new(AppState { manager, config });
    build_router(state)
}

fn loopback_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 54321)
}

fn non_loopback_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 54321)
}

fn authenticated_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let body = body.map(|v| v.to_string()).unwrap_or_default();
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json");
    builder.extensions_mut().expect("request builder").insert(ConnectInfo(loopback_addr()));
    builder.body(Body::from(body)).expect("valid request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body");
    serde_json::from_slice(&bytes).expect("valid json")
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn missing_auth_header_is_rejected() {
    let mut request = Request::builder().uri("/v1/sessions").body(Body::empty()).expect("request");
    request.extensions_mut().insert(ConnectInfo(loopback_addr()));
    let response = app().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let mut request = Request::builder()
        .uri("/v1/sessions")
        .header(header::AUTHORIZATION, "Bearer not-the-token")
        .body(Body::empty())
        .expect("request");
    request.extensions_mut().insert(ConnectInfo(loopback_addr()));
    let response = app().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_loopback_source_is_forbidden() {
    let mut request = Request::builder()
        .uri("/v1/sessions")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .expect("request");
    request.extensions_mut().insert(ConnectInfo(non_loopback_addr()));
    let response = app().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let response = app()
        .oneshot(authenticated_request("GET", "/v1/session/does-not-exist/info", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_session_lifecycle() {
    let app = app();

    let start = app
        .clone()
        .oneshot(authenticated_request("POST", "/v1/session/start", Some(json!({}))))
        .await
        .expect("start response");
    assert_eq!(start.status(), StatusCode::OK);
    let start_body = json_body(start).await;
    let session_id = start_body["session_id"].as_str().expect("session_id").to_string();

    let exec = app
        .clone()
        .oneshot(authenticated_request(
            "POST",
            &format!("/v1/session/{session_id}/exec"),
            Some(json!({"code": "1 + 2"})),
        ))
        .await
        .expect("exec response");
    assert_eq!(exec.status(), StatusCode::OK);
    let exec_body = json_body(exec).await;
    assert_eq!(exec_body["success"], true);
    assert_eq!(exec_body["value"], "3");
    assert_eq!(exec_body["execution_count"], 1);

    let exec2 = app
        .clone()
        .oneshot(authenticated_request(
            "POST",
            &format!("/v1/session/{session_id}/exec"),
            Some(json!({"code": "x = 10\ny = 20\nx + y"})),
        ))
        .await
        .expect("exec2 response");
    let exec2_body = json_body(exec2).await;
    assert_eq!(exec2_body["value"], "30");
    assert_eq!(exec2_body["execution_count"], 2);

    let vars = app
        .clone()
        .oneshot(authenticated_request(
            "POST",
            &format!("/v1/session/{session_id}/vars/get"),
            Some(json!({"names": ["x", "y", "z"]})),
        ))
        .await
        .expect("vars response");
    let vars_body = json_body(vars).await;
    assert_eq!(vars_body["values"]["x"]["repr"], "10");
    assert_eq!(vars_body["values"]["y"]["repr"], "20");
    assert!(vars_body["values"]["z"].is_null());

    let history = app
        .clone()
        .oneshot(authenticated_request(
            "GET",
            &format!("/v1/session/{session_id}/history?n=10"),
            None,
        ))
        .await
        .expect("history response");
    let history_body = json_body(history).await;
    assert_eq!(history_body["total"], 2);

    let reset = app
        .clone()
        .oneshot(authenticated_request(
            "POST",
            &format!("/v1/session/{session_id}/reset"),
            Some(json!({})),
        ))
        .await
        .expect("reset response");
    assert_eq!(reset.status(), StatusCode::OK);

    let history_after_reset = app
        .clone()
        .oneshot(authenticated_request(
            "GET",
            &format!("/v1/session/{session_id}/history"),
            None,
        ))
        .await
        .expect("history response");
    let history_after_reset_body = json_body(history_after_reset).await;
    assert_eq!(history_after_reset_body["total"], 0);

    let close = app
        .clone()
        .oneshot(authenticated_request("DELETE", &format!("/v1/session/{session_id}"), None))
        .await
        .expect("close response");
    assert_eq!(close.status(), StatusCode::OK);

    let info_after_close = app
        .oneshot(authenticated_request("GET", &format!("/v1/session/{session_id}/info"), None))
        .await
        .expect("info response");
    assert_eq!(info_after_close.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn division_by_zero_is_reported_as_user_code_error() {
    let app = app();
    let start_body = json_body(
        app.clone()
            .oneshot(authenticated_request("POST", "/v1/session/start", Some(json!({}))))
            .await
            .expect("start response"),
    )
    .await;
    let session_id = start_body["session_id"].as_str().expect("session_id").to_string();

    let exec = app
        .oneshot(authenticated_request(
            "POST",
            &format!("/v1/session/{session_id}/exec"),
            Some(json!({"code": "1 // 0"})),
        ))
        .await
        .expect("exec response");
    assert_eq!(exec.status(), StatusCode::OK);
    let body = json_body(exec).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "ZeroDivisionError");
}

#[tokio::test]
async fn invalid_workdir_on_start_is_bad_request() {
    let response = app()
        .oneshot(authenticated_request(
            "POST",
            "/v1/session/start",
            Some(json!({"workdir": "/definitely/not/a/real/path"})),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
