//! Process entry point: loads configuration, initializes logging, and
//! serves the HTTP surface (spec §4.6-§4.8, §6).

use std::net::SocketAddr;
use std::sync::Arc;

use py_session_service::config::Config;
use py_session_service::http::{self, AppState};
use py_session_service::manager::SessionManager;

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = ?err, "configuration is invalid; refusing to start");
            std::process::exit(1);
        }
    };

    let port = config.port;
    let manager = SessionManager::new(config.workdir.clone(), config.default_timeout, config.history_capacity);
    let state = Arc::new(AppState { manager, config });
    let app = http::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = ?err, %addr, "could not bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "py-session-service listening");

    if let Err(err) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = ?err, "server exited with an error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::warn!(error = ?err, "could not install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
