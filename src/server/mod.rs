//! HTTP control server.
//!
//! Exposes the device session as a small REST API plus a WebSocket endpoint
//! for bidirectional parameter streaming. The RPC surface is a thin adapter:
//! every route maps one-to-one onto a session operation.

mod api;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::session::DeviceSession;

/// Shared state for request handlers.
pub struct AppState {
    pub session: Arc<DeviceSession>,
    /// Directory listed by the device enumeration endpoint.
    pub device_dir: PathBuf,
}

/// Serve the control API until the process exits.
pub async fn run(
    session: Arc<DeviceSession>,
    device_dir: PathBuf,
    bind: &str,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        session,
        device_dir,
    });

    let app = Router::new()
        .route("/api/devices", get(api::list_devices))
        .route("/api/driver", get(api::driver_version))
        .route("/api/session", get(api::session_state))
        .route("/api/connect", post(api::connect))
        .route("/api/disconnect", post(api::disconnect))
        .route("/api/reset", post(api::reset))
        .route("/api/version", get(api::device_version))
        .route("/api/power", get(api::get_power).put(api::set_power))
        .route("/api/pulse", get(api::get_pulse).put(api::set_pulse))
        .route("/api/trigger", get(api::get_trigger).put(api::set_trigger))
        .route("/api/stream", get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "control server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
