//! REST API handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::LaserError;
use crate::ports;
use crate::server::AppState;
use crate::session::{ConnectTarget, PowerConfig, PulseUpdate};

/// API error response body.
#[derive(Serialize)]
struct ApiError {
    error: String,
}

fn failure(error: LaserError) -> Response {
    let status = match &error {
        LaserError::NotOpen | LaserError::AlreadyOpen(_) => StatusCode::CONFLICT,
        LaserError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        LaserError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        LaserError::OpenFailed { .. } | LaserError::Disconnected { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// List the serial devices currently enumerable.
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Response {
    match ports::list_serial_ports(&state.device_dir) {
        Ok(devices) => Json(devices).into_response(),
        Err(error) => failure(error),
    }
}

/// Version of this control service.
pub async fn driver_version() -> impl IntoResponse {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Current session snapshot.
pub async fn session_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.snapshot())
}

/// Connect to a device by name or path.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(target): Json<ConnectTarget>,
) -> Response {
    info!(?target, "connect requested");
    match state.session.connect(target).await {
        Ok(()) => Json(state.session.snapshot()).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> Response {
    match state.session.disconnect().await {
        Ok(()) => Json(json!({ "status": "disconnected" })).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn reset(State(state): State<Arc<AppState>>) -> Response {
    match state.session.reset().await {
        Ok(()) => Json(json!({ "status": "reset" })).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn device_version(State(state): State<Arc<AppState>>) -> Response {
    match state.session.device_version().await {
        Ok(version) => Json(version).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn get_power(State(state): State<Arc<AppState>>) -> Response {
    match state.session.get_power().await {
        Ok(power) => Json(power).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn set_power(
    State(state): State<Arc<AppState>>,
    Json(power): Json<PowerConfig>,
) -> Response {
    match state.session.set_power(power.master_power).await {
        Ok(()) => Json(power).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn get_pulse(State(state): State<Arc<AppState>>) -> Response {
    match state.session.get_pulse_parameters().await {
        Ok(pulse) => Json(pulse).into_response(),
        Err(error) => failure(error),
    }
}

pub async fn set_pulse(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PulseUpdate>,
) -> Response {
    match state.session.set_pulse_parameters(update).await {
        Ok(()) => Json(state.session.snapshot()).into_response(),
        Err(error) => failure(error),
    }
}

/// Trigger arm request/response body.
#[derive(Serialize, Deserialize)]
pub struct TriggerState {
    pub armed: bool,
}

pub async fn get_trigger(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(TriggerState {
        armed: state.session.trigger_armed(),
    })
}

pub async fn set_trigger(
    State(state): State<Arc<AppState>>,
    Json(trigger): Json<TriggerState>,
) -> Response {
    match state.session.set_trigger_arm(trigger.armed).await {
        Ok(()) => Json(trigger).into_response(),
        Err(error) => failure(error),
    }
}
