//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use netcafe_discovery::{CycleSummary, NeighborStrategy};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// List all tracked devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Get a specific device by IP address
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let Ok(address) = ip.parse::<Ipv4Addr>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!("Invalid IPv4 address: {}", ip))),
        )
            .into_response();
    };

    match state.scanner.get_device(address).await {
        Some(device) => Json(device).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
    }
}

/// Room occupancy
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.rooms().await)
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub strategy: Option<NeighborStrategy>,
    pub degraded: bool,
    pub poll_interval_secs: u64,
    pub tracked: usize,
    pub online: usize,
    pub last_cycle: Option<CycleSummary>,
}

/// Scanner status
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.devices().await;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        strategy: state.scanner.neighbor_strategy(),
        degraded: state.scanner.is_degraded(),
        poll_interval_secs: state.scanner.config().interval_secs,
        tracked: devices.len(),
        online: devices.iter().filter(|d| d.online).count(),
        last_cycle: state.scanner.last_cycle().await,
    })
}

/// Run a presence cycle now
pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual scan triggered");

    match state.scanner.force_cycle().await {
        Ok(cycle) => Json(serde_json::json!({
            "status": "completed",
            "probed": cycle.probed.len(),
            "reachable": cycle.reachable.len(),
            "transitions": cycle.transitions,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Scan failed: {}", e))),
        )
            .into_response(),
    }
}

/// Re-read the configuration file
pub async fn reload_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!(path = %state.config_path.display(), "Configuration reload requested");

    match state.reload().await {
        Ok(summary) => Json(serde_json::json!({
            "status": "reloaded",
            "added": summary.added,
            "removed": summary.removed,
            "kept": summary.kept.len(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError::new(format!("Reload failed: {:#}", e))),
        )
            .into_response(),
    }
}
