//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use netcafe_core::{DeviceState, OccupancyChange, RoomStatus, Transition};
use netcafe_discovery::{CycleSummary, PresenceEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppEvent, AppState};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "snapshot")]
    Snapshot {
        devices: Vec<DeviceState>,
        rooms: Vec<RoomStatus>,
    },
    #[serde(rename = "transition")]
    Transition(Transition),
    #[serde(rename = "occupancy")]
    Occupancy(OccupancyChange),
    #[serde(rename = "cycle_completed")]
    CycleCompleted(CycleSummary),
    #[serde(rename = "cycle_failed")]
    CycleFailed { error: String },
    #[serde(rename = "devices_reloaded")]
    DevicesReloaded {
        added: usize,
        removed: usize,
        total: usize,
    },
    #[serde(rename = "pong")]
    Pong,
}

impl From<AppEvent> for WsMessage {
    fn from(event: AppEvent) -> Self {
        match event {
            AppEvent::Presence(PresenceEvent::Transition(t)) => WsMessage::Transition(t),
            AppEvent::Presence(PresenceEvent::CycleCompleted(s)) => WsMessage::CycleCompleted(s),
            AppEvent::Presence(PresenceEvent::CycleFailed { error }) => {
                WsMessage::CycleFailed { error }
            }
            AppEvent::Presence(PresenceEvent::DevicesReloaded {
                added,
                removed,
                total,
            }) => WsMessage::DevicesReloaded {
                added,
                removed,
                total,
            },
            AppEvent::Occupancy(change) => WsMessage::Occupancy(change),
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send current state on connect
    let snapshot = WsMessage::Snapshot {
        devices: state.devices().await,
        rooms: state.rooms().await,
    };
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    // Handle incoming messages and forward events
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = WsMessage::from(event);
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagging behind events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Handle ping/pong for keepalive
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
