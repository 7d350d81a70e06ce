//! WebSocket stream of engine snapshots and alarms.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::engine::{AlarmEvent, EngineHandle, EngineSnapshot};
use crate::web::router::AppState;

/// Frames pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Snapshot(EngineSnapshot),
    Alarm(AlarmEvent),
}

impl StreamMessage {
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to serialize stream message: {}", e);
                None
            }
        }
    }
}

/// WebSocket upgrade handler.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state.handle))
}

async fn handle_websocket(socket: WebSocket, handle: EngineHandle) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!("WebSocket client connected: {}", client_id);

    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = handle.subscribe();
    let mut alarms = handle.alarms();

    let client_id_recv = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => debug!("Ignoring inbound frame from {}", client_id_recv),
                Err(e) => {
                    warn!("WebSocket error for client {}: {}", client_id_recv, e);
                    break;
                }
            }
        }
    });

    let client_id_send = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        let initial = StreamMessage::Snapshot(snapshots.borrow_and_update().clone());
        if let Some(json) = initial.to_json() {
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }

        loop {
            let message = tokio::select! {
                changed = snapshots.changed() => match changed {
                    Ok(()) => StreamMessage::Snapshot(snapshots.borrow_and_update().clone()),
                    Err(_) => break,
                },
                alarm = alarms.recv() => match alarm {
                    Ok(alarm) => StreamMessage::Alarm(alarm),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Client {} missed {} alarms", client_id_send, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let Some(json) = message.to_json() else {
                continue;
            };
            if let Err(e) = sender.send(Message::Text(json)).await {
                warn!("Failed to send message to client {}: {}", client_id_send, e);
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => {
            debug!("Receive task completed for client {}", client_id);
            send_task.abort();
        }
        _ = &mut send_task => {
            debug!("Send task completed for client {}", client_id);
            recv_task.abort();
        }
    }

    info!("WebSocket client disconnected: {}", client_id);
}
