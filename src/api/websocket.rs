//! WebSocket feed of job status changes
//!
//! The caller comes from the `x-user-id` header like every other job route
//! and receives each notification for their own jobs as a JSON text frame.

use super::{ApiState, CallerId};
use crate::core::JobNotification;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Frames sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobUpdate(JobNotification),
    /// Notifications were dropped because the client fell behind
    Lagged { missed: u64 },
}

pub async fn job_updates_socket(
    CallerId(user_id): CallerId,
    State(state): State<ApiState>,
    ws: WebSocketUpgrade,
) -> Response {
    info!(user_id = %user_id, "WebSocket connection requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: ApiState, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.notifier.subscribe();

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match updates.recv().await {
                Ok(notification) if notification.user_id == user_id => JobEvent::JobUpdate(notification),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => JobEvent::Lagged { missed },
                Err(RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize job event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Pings are answered by axum; only a close or error ends the read side
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket connection closed");
}
