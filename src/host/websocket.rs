//! WebSocket handler for the editor UI shell

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::BridgeState;
use crate::coordinator::{UiNotification, UserIntent};

/// Host-side command that is not a user intent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// Editor focus changed
    EditorState {
        #[serde(default)]
        active_file: Option<String>,
        #[serde(default)]
        selection: Option<String>,
    },
    /// Keepalive
    Ping,
}

/// Parsed incoming frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Intent(UserIntent),
    Command(HostCommand),
}

/// Bridge-level messages to the shell, alongside coordinator notifications
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Connection established
    Connected { version: &'static str },
    /// Pong response
    Pong,
    /// Frame could not be understood
    Error { message: String },
}

/// Parse a text frame as an intent or host command
///
/// # Errors
///
/// Returns a description of the problem if the frame is neither
pub fn parse_incoming(text: &str) -> Result<Incoming, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| "message has no type".to_string())?
        .to_string();

    if let Ok(intent) = serde_json::from_value::<UserIntent>(value.clone()) {
        return Ok(Incoming::Intent(intent));
    }

    serde_json::from_value::<HostCommand>(value)
        .map(Incoming::Command)
        .map_err(|e| format!("unsupported message {kind}: {e}"))
}

/// Handle WebSocket upgrade request
pub async fn ws_upgrade(State(state): State<BridgeState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BridgeState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the greeting so nothing emitted in between is lost
    let mut notifications = state.notifications.subscribe();
    let snapshot = state.handle.snapshot();

    let greeting = [
        to_json(&BridgeMessage::Connected {
            version: env!("CARGO_PKG_VERSION"),
        }),
        to_json(&UiNotification::StateChanged {
            state: snapshot.state,
        }),
        to_json(&UiNotification::ContextFiles {
            files: snapshot.context_files,
        }),
    ];
    for text in greeting.into_iter().flatten() {
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    tracing::info!("UI shell connected");

    // Replies meant only for this connection
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<BridgeMessage>();

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(msg) => to_json(&msg),
                    None => break,
                },
                notification = notifications.recv() => match notification {
                    Ok(n) => to_json(&n),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "UI shell lagging, notifications dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if let Some(text) = text {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_frame(text.as_str(), &recv_state, &direct_tx),
                Message::Close(_) => {
                    tracing::info!("UI shell closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("UI shell disconnected");
}

fn handle_frame(text: &str, state: &BridgeState, reply: &mpsc::UnboundedSender<BridgeMessage>) {
    match parse_incoming(text) {
        Ok(Incoming::Intent(intent)) => {
            if !state.handle.dispatch(intent) {
                let _ = reply.send(BridgeMessage::Error {
                    message: "coordinator is not running".to_string(),
                });
            }
        }
        Ok(Incoming::Command(HostCommand::EditorState {
            active_file,
            selection,
        })) => state.workspace.set_editor_state(active_file, selection),
        Ok(Incoming::Command(HostCommand::Ping)) => {
            let _ = reply.send(BridgeMessage::Pong);
        }
        Err(message) => {
            tracing::debug!(error = %message, "rejected UI frame");
            let _ = reply.send(BridgeMessage::Error { message });
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .inspect_err(|e| tracing::error!(error = %e, "failed to encode UI message"))
        .ok()
}
