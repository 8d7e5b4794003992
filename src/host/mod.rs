//! Host bridge: connects the editor's UI shell to the coordinator
//!
//! The editor extension connects over a loopback WebSocket, forwards user
//! intents and editor state, and receives every coordinator notification.

pub mod websocket;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::coordinator::{CoordinatorHandle, TurnState, UiNotification};
use crate::workspace::FsWorkspace;
use crate::{Error, Result};

/// Notifications buffered per connected shell before it is considered lagging
const NOTIFICATION_BUFFER: usize = 256;

/// Shared state for bridge handlers
#[derive(Clone)]
pub struct BridgeState {
    pub handle: CoordinatorHandle,
    pub workspace: Arc<FsWorkspace>,
    pub notifications: broadcast::Sender<UiNotification>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub state: TurnState,
}

/// Loopback server for the editor UI shell
pub struct Bridge {
    state: BridgeState,
    port: u16,
}

impl Bridge {
    /// Create a bridge and start fanning coordinator notifications out to clients
    #[must_use]
    pub fn new(
        handle: CoordinatorHandle,
        workspace: Arc<FsWorkspace>,
        notifications: mpsc::UnboundedReceiver<UiNotification>,
        port: u16,
    ) -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        tokio::spawn(fan_out(notifications, tx.clone()));

        Self {
            state: BridgeState {
                handle,
                workspace,
                notifications: tx,
            },
            port,
        }
    }

    /// Build the router
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Run the bridge server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind host bridge on {addr}: {e}")))?;

        tracing::info!(port = self.port, "host bridge listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("host bridge error: {e}")))?;

        Ok(())
    }
}

/// Build the bridge router around existing state
pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<BridgeState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state: state.handle.snapshot().state,
    })
}

async fn fan_out(
    mut rx: mpsc::UnboundedReceiver<UiNotification>,
    tx: broadcast::Sender<UiNotification>,
) {
    while let Some(notification) = rx.recv().await {
        tracing::trace!(notification = ?notification, "ui notification");
        // No connected shell is fine; state is re-sent on connect
        let _ = tx.send(notification);
    }
    tracing::debug!("notification stream closed");
}
