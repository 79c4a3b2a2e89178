use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::hub::HubHandle;
use crate::watcher::WatcherHandle;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub watcher: WatcherHandle,
}

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let current_image = state.watcher.current_image().await;
    let target = state.watcher.target().clone();
    Json(json!({
        "namespace": target.namespace,
        "name": target.name,
        "current_image": current_image,
    }))
}

async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_connection(socket, state.hub))
}

/// Pumps hub payloads to one client. The inbound side is read only to
/// observe the close handshake; messages from clients are ignored.
async fn client_connection(socket: WebSocket, hub: HubHandle) {
    let (id, mut outbound) = match hub.register().await {
        Some(registration) => registration,
        None => return,
    };
    info!("Websocket client {} connected", id);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                // The hub dropped this client, overflow or shutdown
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unregister(id).await;
    debug!("Websocket client {} disconnected", id);
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_upgrade))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/status", get(status))
        .with_state(state)
}
