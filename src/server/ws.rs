//! WebSocket endpoint for the browser client.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::AppState;
use crate::dispatcher::{DispatcherConfig, Session};
use crate::envelope::ResponseEnvelope;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let config = state.dispatcher.clone();
    ws.on_upgrade(move |socket| {
        let span = info_span!("connection", id = %Uuid::new_v4(), transport = "websocket");
        handle_socket(socket, config).instrument(span)
    })
}

/// Serve one browser connection until it closes.
async fn handle_socket(mut socket: WebSocket, config: DispatcherConfig) {
    let mut session = Session::open(config).await;
    info!(pool = ?session.pool_id(), "WebSocket connection opened");

    while let Some(message) = socket.recv().await {
        let response = match message {
            Ok(Message::Text(text)) => session.handle_frame(text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => session.handle_frame(text).await,
                Err(_) => ResponseEnvelope::failure(
                    Value::Null,
                    "Malformed request: binary frame is not valid UTF-8",
                ),
            },
            // Pongs are sent by the socket itself.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!("WebSocket close received");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
        };

        if let Err(e) = socket.send(Message::Text(response.to_json().into())).await {
            warn!(error = %e, "Failed to send WebSocket response");
            break;
        }
    }

    session.close().await;
    info!("WebSocket connection closed");
}
