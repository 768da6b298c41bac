use std::collections::HashMap;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::StreamExt;

use crate::address::normalize;
use crate::error::AppError;
use crate::hub::WsConn;

use super::AppState;

/// `GET /ws?address=...` — upgrades to the wallet's realtime connection.
pub async fn ws_upgrade(
    State(gateway): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let address = params
        .get("address")
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::bad_request("Address required"))?;
    let address = normalize(address);

    Ok(upgrade.on_upgrade(move |socket| handle_socket(gateway, address, socket)))
}

async fn handle_socket(gateway: AppState, address: String, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let conn = WsConn::new(address.clone(), sink);

    gateway.hub.register(conn).await;
    if let Err(e) = gateway.db.update_online(&address, true).await {
        tracing::warn!(address = %address, error = %e, "failed to persist online flag");
    }

    tracing::info!(address = %address, "websocket connected");
    gateway.broadcast_online_status(&address, true).await;

    // A reconnect is the drain trigger for this wallet's pending envelopes.
    gateway.drain_vault(&address).await;

    while let Some(frame) = stream.next().await {
        match frame {
            // Pings are answered at the protocol layer; inbound text frames
            // are reserved for future client-driven events.
            Ok(WsFrame::Text(text)) => {
                tracing::debug!(address = %address, frame = %text, "websocket text frame");
            }
            Ok(WsFrame::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    gateway.handle_ws_disconnect(&address).await;
}
