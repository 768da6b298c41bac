use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::address::normalize;
use crate::error::AppResult;
use crate::types::{
    Chat, MarkAsReadRequest, SendMessageRequest, SendMessageResponse, TypingIndicatorRequest,
    WsReadReceipt, WsTypingIndicator,
};

use super::{require_session, AppState};

pub async fn send_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    let session = require_session(&gateway, &headers).await?;
    let response = gateway
        .send_message(&session, &req.recipient_address, &req.content)
        .await?;
    Ok(Json(response))
}

pub async fn get_messages(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let chat_id = normalize(&chat_id);

    let messages = session
        .history
        .read()
        .await
        .get(&chat_id)
        .cloned()
        .unwrap_or_default();

    Ok(Json(json!({ "success": true, "messages": messages })))
}

/// Chat list assembled from in-memory history plus contact snapshots.
pub async fn get_chats(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let history = session.history.read().await.clone();
    let mut chats = Vec::with_capacity(history.len());
    for (peer, messages) in history {
        let sender = gateway.user_snapshot(&peer).await;
        chats.push(Chat {
            id: peer,
            sender,
            messages,
        });
    }

    Ok(Json(json!({ "success": true, "chats": chats })))
}

pub async fn mark_as_read(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MarkAsReadRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    {
        let mut history = session.history.write().await;
        if let Some(messages) = history.get_mut(&peer) {
            for msg in messages.iter_mut() {
                if msg.id == req.message_id {
                    msg.unread = false;
                }
            }
        }
    }

    if let Err(e) = gateway
        .db
        .mark_message_read(&session.address, &peer, &req.message_id)
        .await
    {
        tracing::warn!(error = %e, "failed to persist read flag");
    }

    // The sender learns their message was read.
    gateway
        .notify(
            &peer,
            "read_receipt",
            WsReadReceipt {
                from: session.address.clone(),
                message_id: req.message_id,
                read_status: "read".to_string(),
                timestamp: Utc::now().timestamp(),
            },
        )
        .await;

    Ok(Json(json!({ "success": true, "message": "Marked as read" })))
}

pub async fn typing_indicator(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TypingIndicatorRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    gateway
        .notify(
            &peer,
            "typing",
            WsTypingIndicator {
                from: session.address.clone(),
                typing: req.typing,
            },
        )
        .await;

    Ok(Json(json!({ "success": true })))
}

/// Explicit vault drain; the WebSocket connect path drains automatically.
pub async fn get_pending_messages(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let count = gateway.vault.pending_count(&session.address).await;
    gateway.drain_vault(&session.address).await;

    Ok(Json(json!({ "success": true, "count": count })))
}
