use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::address::normalize;
use crate::db::DELETED_TOMBSTONE;
use crate::error::{AppError, AppResult};
use crate::types::{
    DeleteChatRequest, DeleteMessageRequest, EditMessageRequest, PeerActionRequest,
    WsMessageDeleted, WsMessageEdited, WsUserAction,
};

use super::{require_session, AppState};

/// Soft-deletes a message in the caller's history. With
/// `delete_for_everyone`, the peer's copy is tombstoned too and the peer is
/// notified; any still-undelivered vault envelope is withdrawn.
pub async fn delete_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    let mut found = false;
    {
        let mut history = session.history.write().await;
        if let Some(messages) = history.get_mut(&peer) {
            for msg in messages.iter_mut() {
                if msg.id == req.message_id {
                    msg.is_deleted = true;
                    msg.content = DELETED_TOMBSTONE.to_string();
                    msg.media_url.clear();
                    found = true;
                }
            }
        }
    }

    let deleted_row = gateway
        .db
        .soft_delete_message(&session.address, &peer, &req.message_id)
        .await?;

    if !found && !deleted_row {
        return Err(AppError::not_found("Message not found"));
    }

    if req.delete_for_everyone {
        gateway
            .vault
            .remove_message(&peer, &req.message_id)
            .await;

        if let Some(peer_session) = gateway.registry.get(&peer).await {
            let mut history = peer_session.history.write().await;
            if let Some(messages) = history.get_mut(&session.address) {
                for msg in messages.iter_mut() {
                    if msg.id == req.message_id {
                        msg.is_deleted = true;
                        msg.content = DELETED_TOMBSTONE.to_string();
                        msg.media_url.clear();
                    }
                }
            }
        }
        if let Err(e) = gateway
            .db
            .soft_delete_message(&peer, &session.address, &req.message_id)
            .await
        {
            tracing::warn!(error = %e, "failed to tombstone peer copy");
        }

        gateway
            .notify(
                &peer,
                "message_deleted",
                WsMessageDeleted {
                    message_id: req.message_id.clone(),
                    chat_id: session.address.clone(),
                },
            )
            .await;
    }

    Ok(Json(
        json!({ "success": true, "message": "Message deleted successfully" }),
    ))
}

pub async fn delete_chat(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteChatRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    session.history.write().await.remove(&peer);
    gateway.db.delete_chat(&session.address, &peer).await?;
    // Withdraw undelivered envelopes in both directions of this chat.
    gateway.vault.remove_chat(&session.address, &peer).await;
    gateway.vault.remove_chat(&peer, &session.address).await;

    Ok(Json(
        json!({ "success": true, "message": "Chat deleted successfully" }),
    ))
}

/// Edits the caller's own message; only local-origin messages are editable.
pub async fn edit_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if req.new_content.is_empty() {
        return Err(AppError::bad_request("New content cannot be empty"));
    }

    let peer = normalize(&req.peer_address);
    let mut found = false;

    {
        let mut history = session.history.write().await;
        if let Some(messages) = history.get_mut(&peer) {
            for msg in messages.iter_mut() {
                if msg.id == req.message_id {
                    if !msg.sender.is_local() {
                        return Err(AppError::forbidden(
                            "Cannot edit messages from other users",
                        ));
                    }
                    msg.content = req.new_content.clone();
                    msg.is_edited = true;
                    found = true;
                    break;
                }
            }
        }
    }

    if !found {
        return Err(AppError::not_found("Message not found"));
    }

    if let Err(e) = gateway
        .db
        .edit_message(&session.address, &peer, &req.message_id, &req.new_content)
        .await
    {
        tracing::warn!(error = %e, "failed to persist message edit");
    }

    gateway
        .notify(
            &peer,
            "message_edited",
            WsMessageEdited {
                message_id: req.message_id,
                chat_id: session.address.clone(),
                new_content: req.new_content,
            },
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Message edited successfully" }),
    ))
}

/// Clears a chat's history on the caller's side and tells the peer.
pub async fn clear_chat(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PeerActionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    session.history.write().await.remove(&peer);
    gateway.db.delete_chat(&session.address, &peer).await?;
    gateway.vault.remove_chat(&session.address, &peer).await;
    gateway.vault.remove_chat(&peer, &session.address).await;

    gateway
        .notify(
            &peer,
            "user_action",
            WsUserAction {
                action: "chat_cleared".to_string(),
                user_address: session.address.clone(),
            },
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Chat cleared successfully" }),
    ))
}
