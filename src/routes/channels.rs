use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::types::{
    ChannelMemberRequest, ChannelReactionRequest, CreateChannelInviteRequest, CreateChannelRequest,
    EditChannelMessageRequest, SendChannelMessageRequest, SubscribeChannelRequest,
    UpdateChannelRequest,
};

use super::{require_session, AppState};

pub async fn create_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let avatar_key = if req.avatar_key.is_empty() {
        Vec::new()
    } else {
        BASE64
            .decode(&req.avatar_key)
            .map_err(|_| AppError::bad_request("avatar_key must be base64"))?
    };

    let channel = gateway.create_channel(&session, &req, &avatar_key).await?;
    Ok(Json(json!({ "success": true, "channel": channel })))
}

pub async fn list_channels(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let channels = gateway.db.user_channels(&session.address).await?;
    Ok(Json(json!({ "success": true, "channels": channels })))
}

pub async fn discover_channels(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    require_session(&gateway, &headers).await?;

    let query = params.get("q").map(String::as_str).unwrap_or("");
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20)
        .min(100);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let channels = gateway
        .db
        .discover_public_channels(query, limit, offset)
        .await?;
    Ok(Json(json!({ "success": true, "channels": channels })))
}

pub async fn get_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let channel = gateway
        .db
        .get_channel(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::not_found("Channel not found"))?;
    Ok(Json(json!({ "success": true, "channel": channel })))
}

pub async fn update_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateChannelRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let role = gateway
        .db
        .channel_role(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::forbidden("You are not a member of this channel"))?;
    if role != "owner" && role != "admin" {
        return Err(AppError::forbidden(
            "Only admins or the owner can update the channel",
        ));
    }

    let avatar_key = match &req.avatar_key {
        Some(key) if !key.is_empty() => Some(
            BASE64
                .decode(key)
                .map_err(|_| AppError::bad_request("avatar_key must be base64"))?,
        ),
        _ => None,
    };

    gateway.db.update_channel(&channel_id, &req, avatar_key).await?;

    let channel = gateway
        .db
        .get_channel(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::not_found("Channel not found"))?;

    gateway
        .fan_out_to_channel(&channel_id, "channel_updated", channel.clone())
        .await;

    Ok(Json(json!({ "success": true, "channel": channel })))
}

pub async fn delete_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway.delete_channel(&channel_id, &session.address).await?;
    Ok(Json(
        json!({ "success": true, "message": "Channel deleted successfully" }),
    ))
}

pub async fn subscribe(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<SubscribeChannelRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    gateway
        .subscribe_to_channel(&channel_id, &session.address, &req.invite_code)
        .await?;

    Ok(Json(
        json!({ "success": true, "message": "Successfully subscribed to channel" }),
    ))
}

pub async fn unsubscribe(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .unsubscribe_from_channel(&channel_id, &session.address)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Successfully unsubscribed from channel" }),
    ))
}

pub async fn members(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if !gateway
        .db
        .is_channel_member(&channel_id, &session.address)
        .await?
    {
        return Err(AppError::forbidden("You are not a member of this channel"));
    }

    let members = gateway.db.channel_members(&channel_id).await?;
    Ok(Json(json!({ "success": true, "members": members })))
}

pub async fn remove_member(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<ChannelMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .remove_channel_member(&channel_id, &session.address, &req.user_address)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Member removed successfully" }),
    ))
}

pub async fn promote_member(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<ChannelMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .promote_member(&channel_id, &session.address, &req.user_address)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Member promoted to admin" }),
    ))
}

pub async fn demote_member(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<ChannelMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .demote_member(&channel_id, &session.address, &req.user_address)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Admin demoted to subscriber" }),
    ))
}

pub async fn transfer_ownership(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<ChannelMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .transfer_channel_ownership(&channel_id, &session.address, &req.user_address)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Ownership transferred successfully" }),
    ))
}

pub async fn mute_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .db
        .set_channel_muted(&channel_id, &session.address, true)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Channel muted" })))
}

pub async fn unmute_channel(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .db
        .set_channel_muted(&channel_id, &session.address, false)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Channel unmuted" })))
}

// ============================================================================
// Invites
// ============================================================================

pub async fn create_invite(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<CreateChannelInviteRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let role = gateway
        .db
        .channel_role(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::forbidden("You are not a member of this channel"))?;
    if role != "owner" && role != "admin" {
        return Err(AppError::forbidden(
            "Only admins or the owner can create invites",
        ));
    }

    if req.max_uses < 0 {
        return Err(AppError::bad_request("max_uses cannot be negative"));
    }

    let invite = gateway
        .db
        .create_channel_invite(&channel_id, &session.address, req.max_uses, req.expires_at)
        .await?;

    Ok(Json(json!({ "success": true, "invite": invite })))
}

pub async fn list_invites(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let role = gateway
        .db
        .channel_role(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::forbidden("You are not a member of this channel"))?;
    if role != "owner" && role != "admin" {
        return Err(AppError::forbidden(
            "Only admins or the owner can view invites",
        ));
    }

    let invites = gateway.db.channel_invites(&channel_id).await?;
    Ok(Json(json!({ "success": true, "invites": invites })))
}

pub async fn revoke_invite(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, invite_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let role = gateway
        .db
        .channel_role(&channel_id, &session.address)
        .await?
        .ok_or_else(|| AppError::forbidden("You are not a member of this channel"))?;
    if role != "owner" && role != "admin" {
        return Err(AppError::forbidden(
            "Only admins or the owner can revoke invites",
        ));
    }

    gateway.db.revoke_channel_invite(&invite_id).await?;
    Ok(Json(json!({ "success": true, "message": "Invite revoked" })))
}

// ============================================================================
// Channel messages
// ============================================================================

pub async fn send_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<SendChannelMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let message = gateway
        .send_channel_message(&channel_id, &session.address, &req.content)
        .await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

pub async fn get_messages(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50)
        .min(200);
    let before = params.get("before").map(String::as_str);

    let messages = gateway
        .read_channel_messages(&channel_id, &session.address, limit, before)
        .await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

pub async fn edit_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
    Json(req): Json<EditChannelMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if req.new_content.is_empty() {
        return Err(AppError::bad_request("New content cannot be empty"));
    }

    gateway
        .edit_channel_message(&channel_id, &session.address, &message_id, &req.new_content)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Message edited successfully" }),
    ))
}

pub async fn delete_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .delete_channel_message(&channel_id, &session.address, &message_id)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Message deleted successfully" }),
    ))
}

pub async fn pin_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .pin_channel_message(&channel_id, &session.address, &message_id, true)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Message pinned" })))
}

pub async fn unpin_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .pin_channel_message(&channel_id, &session.address, &message_id, false)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Message unpinned" })))
}

pub async fn pinned_messages(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if !gateway
        .db
        .is_channel_member(&channel_id, &session.address)
        .await?
    {
        return Err(AppError::forbidden("You are not a member of this channel"));
    }

    let messages = gateway.db.pinned_channel_messages(&channel_id).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

pub async fn add_reaction(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
    Json(req): Json<ChannelReactionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .react_to_channel_message(&channel_id, &session.address, &message_id, &req.emoji, true)
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn remove_reaction(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path((channel_id, message_id)): Path<(String, String)>,
    Json(req): Json<ChannelReactionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .react_to_channel_message(
            &channel_id,
            &session.address,
            &message_id,
            &req.emoji,
            false,
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}
