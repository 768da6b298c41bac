use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::address::normalize;
use crate::error::{AppError, AppResult};
use crate::types::StarMessageRequest;

use super::{require_session, AppState};

pub async fn star_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StarMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if req.peer_address.is_empty() {
        return Err(AppError::bad_request("peer_address is required"));
    }
    let peer = normalize(&req.peer_address);

    gateway
        .db
        .star_message(&session.address, &req.message_id, &peer)
        .await?;

    Ok(Json(
        json!({ "success": true, "message": "Message starred successfully" }),
    ))
}

pub async fn unstar_message(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StarMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    gateway
        .db
        .unstar_message(&session.address, &req.message_id)
        .await?;

    Ok(Json(
        json!({ "success": true, "message": "Message unstarred successfully" }),
    ))
}

pub async fn starred_messages(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let messages = gateway.db.starred_messages(&session.address).await?;

    Ok(Json(json!({
        "success": true,
        "messages": messages,
        "message": "Starred messages retrieved",
    })))
}
