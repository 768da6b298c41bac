use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use crate::address::{normalize, Address};
use crate::error::{AppError, AppResult};
use crate::types::{
    CheckUsernameRequest, CheckUsernameResponse, DeleteAccountRequest, UpdateProfileRequest,
    UpdateStatusRequest, UpdateUsernameRequest,
};

use super::{require_session, AppState};

const VALID_STATUSES: &[&str] = &["online", "away", "busy", "offline"];

/// Destroys the account: session resources plus every persisted row.
pub async fn delete_account(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteAccountRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let wallet = Address::parse(&req.wallet_address)?.to_hex();

    if wallet != session.address {
        return Err(AppError::forbidden(
            "Cannot delete an account other than your own",
        ));
    }

    gateway.cleanup_session(&wallet).await;
    gateway.hub.unregister(&wallet).await;
    gateway.db.delete_user_data(&wallet).await?;

    tracing::info!(wallet = %wallet, "account deleted");
    Ok(Json(
        json!({ "success": true, "message": "Account deleted successfully" }),
    ))
}

pub async fn check_username(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckUsernameRequest>,
) -> AppResult<Json<CheckUsernameResponse>> {
    if req.username.is_empty() {
        return Err(AppError::bad_request("Username is required"));
    }

    // The caller's own wallet (when present) does not count as a conflict.
    let wallet = headers
        .get("X-Wallet-Address")
        .and_then(|v| v.to_str().ok())
        .map(normalize)
        .unwrap_or_default();

    let available = gateway
        .db
        .is_username_available(&req.username, &wallet)
        .await?;

    let message = if available {
        "Username is available".to_string()
    } else {
        format!("Username '{}' is already taken", req.username)
    };

    Ok(Json(CheckUsernameResponse { available, message }))
}

pub async fn update_username(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateUsernameRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let new_username = req.new_username.trim().to_string();
    if new_username.is_empty() {
        return Err(AppError::bad_request("Username is required"));
    }

    if !gateway
        .db
        .is_username_available(&new_username, &session.address)
        .await?
    {
        return Err(AppError::conflict(format!(
            "Username '{new_username}' is already taken"
        )));
    }

    gateway
        .db
        .update_username(&session.address, &new_username)
        .await?;
    gateway.registry.rename(&session.address, &new_username).await;
    *session.username.write().await = new_username.clone();

    // Peers refresh the display name from the profile broadcast.
    let user = gateway.user_snapshot(&session.address).await;
    gateway
        .broadcast_profile_update(
            &session.address,
            &user.first_name,
            &user.last_name,
            &user.bio,
            user.avatar_chunk_id,
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Username updated successfully" }),
    ))
}

pub async fn update_profile(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let avatar_key = if req.avatar_key.is_empty() {
        Vec::new()
    } else {
        BASE64
            .decode(&req.avatar_key)
            .map_err(|_| AppError::bad_request("avatar_key must be base64"))?
    };

    gateway
        .db
        .update_profile(
            &session.address,
            &req.first_name,
            &req.last_name,
            &req.bio,
            req.avatar_chunk_id,
            &avatar_key,
        )
        .await?;

    gateway
        .broadcast_profile_update(
            &session.address,
            &req.first_name,
            &req.last_name,
            &req.bio,
            req.avatar_chunk_id,
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Profile updated successfully" }),
    ))
}

pub async fn get_profile(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let user = gateway
        .db
        .get_user(&session.address)
        .await?
        .ok_or_else(|| AppError::not_found("User profile not found"))?;

    Ok(Json(json!({
        "success": true,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "username": user.username,
        "bio": user.bio,
        "avatar_chunk_id": user.avatar_chunk_id,
        "avatar_key": BASE64.encode(&user.avatar_key),
        "address": session.address,
        "status": user.status,
        "message": "Profile retrieved",
    })))
}

pub async fn update_status(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    if !VALID_STATUSES.contains(&req.status.as_str()) {
        return Err(AppError::bad_request(format!(
            "Status must be one of: {}",
            VALID_STATUSES.join(", ")
        )));
    }

    gateway
        .db
        .update_user_status(&session.address, &req.status)
        .await?;

    gateway
        .broadcast_status_update(&session.address, &req.status)
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Status updated successfully" }),
    ))
}
