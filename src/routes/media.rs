use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::address::{normalize, Address};
use crate::error::{AppError, AppResult};
use crate::types::{MediaInfo, UploadMediaRequest, UploadMediaResponse};

use super::{require_session, AppState};

const ALLOWED_MEDIA_TYPES: &[&str] = &["image", "video", "audio", "file"];

/// Decodes the base64 payload, pushes the bytes to MeshStorage, and records
/// the metadata locally.
pub async fn upload_media(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadMediaRequest>,
) -> AppResult<Json<UploadMediaResponse>> {
    let session = require_session(&gateway, &headers).await?;

    if !ALLOWED_MEDIA_TYPES.contains(&req.media_type.as_str()) {
        return Err(AppError::bad_request(format!(
            "media_type must be one of: {}",
            ALLOWED_MEDIA_TYPES.join(", ")
        )));
    }

    let data = BASE64
        .decode(&req.data)
        .map_err(|_| AppError::bad_request("data must be base64"))?;
    if data.is_empty() {
        return Err(AppError::bad_request("media payload is empty"));
    }

    let (chunk_id, encryption_key) = gateway
        .media_store
        .upload(&session.address, &data)
        .await?;

    let media_id = Uuid::new_v4().to_string();
    let url = format!("/api/media/{media_id}");

    gateway
        .db
        .save_media_file(
            &media_id,
            &session.address,
            &req.file_name,
            &req.mime_type,
            data.len() as i64,
            chunk_id,
            &encryption_key,
        )
        .await?;

    let info = MediaInfo {
        id: media_id.clone(),
        media_type: req.media_type.clone(),
        url: url.clone(),
        file_name: req.file_name.clone(),
        mime_type: req.mime_type.clone(),
        size: data.len() as i64,
        created_at: Utc::now().to_rfc3339(),
    };
    gateway
        .media_index
        .write()
        .await
        .insert(media_id.clone(), info);

    tracing::info!(media_id = %media_id, chunk = chunk_id, size = data.len(), "media uploaded");

    Ok(Json(UploadMediaResponse {
        success: true,
        media_id,
        url,
        message: "Media uploaded successfully".to_string(),
    }))
}

/// Streams a media file back from MeshStorage.
pub async fn get_media(
    State(gateway): State<AppState>,
    Path(media_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let row = gateway
        .db
        .get_media_file(&media_id)
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let bytes = gateway
        .media_store
        .download(&row.user_address, row.mesh_chunk_id as u64)
        .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, row.mime_type)],
        bytes,
    ))
}

/// Avatar download by wallet address: resolves the user's avatar chunk.
pub async fn download_avatar(
    State(gateway): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<impl IntoResponse> {
    let wallet = Address::parse(&address)?.to_hex();

    let user = gateway
        .db
        .get_user(&wallet)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if user.avatar_chunk_id == 0 {
        return Err(AppError::not_found("User has no avatar"));
    }

    let bytes = gateway
        .media_store
        .download(&wallet, user.avatar_chunk_id)
        .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream".to_string())],
        bytes,
    ))
}

pub async fn download_avatar_chunk(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Path(chunk_id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let wallet = headers
        .get("X-Wallet-Address")
        .and_then(|v| v.to_str().ok())
        .map(normalize)
        .ok_or_else(|| AppError::unauthorized("wallet address required"))?;

    let bytes = gateway.media_store.download(&wallet, chunk_id).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream".to_string())],
        bytes,
    ))
}

/// Clears the caller's avatar metadata; the blob expires in MeshStorage.
pub async fn delete_avatar(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;

    let user = gateway
        .db
        .get_user(&session.address)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    gateway
        .db
        .update_profile(
            &session.address,
            &user.first_name,
            &user.last_name,
            &user.bio,
            0,
            &[],
        )
        .await?;

    gateway
        .broadcast_profile_update(
            &session.address,
            &user.first_name,
            &user.last_name,
            &user.bio,
            0,
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Avatar deleted successfully" }),
    ))
}
