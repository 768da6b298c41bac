//! HTTP surface assembly.
//!
//! Every `/api` request except initialize and check-username carries
//! `X-Wallet-Address` and must resolve to a live session. CORS is wide open
//! for the web client; auth is the wallet header (signature challenge is
//! reserved for a future revision).

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::address::normalize;
use crate::error::{AppError, AppResult};
use crate::session::Session;
use crate::Gateway;

mod account;
mod channels;
mod chat_management;
mod contacts;
mod media;
mod messages;
mod reactions;
mod session_routes;
mod starred;
mod ws;

pub(crate) type AppState = Arc<Gateway>;

/// Resolves the caller's session from the `X-Wallet-Address` header.
pub(crate) async fn require_session(
    gateway: &Gateway,
    headers: &HeaderMap,
) -> AppResult<Arc<Session>> {
    let wallet = headers
        .get("X-Wallet-Address")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::unauthorized("wallet address required in X-Wallet-Address header")
        })?;

    let normalized = normalize(wallet);
    gateway
        .registry
        .get(&normalized)
        .await
        .ok_or_else(|| AppError::unauthorized(format!("session not initialized for {wallet}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(gateway: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Session
        .route("/initialize", post(session_routes::initialize))
        .route("/check-username", post(account::check_username))
        // Messaging
        .route("/send", post(messages::send_message))
        .route("/chats", get(messages::get_chats))
        .route("/messages/{chatId}", get(messages::get_messages))
        .route("/mark-as-read", post(messages::mark_as_read))
        .route("/typing", post(messages::typing_indicator))
        .route("/pending-messages", get(messages::get_pending_messages))
        // Chat management
        .route("/delete-message", post(chat_management::delete_message))
        .route("/delete-chat", post(chat_management::delete_chat))
        .route("/edit-message", post(chat_management::edit_message))
        .route("/clear-chat", post(chat_management::clear_chat))
        // Reactions
        .route("/add-reaction", post(reactions::add_reaction))
        .route("/remove-reaction", post(reactions::remove_reaction))
        // Contacts
        .route("/discover", post(contacts::discover_contact))
        .route("/peer-info", post(contacts::peer_info))
        .route("/block-contact", post(contacts::block_contact))
        .route("/unblock-contact", post(contacts::unblock_contact))
        .route("/blocked-contacts", get(contacts::blocked_contacts))
        .route("/mute-user", post(contacts::mute_user))
        .route("/unmute-user", post(contacts::unmute_user))
        .route("/muted-users", get(contacts::muted_users))
        // Account & profile
        .route("/delete-account", post(account::delete_account))
        .route("/update-username", post(account::update_username))
        .route("/update-profile", post(account::update_profile))
        .route("/get-profile", get(account::get_profile))
        .route("/update-status", post(account::update_status))
        // Starred
        .route("/star-message", post(starred::star_message))
        .route("/unstar-message", post(starred::unstar_message))
        .route("/starred-messages", get(starred::starred_messages))
        // Media
        .route("/upload-media", post(media::upload_media))
        .route("/media/{mediaId}", get(media::get_media))
        .route("/avatar/{address}", get(media::download_avatar))
        .route("/avatar/chunk/{chunkId}", get(media::download_avatar_chunk))
        .route("/avatar", delete(media::delete_avatar))
        // Channels
        .route(
            "/channels",
            post(channels::create_channel).get(channels::list_channels),
        )
        .route("/channels/discover", get(channels::discover_channels))
        .route(
            "/channels/{channelId}",
            get(channels::get_channel)
                .put(channels::update_channel)
                .delete(channels::delete_channel),
        )
        .route("/channels/{channelId}/subscribe", post(channels::subscribe))
        .route(
            "/channels/{channelId}/unsubscribe",
            post(channels::unsubscribe),
        )
        .route("/channels/{channelId}/members", get(channels::members))
        .route(
            "/channels/{channelId}/members/remove",
            post(channels::remove_member),
        )
        .route(
            "/channels/{channelId}/members/promote",
            post(channels::promote_member),
        )
        .route(
            "/channels/{channelId}/members/demote",
            post(channels::demote_member),
        )
        .route(
            "/channels/{channelId}/transfer-ownership",
            post(channels::transfer_ownership),
        )
        .route("/channels/{channelId}/mute", post(channels::mute_channel))
        .route(
            "/channels/{channelId}/unmute",
            post(channels::unmute_channel),
        )
        .route(
            "/channels/{channelId}/invites",
            post(channels::create_invite).get(channels::list_invites),
        )
        .route(
            "/channels/{channelId}/invites/{inviteId}",
            delete(channels::revoke_invite),
        )
        .route(
            "/channels/{channelId}/messages",
            post(channels::send_message).get(channels::get_messages),
        )
        .route(
            "/channels/{channelId}/messages/pinned",
            get(channels::pinned_messages),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/edit",
            post(channels::edit_message),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/delete",
            post(channels::delete_message),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/pin",
            post(channels::pin_message),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/unpin",
            post(channels::unpin_message),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/reactions/add",
            post(channels::add_reaction),
        )
        .route(
            "/channels/{channelId}/messages/{messageId}/reactions/remove",
            post(channels::remove_reaction),
        );

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_upgrade))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}
