use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::address::normalize;
use crate::channels;
use crate::error::{AppError, AppResult};
use crate::types::{ReactionRequest, WsReactionChange};

use super::{require_session, AppState};

pub async fn add_reaction(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReactionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    apply(gateway, headers, req, true).await
}

pub async fn remove_reaction(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReactionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    apply(gateway, headers, req, false).await
}

async fn apply(
    gateway: AppState,
    headers: HeaderMap,
    req: ReactionRequest,
    add: bool,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    validate_emoji(&req.emoji)?;
    let peer = normalize(&req.peer_address);
    let actor = gateway.user_snapshot(&session.address).await;

    // Update the caller's copy of the message.
    let mut updated = None;
    {
        let mut history = session.history.write().await;
        if let Some(messages) = history.get_mut(&peer) {
            for msg in messages.iter_mut() {
                if msg.id == req.message_id {
                    let changed = if add {
                        let added = channels::add_reaction(&mut msg.reactions, &req.emoji, &actor);
                        if added {
                            if let Some(bucket) =
                                msg.reactions.iter_mut().find(|r| r.emoji == req.emoji)
                            {
                                bucket.has_reacted = true;
                            }
                        }
                        added
                    } else {
                        channels::remove_reaction(&mut msg.reactions, &req.emoji, &actor.address)
                    };
                    if changed {
                        updated = Some(msg.reactions.clone());
                    }
                    break;
                }
            }
        }
    }

    let Some(reactions) = updated else {
        return Ok(Json(json!({ "success": true, "message": "No change" })));
    };

    // Reaction persistence is not correctness-critical; log and move on.
    if let Err(e) = gateway
        .db
        .update_message_reactions(&session.address, &peer, &req.message_id, &reactions)
        .await
    {
        tracing::warn!(error = %e, "failed to persist reactions");
    }

    let event_type = if add { "reaction_added" } else { "reaction_removed" };
    gateway
        .notify(
            &peer,
            event_type,
            WsReactionChange {
                message_id: req.message_id,
                chat_id: session.address.clone(),
                emoji: req.emoji,
                from: session.address.clone(),
            },
        )
        .await;

    Ok(Json(json!({ "success": true })))
}

// Emoji payloads arrive as arbitrary strings; reject absurd lengths early.
pub(super) fn validate_emoji(emoji: &str) -> AppResult<()> {
    if emoji.is_empty() || emoji.len() > 32 {
        return Err(AppError::bad_request("Invalid emoji"));
    }
    Ok(())
}
