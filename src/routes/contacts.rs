use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::address::{normalize, Address};
use crate::error::AppResult;
use crate::types::{ContactActionRequest, DiscoverContactRequest, PeerInfoRequest, WsUserAction};

use super::{require_session, AppState};

/// Looks a peer up in the DHT, caches their key bundle and returns their
/// profile snapshot.
pub async fn discover_contact(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DiscoverContactRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer_addr = Address::parse(&req.address)?;
    let peer = peer_addr.to_hex();

    if session.client.cached_key_bundle(&peer).await.is_none() {
        let bundle = session.client.discover_key_bundle(&peer).await?;
        session.client.cache_key_bundle(&peer, bundle).await;
    }

    let user = gateway.user_snapshot(&peer).await;
    session
        .contacts
        .write()
        .await
        .insert(peer.clone(), user.clone());

    if let Err(e) = gateway
        .db
        .ensure_contact(&session.address, &peer, &user.username)
        .await
    {
        tracing::warn!(error = %e, "failed to persist contact row");
    }

    Ok(Json(
        json!({ "success": true, "user": user, "message": "Contact discovered" }),
    ))
}

/// Encryption and connection detail for a peer, as surfaced in the client's
/// security panel.
pub async fn peer_info(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PeerInfoRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let peer = normalize(&req.peer_address);

    let user = gateway.user_snapshot(&peer).await;
    let bundle = session.client.cached_key_bundle(&peer).await;
    let peer_session = gateway.registry.get(&peer).await;

    let (relay_connected, bundle_published) = match &peer_session {
        Some(s) => (
            s.client.is_connected().await,
            s.dht_node.lookup(&peer).await.is_some(),
        ),
        None => (false, false),
    };

    let identity_fingerprint = bundle
        .as_ref()
        .map(|b| hex::encode(&b.identity_dh[..8]))
        .unwrap_or_default();

    let peer_payload = json!({
        "address": peer,
        "name": user.name,
        "username": user.username,
        "bio": user.bio,
        "online": user.online,
        "encryption_status": {
            "protocol": "X3DH + Double Ratchet",
            "has_ratchet_session": bundle.is_some(),
            "forward_secrecy": true,
            "identity_key": identity_fingerprint,
            "signed_prekey_id": bundle.as_ref().map(|b| b.signed_prekey_id).unwrap_or(0),
            "onetime_prekeys_available": bundle.as_ref().map(|b| b.one_time_prekeys.len()).unwrap_or(0),
        },
        "connection_info": {
            "relay_connected": relay_connected,
            "key_bundle_in_dht": bundle_published,
        },
        "security_indicators": {
            "end_to_end_encrypted": true,
            "onion_routing": true,
            "verified": peer_session.map(|s| s.verified).unwrap_or(false),
        },
    });

    Ok(Json(
        json!({ "success": true, "peer": peer_payload, "message": "Peer info" }),
    ))
}

pub async fn block_contact(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ContactActionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let contact = normalize(&req.contact_address);

    gateway.db.set_blocked(&session.address, &contact, true).await?;
    tracing::info!(user = %session.address, contact = %contact, "contact blocked");

    gateway
        .notify(
            &contact,
            "user_action",
            WsUserAction {
                action: "you_were_blocked".to_string(),
                user_address: session.address.clone(),
            },
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Contact blocked successfully" }),
    ))
}

pub async fn unblock_contact(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ContactActionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let contact = normalize(&req.contact_address);

    gateway
        .db
        .set_blocked(&session.address, &contact, false)
        .await?;

    gateway
        .notify(
            &contact,
            "user_action",
            WsUserAction {
                action: "you_were_unblocked".to_string(),
                user_address: session.address.clone(),
            },
        )
        .await;

    Ok(Json(
        json!({ "success": true, "message": "Contact unblocked successfully" }),
    ))
}

pub async fn blocked_contacts(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let blocked = gateway.db.blocked_contacts(&session.address).await?;
    Ok(Json(
        json!({ "success": true, "blocked_addresses": blocked }),
    ))
}

pub async fn mute_user(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ContactActionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let contact = normalize(&req.contact_address);
    gateway.db.set_muted(&session.address, &contact, true).await?;
    Ok(Json(
        json!({ "success": true, "message": "User muted successfully" }),
    ))
}

pub async fn unmute_user(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ContactActionRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let contact = normalize(&req.contact_address);
    gateway
        .db
        .set_muted(&session.address, &contact, false)
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "User unmuted successfully" }),
    ))
}

pub async fn muted_users(
    State(gateway): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&gateway, &headers).await?;
    let muted = gateway.db.muted_contacts(&session.address).await?;
    Ok(Json(json!({ "success": true, "muted_addresses": muted })))
}
