//! Offline message vault.
//!
//! Messages for wallets without a live realtime link are held as X3DH
//! envelopes: the gateway runs X3DH as initiator against the recipient's
//! cached key bundle and seals the plaintext with AES-256-GCM, so only the
//! recipient's prekey material can ever reconstruct the content. The
//! process-local map mirrors the relay's durable queue, which remains the
//! authoritative store across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::client::CryptoClient;
use crate::crypto::{self, InitialMessage, KeyBundle};
use crate::error::{AppError, AppResult};
use crate::types::{format_timestamp, Message, Sender, WsIncomingMessage};
use crate::Gateway;

/// Durable ciphertext envelope for an offline recipient. Field names are
/// part of the persisted format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineEnvelope {
    pub sender_address: String,
    pub sender_identity_key: String,
    pub ephemeral_key: String,
    pub used_signed_prekey_id: u32,
    pub used_onetime_prekey_id: u32,
    pub ciphertext: String,
    pub nonce: String,
    pub message_id: String,
    pub timestamp: i64,
}

/// Pending envelopes keyed by recipient address.
#[derive(Default)]
pub struct Vault {
    pending: RwLock<HashMap<String, Vec<OfflineEnvelope>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, recipient: &str, envelope: OfflineEnvelope) {
        let mut pending = self.pending.write().await;
        pending
            .entry(recipient.to_string())
            .or_default()
            .push(envelope);
    }

    /// Removes and returns every pending envelope for `recipient`, FIFO.
    pub async fn take(&self, recipient: &str) -> Vec<OfflineEnvelope> {
        self.pending
            .write()
            .await
            .remove(recipient)
            .unwrap_or_default()
    }

    /// Puts envelopes back, ahead of anything stored meanwhile.
    pub async fn restore(&self, recipient: &str, mut envelopes: Vec<OfflineEnvelope>) {
        let mut pending = self.pending.write().await;
        let slot = pending.entry(recipient.to_string()).or_default();
        envelopes.append(slot);
        *slot = envelopes;
    }

    pub async fn pending_count(&self, recipient: &str) -> usize {
        self.pending
            .read()
            .await
            .get(recipient)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn remove_message(&self, recipient: &str, message_id: &str) {
        let mut pending = self.pending.write().await;
        if let Some(slot) = pending.get_mut(recipient) {
            slot.retain(|e| e.message_id != message_id);
            if slot.is_empty() {
                pending.remove(recipient);
            }
        }
    }

    /// Drops every envelope from `sender` queued for `recipient`.
    pub async fn remove_chat(&self, recipient: &str, sender: &str) {
        let mut pending = self.pending.write().await;
        if let Some(slot) = pending.get_mut(recipient) {
            slot.retain(|e| e.sender_address != sender);
            if slot.is_empty() {
                pending.remove(recipient);
            }
        }
    }
}

/// Builds the envelope: X3DH as initiator against the recipient's cached
/// bundle, AES-256-GCM over the plaintext with a fresh nonce.
pub fn encrypt_offline(
    sender_client: &CryptoClient,
    sender_address: &str,
    recipient_bundle: &KeyBundle,
    content: &str,
    message_id: &str,
    timestamp: i64,
) -> AppResult<OfflineEnvelope> {
    let (secret, initial) = crypto::x3dh_initiator(sender_client.identity(), recipient_bundle)
        .map_err(|e| AppError::internal(format!("X3DH key agreement failed: {e}")))?;

    let (ciphertext, nonce) = crypto::aes_gcm_seal(&secret, content.as_bytes())
        .map_err(|e| AppError::internal(format!("AES-GCM encryption failed: {e}")))?;

    Ok(OfflineEnvelope {
        sender_address: sender_address.to_string(),
        sender_identity_key: BASE64.encode(initial.sender_identity_dh),
        ephemeral_key: BASE64.encode(initial.ephemeral_public),
        used_signed_prekey_id: initial.used_signed_prekey_id,
        used_onetime_prekey_id: initial.used_one_time_prekey_id,
        ciphertext: BASE64.encode(&ciphertext),
        nonce: BASE64.encode(nonce),
        message_id: message_id.to_string(),
        timestamp,
    })
}

/// Recipient-side decryption: reconstructs the X3DH initial message and runs
/// the responder against the session's own prekey material.
pub fn decrypt_offline(
    recipient_client: &CryptoClient,
    envelope: &OfflineEnvelope,
) -> AppResult<String> {
    let identity_key = decode_key32(&envelope.sender_identity_key, "sender identity key")?;
    let ephemeral_key = decode_key32(&envelope.ephemeral_key, "ephemeral key")?;

    let initial = InitialMessage {
        sender_identity_dh: identity_key,
        ephemeral_public: ephemeral_key,
        used_signed_prekey_id: envelope.used_signed_prekey_id,
        used_one_time_prekey_id: envelope.used_onetime_prekey_id,
    };

    let secret = crypto::x3dh_responder(
        recipient_client.identity(),
        recipient_client.signed_prekey(),
        recipient_client.one_time_prekeys(),
        &initial,
    )
    .map_err(|e| AppError::internal(format!("X3DH responder failed: {e}")))?;

    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|_| AppError::bad_request("invalid ciphertext encoding"))?;
    let nonce = BASE64
        .decode(&envelope.nonce)
        .map_err(|_| AppError::bad_request("invalid nonce encoding"))?;

    let plaintext = crypto::aes_gcm_open(&secret, &nonce, &ciphertext)
        .map_err(|e| AppError::internal(format!("AES-GCM decryption failed: {e}")))?;

    Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

fn decode_key32(encoded: &str, what: &str) -> AppResult<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| AppError::bad_request(format!("invalid base64 in {what}")))?;
    bytes
        .try_into()
        .map_err(|_| AppError::bad_request(format!("{what} must be 32 bytes")))
}

impl Gateway {
    /// Drains the recipient's pending envelopes, FIFO. Each one is
    /// decrypted, appended to history as unread, persisted and emitted over
    /// the realtime connection. A decryption failure delivers the raw
    /// ciphertext rather than dropping the message. Envelopes leave the
    /// vault after the delivery attempt; if the session is missing they go
    /// back untouched.
    pub async fn drain_vault(self: &Arc<Self>, wallet: &str) {
        let envelopes = self.vault.take(wallet).await;
        if envelopes.is_empty() {
            return;
        }

        let Some(session) = self.registry.get(wallet).await else {
            tracing::warn!(wallet = %wallet, "session missing at drain time, envelopes returned");
            self.vault.restore(wallet, envelopes).await;
            return;
        };

        tracing::info!(wallet = %wallet, count = envelopes.len(), "delivering pending messages");

        for envelope in envelopes {
            let sender_addr = crate::address::normalize(&envelope.sender_address);

            let content = match decrypt_offline(&session.client, &envelope) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::error!(
                        wallet = %wallet,
                        sender = %sender_addr,
                        error = %e,
                        "offline decryption failed, delivering ciphertext"
                    );
                    envelope.ciphertext.clone()
                }
            };

            let contact = {
                let cached = session.contacts.read().await.get(&sender_addr).cloned();
                match cached {
                    Some(mut user) => {
                        user.online = self.hub.is_online(&sender_addr).await;
                        user
                    }
                    None => {
                        let user = self.user_snapshot(&sender_addr).await;
                        session
                            .contacts
                            .write()
                            .await
                            .insert(sender_addr.clone(), user.clone());
                        user
                    }
                }
            };

            let display_time = Local
                .timestamp_millis_opt(envelope.timestamp)
                .single()
                .unwrap_or_else(Local::now);

            let message = Message {
                id: envelope.message_id.clone(),
                content: content.clone(),
                timestamp: format_timestamp(display_time),
                sender: Sender::Peer(Box::new(contact)),
                unread: true,
                status: "delivered".to_string(),
                reactions: vec![],
                media_url: crate::types::extract_media_url(&content),
                is_edited: false,
                is_deleted: false,
            };

            session
                .history
                .write()
                .await
                .entry(sender_addr.clone())
                .or_default()
                .push(message.clone());

            if let Err(e) = self.db.save_message(wallet, &sender_addr, &message).await {
                tracing::warn!(error = %e, "failed to persist delivered pending message");
            }

            self.notify(
                wallet,
                "message",
                WsIncomingMessage {
                    id: envelope.message_id.clone(),
                    from: sender_addr,
                    content,
                    timestamp: envelope.timestamp / 1000,
                },
            )
            .await;
        }
    }
}
