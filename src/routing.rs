//! Routing fabric: inbound relay messages into history and realtime events,
//! outbound sends onto the relay or into the offline vault.

use std::sync::Arc;

use chrono::{Local, Utc};

use crate::address::{looks_like_username, normalize, Address};
use crate::client::DirectMessage;
use crate::error::{AppError, AppResult};
use crate::relay::RelayLink;
use crate::session::Session;
use crate::types::{
    extract_media_url, format_timestamp, message_id_from_millis, Message, SendMessageResponse,
    Sender, WsIncomingMessage,
};
use crate::{vault, Gateway};

/// Wires a session's relay link to the inbound path. Each session owns one
/// receive loop; replacing the link replaces the loop.
pub fn spawn_inbound_task(gateway: Arc<Gateway>, session: Arc<Session>, link: RelayLink) {
    let task_session = session.clone();
    let handle = tokio::spawn(async move {
        while let Some(envelope) = link.recv().await {
            match task_session.client.open_envelope(envelope).await {
                Ok(message) => {
                    gateway
                        .on_message_received(&task_session.address, message)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        wallet = %task_session.address,
                        error = %e,
                        "failed to open inbound envelope"
                    );
                }
            }
        }
        tracing::debug!(wallet = %task_session.address, "inbound relay loop ended");
    });
    session.set_inbound_task(handle);
}

impl Gateway {
    /// Inbound path: a decrypted direct message arrived for `wallet`.
    pub async fn on_message_received(self: &Arc<Self>, wallet: &str, msg: DirectMessage) {
        let Some(session) = self.registry.get(wallet).await else {
            tracing::warn!(wallet = %wallet, "received message for unknown session");
            return;
        };

        // Prefer the sender's session key so history keys match their
        // registry form; fall back to the canonical hex address.
        let sender_addr = match Address::parse(&msg.from) {
            Ok(addr) => match self.registry.find_by_protocol_address(&addr).await {
                Some(sender_session) => sender_session.address.clone(),
                None => addr.to_hex(),
            },
            Err(_) => normalize(&msg.from),
        };

        let recipient = normalize(wallet);

        // A blocked sender is dropped with no trace: no history, no event.
        match self.db.is_blocked(&recipient, &sender_addr).await {
            Ok(true) => {
                tracing::info!(sender = %sender_addr, recipient = %recipient, "message dropped, sender is blocked");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "block check failed on inbound message");
            }
        }

        let contact = {
            let cached = session.contacts.read().await.get(&sender_addr).cloned();
            match cached {
                Some(mut user) => {
                    user.online = self.hub.is_online(&sender_addr).await;
                    session
                        .contacts
                        .write()
                        .await
                        .insert(sender_addr.clone(), user.clone());
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

        // Both ends derive the id from the sender's transmitted timestamp,
        // which keeps redelivery idempotent.
        let msg_id = message_id_from_millis(msg.timestamp_ms);
        let media_url = extract_media_url(&msg.content);

        let message = Message {
            id: msg_id.clone(),
            content: msg.content.clone(),
            timestamp: format_timestamp(Local::now()),
            sender: Sender::Peer(Box::new(contact)),
            unread: true,
            status: "delivered".to_string(),
            reactions: vec![],
            media_url,
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
            tracing::warn!(error = %e, "failed to persist received message");
        }

        self.notify(
            wallet,
            "message",
            WsIncomingMessage {
                id: msg_id,
                from: sender_addr,
                content: msg.content,
                timestamp: Utc::now().timestamp(),
            },
        )
        .await;
    }

    /// Outbound path: seal and hand off, or store an offline envelope when
    /// the recipient has no live realtime link.
    pub async fn send_message(
        self: &Arc<Self>,
        session: &Arc<Session>,
        recipient_handle: &str,
        content: &str,
    ) -> AppResult<SendMessageResponse> {
        // A short, unprefixed handle is tried as a username first.
        let mut target = recipient_handle.to_string();
        if looks_like_username(&target) {
            match self.registry.address_for_username(&target).await {
                Some(addr) => {
                    tracing::debug!(username = %target, address = %addr, "username resolved");
                    target = addr;
                }
                None => {
                    tracing::debug!(username = %target, "no username match, treating as address");
                }
            }
        }

        let recipient_address = Address::parse(&target).map_err(|_| {
            AppError::bad_request(format!(
                "Invalid recipient address or username not found: {recipient_handle}"
            ))
        })?;
        let recipient = recipient_address.to_hex();
        let sender = session.address.clone();

        let timestamp_ms = Utc::now().timestamp_millis();
        let msg_id = message_id_from_millis(timestamp_ms);
        let media_url = extract_media_url(content);

        // A recipient that blocked the sender sees nothing; the sender's
        // copy stays at "sent" and the transport never gets the message.
        let blocked = match self.db.is_blocked(&recipient, &sender).await {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!(error = %e, "block check failed on send");
                false
            }
        };
        if blocked {
            tracing::info!(sender = %sender, recipient = %recipient, "sender is blocked, message not delivered");

            let message = Message {
                id: msg_id.clone(),
                content: content.to_string(),
                timestamp: format_timestamp(Local::now()),
                sender: Sender::you(),
                unread: false,
                status: "sent".to_string(),
                reactions: vec![],
                media_url,
                is_edited: false,
                is_deleted: false,
            };

            session
                .history
                .write()
                .await
                .entry(recipient.clone())
                .or_default()
                .push(message.clone());

            if let Err(e) = self.db.save_message(&sender, &recipient, &message).await {
                tracing::warn!(error = %e, "failed to persist blocked message");
            }

            return Ok(SendMessageResponse {
                success: true,
                message_id: msg_id,
                timestamp: Utc::now().timestamp(),
                message: "Message sent".to_string(),
            });
        }

        // Key bundle: cache hit or synchronous DHT discovery.
        let bundle = match session.client.cached_key_bundle(&recipient).await {
            Some(bundle) => bundle,
            None => {
                tracing::info!(recipient = %recipient, "key bundle not cached, discovering from DHT");
                let bundle = session.client.discover_key_bundle(&recipient).await?;
                session
                    .client
                    .cache_key_bundle(&recipient, bundle.clone())
                    .await;

                let has_contact = session.contacts.read().await.contains_key(&recipient);
                if !has_contact {
                    let user = self.user_snapshot(&recipient).await;
                    session
                        .contacts
                        .write()
                        .await
                        .insert(recipient.clone(), user);
                }
                bundle
            }
        };

        let recipient_live = self.registry.get(&recipient).await.is_some()
            && self.hub.is_online(&recipient).await;

        if recipient_live {
            let sequence = session.client.next_sequence(&recipient).await;
            session
                .client
                .send_sealed(&recipient, &bundle, content, timestamp_ms, sequence)
                .await?;
            tracing::debug!(recipient = %recipient, sequence, "message handed to relay");
        } else {
            let envelope = vault::encrypt_offline(
                &session.client,
                &sender,
                &bundle,
                content,
                &msg_id,
                timestamp_ms,
            )?;
            self.vault.store(&recipient, envelope).await;
            tracing::info!(recipient = %recipient, "recipient offline, envelope stored in vault");
        }

        let message = Message {
            id: msg_id.clone(),
            content: content.to_string(),
            timestamp: format_timestamp(Local::now()),
            sender: Sender::you(),
            unread: false,
            status: "delivered".to_string(),
            reactions: vec![],
            media_url,
            is_edited: false,
            is_deleted: false,
        };

        session
            .history
            .write()
            .await
            .entry(recipient.clone())
            .or_default()
            .push(message.clone());

        if let Err(e) = self.db.save_message(&sender, &recipient, &message).await {
            tracing::warn!(error = %e, "failed to persist sent message");
        }

        Ok(SendMessageResponse {
            success: true,
            message_id: msg_id,
            timestamp: Utc::now().timestamp(),
            message: "Message sent successfully".to_string(),
        })
    }
}
