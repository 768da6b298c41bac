//! Relay transport seam.
//!
//! The production relay is an onion-routing service reached over TCP; its
//! wire protocol is out of scope here. The gateway talks to it through the
//! [`RelayTransport`] trait, and ships [`LocalRelay`], an in-process hub
//! that gives every client the same contract: sealed envelopes in, sealed
//! envelopes out, queueing for links that are down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::RELAY_TIMEOUT_SECS;
use crate::error::{AppError, AppResult};

/// X3DH handshake header carried by the first sealed message to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeHeader {
    pub sender_identity_key: String,
    pub ephemeral_key: String,
    pub used_signed_prekey_id: u32,
    pub used_onetime_prekey_id: u32,
}

/// A sealed direct-message envelope as it crosses the relay. The gateway
/// cannot read `ciphertext`; only the recipient's client can.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeHeader>,
    pub nonce: String,
    pub ciphertext: String,
    pub timestamp_ms: i64,
    pub sequence: u64,
}

/// Contract of the relay transport (§ external collaborators).
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Opens (or reopens) the link for `address` and returns its handle.
    async fn connect(&self, address: &str) -> AppResult<RelayLink>;

    /// Hands a sealed envelope to the relay for delivery.
    async fn send(&self, envelope: RelayEnvelope) -> AppResult<()>;

    /// Drops the link for `address`.
    async fn disconnect(&self, address: &str);
}

struct LinkState {
    sender: mpsc::UnboundedSender<RelayEnvelope>,
    connected: Arc<AtomicBool>,
}

/// In-process relay hub. Envelopes for connected links are delivered
/// immediately; envelopes for absent links wait in the relay-side queue and
/// flush when the link comes back, which is what survives gateway restarts
/// in the production deployment.
#[derive(Default)]
pub struct LocalRelay {
    links: RwLock<HashMap<String, LinkState>>,
    queue: Mutex<HashMap<String, Vec<RelayEnvelope>>>,
}

impl LocalRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RelayTransport for LocalRelay {
    async fn connect(&self, address: &str) -> AppResult<RelayLink> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        {
            let mut links = self.links.write().await;
            if let Some(old) = links.insert(
                address.to_string(),
                LinkState {
                    sender: tx.clone(),
                    connected: connected.clone(),
                },
            ) {
                old.connected.store(false, Ordering::SeqCst);
            }
        }

        // Flush anything the relay held while the link was down.
        let queued = self.queue.lock().await.remove(address).unwrap_or_default();
        for envelope in queued {
            let _ = tx.send(envelope);
        }

        Ok(RelayLink {
            address: address.to_string(),
            connected,
            incoming: Arc::new(Mutex::new(rx)),
        })
    }

    async fn send(&self, envelope: RelayEnvelope) -> AppResult<()> {
        let deliver = async {
            let links = self.links.read().await;
            match links.get(&envelope.to) {
                Some(link) if link.connected.load(Ordering::SeqCst) => {
                    link.sender
                        .send(envelope.clone())
                        .map_err(|_| AppError::unavailable("relay link closed"))?;
                    Ok::<bool, AppError>(true)
                }
                _ => Ok(false),
            }
        };

        let delivered = tokio::time::timeout(Duration::from_secs(RELAY_TIMEOUT_SECS), deliver)
            .await
            .map_err(|_| AppError::unavailable("relay send timed out"))??;

        if !delivered {
            self.queue
                .lock()
                .await
                .entry(envelope.to.clone())
                .or_default()
                .push(envelope);
        }
        Ok(())
    }

    async fn disconnect(&self, address: &str) {
        if let Some(link) = self.links.write().await.remove(address) {
            link.connected.store(false, Ordering::SeqCst);
        }
    }
}

/// Client-side handle of a relay link.
#[derive(Clone)]
pub struct RelayLink {
    pub address: String,
    connected: Arc<AtomicBool>,
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<RelayEnvelope>>>,
}

impl RelayLink {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Receives the next inbound envelope; `None` once the link is closed.
    pub async fn recv(&self) -> Option<RelayEnvelope> {
        self.incoming.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: &str, to: &str, seq: u64) -> RelayEnvelope {
        RelayEnvelope {
            from: from.to_string(),
            to: to.to_string(),
            handshake: None,
            nonce: String::new(),
            ciphertext: format!("ct-{seq}"),
            timestamp_ms: 0,
            sequence: seq,
        }
    }

    #[tokio::test]
    async fn connected_link_receives_envelopes_in_order() {
        let relay = LocalRelay::new();
        let link = relay.connect("bb").await.unwrap();

        relay.send(envelope("aa", "bb", 1)).await.unwrap();
        relay.send(envelope("aa", "bb", 2)).await.unwrap();

        assert_eq!(link.recv().await.unwrap().sequence, 1);
        assert_eq!(link.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn envelopes_queue_while_link_is_down_and_flush_on_connect() {
        let relay = LocalRelay::new();

        relay.send(envelope("aa", "bb", 1)).await.unwrap();
        relay.send(envelope("aa", "bb", 2)).await.unwrap();

        let link = relay.connect("bb").await.unwrap();
        assert_eq!(link.recv().await.unwrap().sequence, 1);
        assert_eq!(link.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn reconnect_invalidates_previous_link() {
        let relay = LocalRelay::new();
        let old = relay.connect("bb").await.unwrap();
        let _new = relay.connect("bb").await.unwrap();
        assert!(!old.is_connected());
    }
}
