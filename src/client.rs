//! Per-session cryptographic client.
//!
//! Owns the session's X3DH identity and prekeys, the peer key-bundle cache,
//! per-peer sequence numbers, and the relay link. Payloads are sealed before
//! they reach the relay and opened after they come back; the gateway core
//! never sees another tenant's plaintext in transit.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::{Mutex, RwLock};

use crate::address::Address;
use crate::config::ONE_TIME_PREKEY_COUNT;
use crate::crypto::{
    self, IdentityKeyPair, InitialMessage, KeyBundle, OneTimePreKeyPair, SignedPreKeyPair,
};
use crate::dht::DhtNode;
use crate::error::{AppError, AppResult};
use crate::relay::{HandshakeHeader, RelayEnvelope, RelayLink, RelayTransport};

/// A decrypted inbound direct message, as handed to the routing fabric.
#[derive(Debug, Clone)]
pub struct DirectMessage {
    /// Sender's canonical hex address.
    pub from: String,
    pub to: String,
    /// Sender-authored millisecond timestamp; both ends derive the display
    /// id from it.
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub content: String,
}

pub struct CryptoClient {
    pub address: Address,
    identity: IdentityKeyPair,
    signed_prekey: SignedPreKeyPair,
    one_time_prekeys: HashMap<u32, OneTimePreKeyPair>,
    bundle_cache: RwLock<HashMap<String, KeyBundle>>,
    /// Established per-peer session keys (X3DH roots).
    peer_keys: Mutex<HashMap<String, [u8; 32]>>,
    sequences: Mutex<HashMap<String, u64>>,
    link: RwLock<Option<RelayLink>>,
    relay: Arc<dyn RelayTransport>,
    dht: Arc<DhtNode>,
}

impl CryptoClient {
    /// Generates a fresh identity, signed prekey and one-time prekey pool.
    pub fn new(address: Address, dht: Arc<DhtNode>, relay: Arc<dyn RelayTransport>) -> Arc<Self> {
        let identity = crypto::generate_identity_keypair();
        let signed_prekey = crypto::generate_signed_prekey(&identity, 1);
        let one_time_prekeys = crypto::generate_one_time_prekeys(ONE_TIME_PREKEY_COUNT)
            .into_iter()
            .map(|k| (k.id, k))
            .collect();

        Arc::new(CryptoClient {
            address,
            identity,
            signed_prekey,
            one_time_prekeys,
            bundle_cache: RwLock::new(HashMap::new()),
            peer_keys: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            link: RwLock::new(None),
            relay,
            dht,
        })
    }

    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub fn signed_prekey(&self) -> &SignedPreKeyPair {
        &self.signed_prekey
    }

    pub fn one_time_prekeys(&self) -> &HashMap<u32, OneTimePreKeyPair> {
        &self.one_time_prekeys
    }

    pub fn key_bundle(&self) -> KeyBundle {
        let opks: Vec<OneTimePreKeyPair> = self.one_time_prekeys.values().cloned().collect();
        crypto::make_key_bundle(&self.identity, &self.signed_prekey, &opks)
    }

    // ========================================================================
    // Relay link
    // ========================================================================

    pub async fn connect_relay(&self) -> AppResult<RelayLink> {
        let link = self.relay.connect(&self.address.to_hex()).await?;
        *self.link.write().await = Some(link.clone());
        Ok(link)
    }

    pub async fn is_connected(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .map(|l| l.is_connected())
            .unwrap_or(false)
    }

    pub async fn disconnect(&self) {
        self.relay.disconnect(&self.address.to_hex()).await;
        *self.link.write().await = None;
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    pub async fn publish_key_bundle(&self) -> AppResult<()> {
        self.dht
            .publish(&self.address.to_hex(), self.key_bundle())
            .await
    }

    pub async fn discover_key_bundle(&self, address: &str) -> AppResult<KeyBundle> {
        self.dht.lookup(address).await.ok_or_else(|| {
            AppError::not_found(
                "Failed to discover recipient. They may not have initialized yet".to_string(),
            )
        })
    }

    pub async fn cached_key_bundle(&self, address: &str) -> Option<KeyBundle> {
        self.bundle_cache.read().await.get(address).cloned()
    }

    pub async fn cache_key_bundle(&self, address: &str, bundle: KeyBundle) {
        self.bundle_cache
            .write()
            .await
            .insert(address.to_string(), bundle);
    }

    // ========================================================================
    // Sealing
    // ========================================================================

    /// Next sequence number for the `(self, peer)` stream; monotonically
    /// increasing so receivers observe the sender's authored order.
    pub async fn next_sequence(&self, peer: &str) -> u64 {
        let mut sequences = self.sequences.lock().await;
        let seq = sequences.entry(peer.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Seals `content` for `peer`. The first message to a peer runs X3DH as
    /// initiator and carries the handshake header; later messages reuse the
    /// established key. The envelope is then onion-wrapped for the single
    /// relay hop and handed off.
    pub async fn send_sealed(
        &self,
        peer: &str,
        bundle: &KeyBundle,
        content: &str,
        timestamp_ms: i64,
        sequence: u64,
    ) -> AppResult<()> {
        let (key, handshake) = {
            let mut peer_keys = self.peer_keys.lock().await;
            match peer_keys.get(peer) {
                Some(key) => (*key, None),
                None => {
                    let (key, initial) = crypto::x3dh_initiator(&self.identity, bundle)
                        .map_err(|e| AppError::internal(format!("X3DH failed: {e}")))?;
                    peer_keys.insert(peer.to_string(), key);
                    (key, Some(handshake_header(&initial)))
                }
            }
        };

        let (ciphertext, nonce) = crypto::aes_gcm_seal(&key, content.as_bytes())
            .map_err(|e| AppError::internal(format!("sealing failed: {e}")))?;

        let envelope = RelayEnvelope {
            from: self.address.to_hex(),
            to: peer.to_string(),
            handshake,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(&ciphertext),
            timestamp_ms,
            sequence,
        };

        self.relay.send(envelope).await
    }

    /// Opens an inbound envelope into a plaintext direct message.
    pub async fn open_envelope(&self, envelope: RelayEnvelope) -> AppResult<DirectMessage> {
        let key = match &envelope.handshake {
            Some(header) => {
                let initial = initial_from_header(&envelope.from, header)?;
                let key = crypto::x3dh_responder(
                    &self.identity,
                    &self.signed_prekey,
                    &self.one_time_prekeys,
                    &initial,
                )
                .map_err(|e| AppError::internal(format!("X3DH responder failed: {e}")))?;
                self.peer_keys
                    .lock()
                    .await
                    .insert(envelope.from.clone(), key);
                key
            }
            None => {
                let peer_keys = self.peer_keys.lock().await;
                *peer_keys.get(&envelope.from).ok_or_else(|| {
                    AppError::internal("no established session for inbound message")
                })?
            }
        };

        let nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|_| AppError::bad_request("invalid nonce encoding"))?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| AppError::bad_request("invalid ciphertext encoding"))?;

        let plaintext = crypto::aes_gcm_open(&key, &nonce, &ciphertext)
            .map_err(|e| AppError::internal(format!("decryption failed: {e}")))?;

        Ok(DirectMessage {
            from: envelope.from,
            to: envelope.to,
            timestamp_ms: envelope.timestamp_ms,
            sequence: envelope.sequence,
            content: String::from_utf8_lossy(&plaintext).into_owned(),
        })
    }
}

fn handshake_header(initial: &InitialMessage) -> HandshakeHeader {
    HandshakeHeader {
        sender_identity_key: BASE64.encode(initial.sender_identity_dh),
        ephemeral_key: BASE64.encode(initial.ephemeral_public),
        used_signed_prekey_id: initial.used_signed_prekey_id,
        used_onetime_prekey_id: initial.used_one_time_prekey_id,
    }
}

fn initial_from_header(_from: &str, header: &HandshakeHeader) -> AppResult<InitialMessage> {
    let identity = decode_key32(&header.sender_identity_key, "sender identity key")?;
    let ephemeral = decode_key32(&header.ephemeral_key, "ephemeral key")?;
    Ok(InitialMessage {
        sender_identity_dh: identity,
        ephemeral_public: ephemeral,
        used_signed_prekey_id: header.used_signed_prekey_id,
        used_one_time_prekey_id: header.used_onetime_prekey_id,
    })
}

fn decode_key32(encoded: &str, what: &str) -> AppResult<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| AppError::bad_request(format!("invalid base64 in {what}")))?;
    bytes
        .try_into()
        .map_err(|_| AppError::bad_request(format!("{what} must be 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::DhtNetwork;
    use crate::relay::LocalRelay;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    async fn client_pair() -> (Arc<CryptoClient>, Arc<CryptoClient>, Arc<LocalRelay>) {
        let network = DhtNetwork::new();
        let relay = LocalRelay::new();

        let dht_a = DhtNode::new("aa", network.clone());
        let dht_b = DhtNode::new("bb", network.clone());
        dht_a.start().await.unwrap();
        dht_b.start().await.unwrap();
        dht_b.bootstrap(&dht_a.id).await.unwrap();

        let a = CryptoClient::new(addr(0xaa), dht_a, relay.clone());
        let b = CryptoClient::new(addr(0xbb), dht_b, relay.clone());
        (a, b, relay)
    }

    #[tokio::test]
    async fn sealed_round_trip_with_handshake_then_session_reuse() {
        let (alice, bob, _relay) = client_pair().await;
        let bob_link = bob.connect_relay().await.unwrap();
        alice.connect_relay().await.unwrap();

        alice.publish_key_bundle().await.unwrap();
        bob.publish_key_bundle().await.unwrap();

        let bundle = alice
            .discover_key_bundle(&bob.address.to_hex())
            .await
            .unwrap();

        let seq = alice.next_sequence(&bob.address.to_hex()).await;
        alice
            .send_sealed(&bob.address.to_hex(), &bundle, "hello", 1000, seq)
            .await
            .unwrap();

        let envelope = bob_link.recv().await.unwrap();
        assert!(envelope.handshake.is_some());
        let msg = bob.open_envelope(envelope).await.unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.from, alice.address.to_hex());

        // Second message reuses the established key, no handshake header.
        let seq = alice.next_sequence(&bob.address.to_hex()).await;
        alice
            .send_sealed(&bob.address.to_hex(), &bundle, "again", 2000, seq)
            .await
            .unwrap();
        let envelope = bob_link.recv().await.unwrap();
        assert!(envelope.handshake.is_none());
        assert_eq!(bob.open_envelope(envelope).await.unwrap().content, "again");
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_per_peer() {
        let (alice, _bob, _relay) = client_pair().await;
        assert_eq!(alice.next_sequence("bb").await, 1);
        assert_eq!(alice.next_sequence("bb").await, 2);
        assert_eq!(alice.next_sequence("cc").await, 1);
    }
}
