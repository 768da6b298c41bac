//! Key-bundle directory backed by a DHT of per-session nodes.
//!
//! Every session runs its own node. A node starts empty and isolated;
//! `bootstrap` links it to one peer from another live session, after which
//! publishes replicate to linked peers and lookups fall through to them.
//! The RPC wire protocol of the production DHT is out of scope; nodes here
//! exchange records through the shared in-process network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::crypto::KeyBundle;
use crate::error::{AppError, AppResult};

/// Node identifier, derived from the owning wallet address.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn from_wallet(wallet: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(wallet.as_bytes());
        NodeId(hasher.finalize().into())
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

/// The in-process DHT network all nodes attach to.
#[derive(Default)]
pub struct DhtNetwork {
    nodes: RwLock<HashMap<NodeId, Arc<DhtNode>>>,
}

impl DhtNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn register(&self, node: Arc<DhtNode>) {
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    async fn unregister(&self, id: &NodeId) {
        self.nodes.write().await.remove(id);
    }

    async fn get(&self, id: &NodeId) -> Option<Arc<DhtNode>> {
        self.nodes.read().await.get(id).cloned()
    }
}

/// A single session's DHT node.
pub struct DhtNode {
    pub id: NodeId,
    network: Arc<DhtNetwork>,
    records: RwLock<HashMap<String, KeyBundle>>,
    peers: RwLock<Vec<NodeId>>,
    running: AtomicBool,
}

impl DhtNode {
    pub fn new(wallet: &str, network: Arc<DhtNetwork>) -> Arc<Self> {
        Arc::new(DhtNode {
            id: NodeId::from_wallet(wallet),
            network,
            records: RwLock::new(HashMap::new()),
            peers: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Registers the node with the network on an ephemeral slot.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::internal("DHT node already started"));
        }
        self.network.register(self.clone()).await;
        tracing::debug!(node = %self.id.short(), "DHT node started");
        Ok(())
    }

    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.network.unregister(&self.id).await;
            tracing::debug!(node = %self.id.short(), "DHT node stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Links this node with a peer, bidirectionally. Fails when the peer has
    /// left the network.
    pub async fn bootstrap(self: &Arc<Self>, peer_id: &NodeId) -> AppResult<()> {
        let peer = self
            .network
            .get(peer_id)
            .await
            .ok_or_else(|| AppError::unavailable("bootstrap peer is gone"))?;

        {
            let mut peers = self.peers.write().await;
            if !peers.contains(peer_id) {
                peers.push(peer_id.clone());
            }
        }
        {
            let mut peer_peers = peer.peers.write().await;
            if !peer_peers.contains(&self.id) {
                peer_peers.push(self.id.clone());
            }
        }

        tracing::debug!(node = %self.id.short(), peer = %peer_id.short(), "DHT bootstrap complete");
        Ok(())
    }

    /// Stores a key bundle under `address` on this node and replicates it to
    /// every linked peer.
    pub async fn publish(&self, address: &str, bundle: KeyBundle) -> AppResult<()> {
        if !self.is_running() {
            return Err(AppError::unavailable("DHT node is not running"));
        }

        self.records
            .write()
            .await
            .insert(address.to_string(), bundle.clone());

        let peers = self.peers.read().await.clone();
        for peer_id in peers {
            if let Some(peer) = self.network.get(&peer_id).await {
                peer.records
                    .write()
                    .await
                    .insert(address.to_string(), bundle.clone());
            }
        }
        Ok(())
    }

    /// Looks up a key bundle: local records first, then linked peers.
    pub async fn lookup(&self, address: &str) -> Option<KeyBundle> {
        if let Some(bundle) = self.records.read().await.get(address) {
            return Some(bundle.clone());
        }

        let peers = self.peers.read().await.clone();
        for peer_id in peers {
            if let Some(peer) = self.network.get(&peer_id).await {
                if let Some(bundle) = peer.records.read().await.get(address) {
                    return Some(bundle.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn bundle() -> KeyBundle {
        let identity = crypto::generate_identity_keypair();
        let spk = crypto::generate_signed_prekey(&identity, 1);
        crypto::make_key_bundle(&identity, &spk, &[])
    }

    #[tokio::test]
    async fn publish_before_bootstrap_stays_local() {
        let network = DhtNetwork::new();
        let a = DhtNode::new("aa", network.clone());
        let b = DhtNode::new("bb", network.clone());
        a.start().await.unwrap();
        b.start().await.unwrap();

        a.publish("aa", bundle()).await.unwrap();
        assert!(b.lookup("aa").await.is_none());
    }

    #[tokio::test]
    async fn lookup_reaches_bootstrapped_peer() {
        let network = DhtNetwork::new();
        let a = DhtNode::new("aa", network.clone());
        let b = DhtNode::new("bb", network.clone());
        a.start().await.unwrap();
        b.start().await.unwrap();

        b.bootstrap(&a.id).await.unwrap();
        a.publish("aa", bundle()).await.unwrap();

        // Replication is bidirectional after bootstrap.
        assert!(b.lookup("aa").await.is_some());
    }

    #[tokio::test]
    async fn stopped_node_rejects_publish() {
        let network = DhtNetwork::new();
        let a = DhtNode::new("aa", network.clone());
        a.start().await.unwrap();
        a.stop().await;
        assert!(a.publish("aa", bundle()).await.is_err());
    }
}
