//! Session registry: the authoritative `address -> Session` map plus the
//! bidirectional username indices. Session creation binds a wallet identity
//! to a cryptographic client, a DHT node and the relay; WebSocket
//! disconnects never destroy a session, only explicit cleanup does.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::address::{normalize, Address};
use crate::client::CryptoClient;
use crate::config::DHT_REPUBLISH_DELAY_SECS;
use crate::crypto;
use crate::dht::DhtNode;
use crate::error::{AppError, AppResult};
use crate::types::{InitializeRequest, InitializeResponse, Message, User};
use crate::{routing, Gateway};

/// A single wallet's live session.
pub struct Session {
    /// Canonical hex wallet address, the registry key.
    pub address: String,
    /// False when initialize ran without a wallet-signature proof.
    pub verified: bool,
    pub username: RwLock<String>,
    pub client: Arc<CryptoClient>,
    pub dht_node: Arc<DhtNode>,
    /// Chat history, peer address -> ordered messages. Only the owning
    /// wallet's handlers write here.
    pub history: RwLock<HashMap<String, Vec<Message>>>,
    /// Peer profile cache for message attribution.
    pub contacts: RwLock<HashMap<String, User>>,
    inbound_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn set_inbound_task(&self, handle: JoinHandle<()>) {
        let mut slot = self.inbound_task.lock().expect("inbound task lock");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn abort_inbound_task(&self) {
        if let Some(handle) = self.inbound_task.lock().expect("inbound task lock").take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<Session>>,
    /// lowercase username -> wallet address
    username_to_address: HashMap<String, String>,
    /// wallet address -> username (original case)
    address_to_username: HashMap<String, String>,
}

/// All session and username state lives behind one lock, so a session and
/// its username mappings can never disagree.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, address: &str) -> Option<Arc<Session>> {
        self.inner.read().await.sessions.get(address).cloned()
    }

    pub async fn insert(&self, session: Arc<Session>, username: &str) {
        let mut inner = self.inner.write().await;
        inner
            .username_to_address
            .insert(username.to_lowercase(), session.address.clone());
        inner
            .address_to_username
            .insert(session.address.clone(), username.to_string());
        inner.sessions.insert(session.address.clone(), session);
    }

    pub async fn remove(&self, address: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(address);
        if let Some(username) = inner.address_to_username.remove(address) {
            inner.username_to_address.remove(&username.to_lowercase());
        }
        session
    }

    /// Resolves a username (case-insensitive) to a wallet address.
    pub async fn address_for_username(&self, username: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .username_to_address
            .get(&username.to_lowercase())
            .cloned()
    }

    pub async fn username_for_address(&self, address: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .address_to_username
            .get(address)
            .cloned()
    }

    pub async fn rename(&self, address: &str, new_username: &str) {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.address_to_username.remove(address) {
            inner.username_to_address.remove(&old.to_lowercase());
        }
        inner
            .username_to_address
            .insert(new_username.to_lowercase(), address.to_string());
        inner
            .address_to_username
            .insert(address.to_string(), new_username.to_string());
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.sessions.values().cloned().collect()
    }

    /// Finds the session bound to a 20-byte protocol address.
    pub async fn find_by_protocol_address(&self, addr: &Address) -> Option<Arc<Session>> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .find(|s| s.client.address == *addr)
            .cloned()
    }
}

impl Gateway {
    /// Initializes (or revives) the session for a wallet. Ordered steps;
    /// a failure in any step releases everything acquired so far and leaves
    /// no partial session behind.
    pub async fn initialize(self: &Arc<Self>, req: InitializeRequest) -> AppResult<InitializeResponse> {
        let addr = Address::parse(&req.wallet_address)?;
        let wallet = addr.to_hex();

        // Wallet ownership proof is optional; absence downgrades the session
        // to unverified instead of failing.
        let mut verified = false;
        if !req.signature.is_empty() && !req.message.is_empty() {
            crypto::verify_wallet_signature(&req.message, &req.signature, &req.wallet_address)
                .map_err(|e| AppError::unauthorized(format!("Signature verification failed: {e}")))?;
            verified = true;
            tracing::info!(wallet = %wallet, "wallet signature verified");
        } else if !req.signature.is_empty() {
            return Err(AppError::bad_request("Signature provided but message missing"));
        } else {
            tracing::warn!(wallet = %wallet, "no signature provided, session is unverified");
        }

        // Username: explicit argument wins, else the persisted user row.
        let mut username = req.username.clone();
        if username.is_empty() {
            if let Some(user) = self.db.get_user(&wallet).await? {
                username = user.username;
                tracing::info!(wallet = %wallet, username = %username, "loaded existing username");
            }
            if username.is_empty() {
                return Err(AppError::bad_request(
                    "Username required for new user registration",
                ));
            }
        } else if !self.db.is_username_available(&username, &wallet).await? {
            return Err(AppError::conflict(format!(
                "Username '{username}' is already taken. Please choose a different username."
            )));
        }

        // An existing session survives reconnects; only a dead relay link
        // needs repair.
        if let Some(existing) = self.registry.get(&wallet).await {
            if existing.client.is_connected().await {
                return Ok(InitializeResponse {
                    success: true,
                    address: wallet,
                    message: "Session active".to_string(),
                });
            }

            match existing.client.connect_relay().await {
                Ok(link) => {
                    routing::spawn_inbound_task(self.clone(), existing.clone(), link);
                    tracing::info!(wallet = %wallet, "relay reconnected for existing session");
                    return Ok(InitializeResponse {
                        success: true,
                        address: wallet,
                        message: "Session active, relay reconnected".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(wallet = %wallet, error = %e, "relay reconnect failed, rebuilding session");
                    self.cleanup_session(&wallet).await;
                }
            }
        }

        // Fresh session: DHT node, bootstrap, identity + X3DH state, relay.
        let dht_node = DhtNode::new(&wallet, self.dht_network.clone());
        dht_node.start().await?;

        let bootstrapped = self.bootstrap_dht_node(&dht_node).await;

        let client = CryptoClient::new(addr, dht_node.clone(), self.relay.clone());

        let link = match client.connect_relay().await {
            Ok(link) => link,
            Err(e) => {
                dht_node.stop().await;
                return Err(AppError::unavailable(format!(
                    "Failed to connect to relay: {e}"
                )));
            }
        };

        if let Err(e) = client.publish_key_bundle().await {
            tracing::warn!(wallet = %wallet, error = %e, "failed to publish key bundle");
        }

        if let Err(e) = self.db.save_user(&wallet, &username, &[]).await {
            tracing::warn!(wallet = %wallet, error = %e, "failed to persist user row");
        } else if !req.first_name.is_empty() || !req.last_name.is_empty() {
            if let Err(e) = self
                .db
                .update_profile(&wallet, &req.first_name, &req.last_name, "", 0, &[])
                .await
            {
                tracing::warn!(wallet = %wallet, error = %e, "failed to persist profile names");
            }
        }

        let history = self.db.load_all_chats(&wallet).await.unwrap_or_default();
        if !history.is_empty() {
            tracing::info!(wallet = %wallet, chats = history.len(), "loaded chat history");
        }

        let session = Arc::new(Session {
            address: wallet.clone(),
            verified,
            username: RwLock::new(username.clone()),
            client,
            dht_node,
            history: RwLock::new(history),
            contacts: RwLock::new(HashMap::new()),
            inbound_task: std::sync::Mutex::new(None),
        });

        self.registry.insert(session.clone(), &username).await;
        routing::spawn_inbound_task(self.clone(), session.clone(), link);

        if bootstrapped {
            self.schedule_bundle_republish(&wallet).await;
        }

        tracing::info!(wallet = %wallet, username = %username, "client initialized");

        Ok(InitializeResponse {
            success: true,
            address: wallet,
            message: "Client initialized successfully".to_string(),
        })
    }

    /// Stops a session's resources and unbinds it. Persisted data stays.
    pub async fn cleanup_session(&self, wallet: &str) {
        let Some(session) = self.registry.remove(wallet).await else {
            return;
        };

        session.abort_inbound_task();
        session.client.disconnect().await;
        session.dht_node.stop().await;
        tracing::info!(wallet = %wallet, "session cleaned up");
    }

    /// Links a new DHT node against one peer node from another live session.
    /// Returns whether any bootstrap succeeded.
    async fn bootstrap_dht_node(&self, node: &Arc<DhtNode>) -> bool {
        for session in self.registry.all().await {
            if session.dht_node.id == node.id || !session.dht_node.is_running() {
                continue;
            }
            match node.bootstrap(&session.dht_node.id).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(error = %e, "bootstrap attempt failed");
                }
            }
        }
        false
    }

    /// After a new node joins, existing sessions republish their key bundles
    /// once routing tables have had a moment to stabilize, so the new node
    /// learns them.
    async fn schedule_bundle_republish(&self, new_wallet: &str) {
        for session in self.registry.all().await {
            if session.address == new_wallet {
                continue;
            }
            let client = session.client.clone();
            let wallet = session.address.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(DHT_REPUBLISH_DELAY_SECS)).await;
                if let Err(e) = client.publish_key_bundle().await {
                    tracing::warn!(wallet = %wallet, error = %e, "key bundle republish failed");
                } else {
                    tracing::debug!(wallet = %wallet, "republished key bundle for new DHT node");
                }
            });
        }
    }

    /// Builds the user snapshot for a peer address: the persisted profile
    /// when present, otherwise a display stub derived from the address.
    pub async fn user_snapshot(&self, address: &str) -> User {
        let normalized = normalize(address);

        if let Ok(Some(mut user)) = self.db.get_user(&normalized).await {
            user.online = self.hub.is_online(&normalized).await;
            if user.status.is_empty() {
                user.status = "online".to_string();
            }
            return user;
        }

        let (name, username) = match self.registry.username_for_address(&normalized).await {
            Some(u) => (u.clone(), format!("@{u}")),
            None => crate::address::display_name_from_address(&normalized),
        };

        User {
            name,
            username,
            bio: String::new(),
            online: self.hub.is_online(&normalized).await,
            status: "online".to_string(),
            address: normalized,
            ..Default::default()
        }
    }
}
