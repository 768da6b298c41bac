//! Realtime hub: per-wallet WebSocket connections and event delivery.
//!
//! Each connection bundles its sink with a mutex; every writer (unicast,
//! broadcast, pinger) serializes frame writes through it. Presence, status
//! and profile broadcasts filter per recipient on the persistent block
//! list; unicast delivery does not filter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsFrame, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::{Mutex, RwLock};

use crate::config::WS_PING_INTERVAL_SECS;
use crate::error::{AppError, AppResult};
use crate::types::{WsEvent, WsOnlineStatus, WsProfileUpdate, WsStatusUpdate};
use crate::Gateway;

/// One wallet's realtime connection; writes go through the per-connection
/// mutex, one frame at a time.
pub struct WsConn {
    pub address: String,
    sink: Mutex<SplitSink<WebSocket, WsFrame>>,
}

impl WsConn {
    pub fn new(address: String, sink: SplitSink<WebSocket, WsFrame>) -> Arc<Self> {
        Arc::new(WsConn {
            address,
            sink: Mutex::new(sink),
        })
    }

    pub async fn send_event(&self, event: &WsEvent) -> AppResult<()> {
        let json = serde_json::to_string(event)?;
        let mut sink = self.sink.lock().await;
        sink.send(WsFrame::Text(json.into()))
            .await
            .map_err(|e| AppError::unavailable(format!("websocket write failed: {e}")))
    }

    async fn ping(&self) -> bool {
        let mut sink = self.sink.lock().await;
        sink.send(WsFrame::Ping(Vec::new().into())).await.is_ok()
    }
}

/// Connection and presence maps.
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<String, Arc<WsConn>>>,
    online: RwLock<HashMap<String, bool>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: Arc<WsConn>) {
        self.connections
            .write()
            .await
            .insert(conn.address.clone(), conn.clone());
        self.online.write().await.insert(conn.address.clone(), true);
    }

    pub async fn unregister(&self, address: &str) {
        self.connections.write().await.remove(address);
        self.online.write().await.remove(address);
    }

    pub async fn is_online(&self, address: &str) -> bool {
        self.online.read().await.get(address).copied().unwrap_or(false)
    }

    pub async fn online_addresses(&self) -> Vec<String> {
        self.online.read().await.keys().cloned().collect()
    }

    pub async fn connection(&self, address: &str) -> Option<Arc<WsConn>> {
        self.connections.read().await.get(address).cloned()
    }

    /// Copy of the connection map, taken so no lock is held across writes.
    pub async fn snapshot(&self) -> Vec<Arc<WsConn>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Unicast. Delivery to self is never block-filtered.
    pub async fn send_to(&self, address: &str, event: &WsEvent) -> AppResult<()> {
        let conn = self
            .connection(address)
            .await
            .ok_or_else(|| AppError::not_found(format!("no connection for address {address}")))?;
        conn.send_event(event).await
    }
}

impl Gateway {
    /// Best-effort unicast; offline recipients are a debug log, not an error.
    pub async fn notify(&self, address: &str, event_type: &str, payload: impl serde::Serialize) {
        let event = WsEvent::new(event_type, payload);
        if let Err(e) = self.hub.send_to(address, &event).await {
            tracing::debug!(address = %address, event = %event_type, error = %e, "event not delivered");
        }
    }

    /// Broadcasts to every connection except receivers that have blocked
    /// `sender`.
    pub async fn broadcast_filtered(&self, sender: &str, event: &WsEvent) {
        let conns = self.hub.snapshot().await;
        for conn in conns {
            if conn.address != sender {
                match self.db.is_blocked(&conn.address, sender).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "block check failed, skipping receiver");
                        continue;
                    }
                }
            }
            if let Err(e) = conn.send_event(event).await {
                tracing::debug!(address = %conn.address, error = %e, "broadcast write failed");
            }
        }
    }

    pub async fn broadcast_online_status(&self, sender: &str, online: bool) {
        let event = WsEvent::new(
            "online",
            WsOnlineStatus {
                address: sender.to_string(),
                online,
            },
        );
        self.broadcast_filtered(sender, &event).await;
    }

    pub async fn broadcast_status_update(&self, sender: &str, status: &str) {
        let event = WsEvent::new(
            "status_update",
            WsStatusUpdate {
                address: sender.to_string(),
                status: status.to_string(),
            },
        );
        self.broadcast_filtered(sender, &event).await;
    }

    pub async fn broadcast_profile_update(
        &self,
        sender: &str,
        first_name: &str,
        last_name: &str,
        bio: &str,
        avatar_chunk_id: u64,
    ) {
        let event = WsEvent::new(
            "profile_update",
            WsProfileUpdate {
                address: sender.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                bio: bio.to_string(),
                avatar_chunk_id,
            },
        );
        self.broadcast_filtered(sender, &event).await;
    }

    /// Tears down connection state after a WebSocket closes. The session
    /// itself stays registered so the wallet can reconnect.
    pub async fn handle_ws_disconnect(&self, address: &str) {
        self.hub.unregister(address).await;

        if let Err(e) = self.db.update_last_online(address).await {
            tracing::warn!(address = %address, error = %e, "failed to persist last_online");
        }

        tracing::info!(address = %address, "websocket disconnected");
        self.broadcast_online_status(address, false).await;
    }
}

/// Keepalive: ping every connection on an interval; a failed write culls
/// the connection.
pub fn spawn_ping_task(gateway: Arc<Gateway>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let conns = gateway.hub.snapshot().await;
            for conn in conns {
                if !conn.ping().await {
                    tracing::warn!(address = %conn.address, "ping failed, closing connection");
                    gateway.handle_ws_disconnect(&conn.address).await;
                }
            }
        }
    });
}
