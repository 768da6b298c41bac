//! Shared test harness: spawns a gateway over an in-memory database on an
//! ephemeral port and drives it through the real HTTP and WebSocket surface.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use meshtalk_gateway::config::Config;
use meshtalk_gateway::db::Db;
use meshtalk_gateway::{routes, Gateway};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestApp {
    pub address: String,
    pub gateway: Arc<Gateway>,
    pub http: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

    let db = Db::open_in_memory().await.expect("in-memory database");
    let gateway = Gateway::assemble(Config::default(), db);

    let router = routes::router(gateway.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        gateway,
        http: reqwest::Client::new(),
    }
}

/// Deterministic 40-hex test wallet from a repeating byte.
pub fn wallet(byte: u8) -> String {
    hex::encode([byte; 20])
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub async fn initialize(&self, wallet_address: &str, username: &str) -> reqwest::Response {
        self.http
            .post(self.url("/api/initialize"))
            .json(&json!({
                "wallet_address": wallet_address,
                "username": username,
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn post(&self, path: &str, wallet_address: &str, body: Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .header("X-Wallet-Address", wallet_address)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str, wallet_address: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .header("X-Wallet-Address", wallet_address)
            .send()
            .await
            .unwrap()
    }

    pub async fn ws_connect(&self, wallet_address: &str) -> WsClient {
        let url = format!("ws://{}/ws?address={}", self.address, wallet_address);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        // Give the hub a beat to register and broadcast presence.
        tokio::time::sleep(Duration::from_millis(50)).await;
        ws
    }
}

/// Waits for the next event of the given type, skipping others (presence
/// noise is expected on a busy hub).
pub async fn next_event_of(ws: &mut WsClient, event_type: &str) -> Value {
    let deadline = Duration::from_secs(3);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {event_type} event"))
            .expect("websocket closed")
            .expect("websocket error");

        if let WsMessage::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == event_type {
                return value;
            }
        }
    }
}

/// Asserts no event of the given type arrives within the window.
pub async fn assert_no_event_of(ws: &mut WsClient, event_type: &str, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == event_type {
                        return value;
                    }
                }
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;

    if let Ok(event) = result {
        panic!("unexpected {event_type} event: {event}");
    }
}
