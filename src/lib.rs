use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod address;
pub mod channels;
pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dht;
pub mod error;
pub mod hub;
pub mod media;
pub mod relay;
pub mod routes;
pub mod routing;
pub mod session;
pub mod types;
pub mod vault;

use config::Config;
use db::Db;
use dht::DhtNetwork;
use error::AppResult;
use hub::Hub;
use media::MeshStorageClient;
use relay::{LocalRelay, RelayTransport};
use session::Registry;
use types::MediaInfo;
use vault::Vault;

/// Process-wide gateway state shared by every handler task.
///
/// Sessions, the realtime hub, the offline vault and the media index each
/// guard their own maps; no lock is ever held across database, socket or
/// DHT I/O.
pub struct Gateway {
    pub config: Config,
    pub db: Db,
    pub registry: Registry,
    pub hub: Hub,
    pub vault: Vault,
    pub media_index: RwLock<HashMap<String, MediaInfo>>,
    pub media_store: MeshStorageClient,
    pub relay: Arc<dyn RelayTransport>,
    pub dht_network: Arc<DhtNetwork>,
}

impl Gateway {
    pub async fn new(config: Config) -> AppResult<Arc<Self>> {
        let db = Db::open(&config.db_path).await?;
        Ok(Self::assemble(config, db))
    }

    /// Builds a gateway over an explicit database handle. Tests use this
    /// with an in-memory database.
    pub fn assemble(config: Config, db: Db) -> Arc<Self> {
        let media_store = MeshStorageClient::new(&config.mesh_storage_url);
        Arc::new(Gateway {
            config,
            db,
            registry: Registry::new(),
            hub: Hub::new(),
            vault: Vault::new(),
            media_index: RwLock::new(HashMap::new()),
            media_store,
            relay: LocalRelay::new(),
            dht_network: DhtNetwork::new(),
        })
    }
}

/// Binary entry point: config, database, router, listener.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let bind_address = format!("0.0.0.0:{}", config.port);

    let gateway = Gateway::new(config).await?;
    tracing::info!(mesh_storage = %gateway.config.mesh_storage_url, "gateway state initialized");

    hub::spawn_ping_task(gateway.clone());

    let router = routes::router(gateway.clone());
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("meshtalk gateway listening on {bind_address}");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
