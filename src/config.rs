use anyhow::Result;

// Defaults match the documented deployment: the gateway listens next to the
// local relay and MeshStorage node.
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_DB_PATH: &str = "./data/messages.db";
const DEFAULT_MESH_STORAGE_URL: &str = "http://localhost:8080";
const DEFAULT_RELAY_ADDR: &str = "localhost:9001";

/// Relay operations time out after this long.
pub const RELAY_TIMEOUT_SECS: u64 = 60;

/// Interval between WebSocket keepalive pings.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Delay before live sessions republish their key bundles after a new DHT
/// node bootstraps, giving routing tables time to stabilize.
pub const DHT_REPUBLISH_DELAY_SECS: u64 = 2;

/// Size of the one-time prekey pool generated at X3DH initialization.
pub const ONE_TIME_PREKEY_COUNT: usize = 32;

/// Gateway configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP port for the HTTP + WebSocket listener.
    pub port: u16,
    /// Path of the SQLite database file.
    pub db_path: String,
    /// Base URL of the MeshStorage API used for avatars and media.
    pub mesh_storage_url: String,
    /// Address of the relay the per-session clients connect to.
    pub relay_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let db_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let mesh_storage_url = std::env::var("MESH_STORAGE_URL")
            .unwrap_or_else(|_| DEFAULT_MESH_STORAGE_URL.to_string());

        let relay_addr =
            std::env::var("RELAY_ADDR").unwrap_or_else(|_| DEFAULT_RELAY_ADDR.to_string());

        Ok(Config {
            port,
            db_path,
            mesh_storage_url,
            relay_addr,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            mesh_storage_url: DEFAULT_MESH_STORAGE_URL.to_string(),
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
        }
    }
}
