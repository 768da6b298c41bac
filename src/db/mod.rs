use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};

mod channel_members;
mod channel_messages;
mod channels;
mod contacts;
mod media;
mod messages;
mod starred;
mod users;

pub use media::MediaFileRow;
pub use messages::DELETED_TOMBSTONE;

/// SQL schema. Tables hold only what the gateway is allowed to see: user
/// profiles, ciphertext-bearing message rows, channel state and metadata.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    wallet_address TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    bio TEXT NOT NULL DEFAULT '',
    avatar_chunk_id INTEGER NOT NULL DEFAULT 0,
    avatar_key BLOB,
    public_key BLOB,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_online TEXT,
    is_online INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'online'
);

CREATE TABLE IF NOT EXISTS contacts (
    user_address TEXT NOT NULL,
    contact_address TEXT NOT NULL,
    username TEXT NOT NULL DEFAULT '',
    is_blocked INTEGER NOT NULL DEFAULT 0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_address, contact_address),
    FOREIGN KEY (user_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT NOT NULL,
    user_address TEXT NOT NULL,
    peer_address TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    sender TEXT NOT NULL,
    media_url TEXT NOT NULL DEFAULT '',
    is_edited INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    is_read INTEGER NOT NULL DEFAULT 0,
    reactions TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_address, peer_address, id),
    FOREIGN KEY (user_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS starred_messages (
    user_address TEXT NOT NULL,
    message_id TEXT NOT NULL,
    peer_address TEXT NOT NULL,
    starred_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_address, message_id),
    FOREIGN KEY (user_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS media_files (
    id TEXT PRIMARY KEY,
    user_address TEXT NOT NULL,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    mesh_chunk_id INTEGER NOT NULL DEFAULT 0,
    encryption_key BLOB,
    uploaded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    description TEXT NOT NULL DEFAULT '',
    avatar_chunk_id INTEGER NOT NULL DEFAULT 0,
    avatar_key BLOB,
    owner_address TEXT NOT NULL,
    type TEXT NOT NULL CHECK(type IN ('public', 'private')),
    is_verified INTEGER NOT NULL DEFAULT 0,
    subscriber_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channel_members (
    channel_id TEXT NOT NULL,
    user_address TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('owner', 'admin', 'subscriber')),
    joined_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    is_muted INTEGER NOT NULL DEFAULT 0,
    last_read_message_id TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (channel_id, user_address),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (user_address) REFERENCES users(wallet_address) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channel_messages (
    id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    sender_address TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    is_edited INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    is_pinned INTEGER NOT NULL DEFAULT 0,
    pinned_at TEXT NOT NULL DEFAULT '',
    pinned_by TEXT NOT NULL DEFAULT '',
    media_url TEXT NOT NULL DEFAULT '',
    reactions TEXT NOT NULL DEFAULT '[]',
    view_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channel_invites (
    id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    invited_by TEXT NOT NULL,
    invite_code TEXT NOT NULL UNIQUE,
    max_uses INTEGER NOT NULL DEFAULT 0,
    uses INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_user_peer ON messages(user_address, peer_address);
CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
CREATE INDEX IF NOT EXISTS idx_contacts_user ON contacts(user_address);
CREATE INDEX IF NOT EXISTS idx_starred_user ON starred_messages(user_address);
CREATE INDEX IF NOT EXISTS idx_media_user ON media_files(user_address);
CREATE INDEX IF NOT EXISTS idx_channels_name ON channels(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_channels_owner ON channels(owner_address);
CREATE INDEX IF NOT EXISTS idx_channel_members_user ON channel_members(user_address);
CREATE INDEX IF NOT EXISTS idx_channel_members_role ON channel_members(channel_id, role);
CREATE INDEX IF NOT EXISTS idx_channel_messages_channel ON channel_messages(channel_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_channel_messages_pinned ON channel_messages(channel_id, is_pinned);
CREATE INDEX IF NOT EXISTS idx_channel_invites_code ON channel_invites(invite_code);
"#;

/// Persistent store for users, chat history, channels and media metadata.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Opens (and creates if needed) the SQLite database at `path`.
    pub async fn open(path: &str) -> AppResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::internal(format!("cannot create data dir: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| AppError::internal(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        tracing::info!(path = %path, "message database initialized");
        Ok(Db { pool })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::internal(format!("sqlite options: {e}")))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Db { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
