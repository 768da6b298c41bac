use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::types::{Channel, CreateChannelRequest, UpdateChannelRequest};

use super::Db;

fn channel_from_row(row: &sqlx::sqlite::SqliteRow, user_role: String) -> Channel {
    Channel {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        avatar_chunk_id: row.get::<i64, _>("avatar_chunk_id") as u64,
        avatar_key: row
            .get::<Option<Vec<u8>>, _>("avatar_key")
            .unwrap_or_default(),
        owner_address: row.get("owner_address"),
        channel_type: row.get("type"),
        is_verified: row.get("is_verified"),
        subscriber_count: row.get("subscriber_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        user_role,
    }
}

const CHANNEL_COLUMNS: &str = "id, name, description, avatar_chunk_id, avatar_key, \
     owner_address, type, is_verified, subscriber_count, created_at, updated_at";

impl Db {
    pub async fn is_channel_name_taken(&self, name: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM channels WHERE name = ? COLLATE NOCASE")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Creates a channel and its owner membership in one transaction, so the
    /// subscriber count can never drift from the member rows.
    pub async fn create_channel(
        &self,
        owner_addr: &str,
        req: &CreateChannelRequest,
        avatar_key: &[u8],
    ) -> AppResult<Channel> {
        if self.is_channel_name_taken(&req.name).await? {
            return Err(AppError::conflict(format!(
                "Channel name '{}' is already taken",
                req.name
            )));
        }

        let channel_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO channels
                (id, name, description, avatar_chunk_id, avatar_key, owner_address,
                 type, subscriber_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&channel_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.avatar_chunk_id as i64)
        .bind(avatar_key)
        .bind(owner_addr)
        .bind(&req.channel_type)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO channel_members (channel_id, user_address, role, joined_at) VALUES (?, ?, 'owner', ?)",
        )
        .bind(&channel_id)
        .bind(owner_addr)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let mut added = 1i64;
        for member in &req.initial_members {
            let member = crate::address::normalize(member);
            if member == owner_addr {
                continue;
            }
            let result = sqlx::query(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_address, role, joined_at) VALUES (?, ?, 'subscriber', ?)",
            )
            .bind(&channel_id)
            .bind(&member)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as i64;
        }

        sqlx::query("UPDATE channels SET subscriber_count = ? WHERE id = ?")
            .bind(added)
            .bind(&channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(channel = %req.name, id = %channel_id, owner = %owner_addr, "channel created");

        Ok(Channel {
            id: channel_id,
            name: req.name.clone(),
            description: req.description.clone(),
            avatar_chunk_id: req.avatar_chunk_id,
            avatar_key: avatar_key.to_vec(),
            owner_address: owner_addr.to_string(),
            channel_type: req.channel_type.clone(),
            is_verified: false,
            subscriber_count: added,
            created_at: now.clone(),
            updated_at: now,
            user_role: "owner".to_string(),
        })
    }

    /// Fetches a channel; `user_addr` resolves the caller's role.
    pub async fn get_channel(&self, channel_id: &str, user_addr: &str) -> AppResult<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };

        let role = self
            .channel_role(channel_id, user_addr)
            .await?
            .unwrap_or_default();
        Ok(Some(channel_from_row(&row, role)))
    }

    /// Channels the user belongs to, newest first.
    pub async fn user_channels(&self, user_addr: &str) -> AppResult<Vec<Channel>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHANNEL_COLUMNS}, m.role AS user_role
            FROM channels c
            JOIN channel_members m ON m.channel_id = c.id
            WHERE m.user_address = ?
            ORDER BY c.created_at DESC
            "#
        ))
        .bind(user_addr)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let role: String = row.get("user_role");
                channel_from_row(row, role)
            })
            .collect())
    }

    pub async fn update_channel(
        &self,
        channel_id: &str,
        req: &UpdateChannelRequest,
        avatar_key: Option<Vec<u8>>,
    ) -> AppResult<()> {
        if let Some(name) = &req.name {
            // Renames must not collide with another channel.
            let row = sqlx::query("SELECT id FROM channels WHERE name = ? COLLATE NOCASE")
                .bind(name)
                .fetch_optional(self.pool())
                .await?;
            if let Some(row) = row {
                let existing: String = row.get("id");
                if existing != channel_id {
                    return Err(AppError::conflict(format!(
                        "Channel name '{name}' is already taken"
                    )));
                }
            }
            sqlx::query("UPDATE channels SET name = ? WHERE id = ?")
                .bind(name)
                .bind(channel_id)
                .execute(self.pool())
                .await?;
        }

        if let Some(description) = &req.description {
            sqlx::query("UPDATE channels SET description = ? WHERE id = ?")
                .bind(description)
                .bind(channel_id)
                .execute(self.pool())
                .await?;
        }

        if let Some(chunk_id) = req.avatar_chunk_id {
            sqlx::query("UPDATE channels SET avatar_chunk_id = ? WHERE id = ?")
                .bind(chunk_id as i64)
                .bind(channel_id)
                .execute(self.pool())
                .await?;
        }

        if let Some(key) = avatar_key {
            sqlx::query("UPDATE channels SET avatar_key = ? WHERE id = ?")
                .bind(key)
                .bind(channel_id)
                .execute(self.pool())
                .await?;
        }

        sqlx::query("UPDATE channels SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(channel_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Deletes a channel; member, message and invite rows cascade.
    pub async fn delete_channel(&self, channel_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Public-channel discovery by name/description substring.
    pub async fn discover_public_channels(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Channel>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHANNEL_COLUMNS} FROM channels
            WHERE type = 'public' AND (name LIKE ? OR description LIKE ?)
            ORDER BY subscriber_count DESC, created_at DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| channel_from_row(row, String::new()))
            .collect())
    }
}
