use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::types::{ChannelInvite, ChannelMember};

use super::Db;

fn member_from_row(row: &sqlx::sqlite::SqliteRow) -> ChannelMember {
    ChannelMember {
        channel_id: row.get("channel_id"),
        user_address: row.get("user_address"),
        role: row.get("role"),
        joined_at: row.get("joined_at"),
        is_muted: row.get("is_muted"),
        last_read_message_id: row.get("last_read_message_id"),
        username: row
            .try_get::<Option<String>, _>("username")
            .ok()
            .flatten()
            .unwrap_or_default(),
    }
}

fn invite_from_row(row: &sqlx::sqlite::SqliteRow) -> ChannelInvite {
    ChannelInvite {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        invited_by: row.get("invited_by"),
        invite_code: row.get("invite_code"),
        max_uses: row.get("max_uses"),
        uses: row.get("uses"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

const MEMBER_COLUMNS: &str = "m.channel_id, m.user_address, m.role, m.joined_at, \
     m.is_muted, m.last_read_message_id, u.username AS username";

impl Db {
    /// Adds a member and bumps the subscriber count in the same transaction.
    pub async fn add_channel_member(
        &self,
        channel_id: &str,
        user_addr: &str,
        role: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_address, role) VALUES (?, ?, ?)",
        )
        .bind(channel_id)
        .bind(user_addr)
        .bind(role)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE channels SET subscriber_count = subscriber_count + 1 WHERE id = ?")
                .bind(channel_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Removes a member and decrements the subscriber count atomically.
    pub async fn remove_channel_member(&self, channel_id: &str, user_addr: &str) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let result =
            sqlx::query("DELETE FROM channel_members WHERE channel_id = ? AND user_address = ?")
                .bind(channel_id)
                .bind(user_addr)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() > 0 {
            sqlx::query(
                "UPDATE channels SET subscriber_count = MAX(subscriber_count - 1, 0) WHERE id = ?",
            )
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_channel_member(
        &self,
        channel_id: &str,
        user_addr: &str,
    ) -> AppResult<Option<ChannelMember>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MEMBER_COLUMNS}
            FROM channel_members m
            LEFT JOIN users u ON u.wallet_address = m.user_address
            WHERE m.channel_id = ? AND m.user_address = ?
            "#
        ))
        .bind(channel_id)
        .bind(user_addr)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(member_from_row))
    }

    pub async fn channel_members(&self, channel_id: &str) -> AppResult<Vec<ChannelMember>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MEMBER_COLUMNS}
            FROM channel_members m
            LEFT JOIN users u ON u.wallet_address = m.user_address
            WHERE m.channel_id = ?
            ORDER BY m.joined_at ASC
            "#
        ))
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }

    pub async fn channel_role(
        &self,
        channel_id: &str,
        user_addr: &str,
    ) -> AppResult<Option<String>> {
        let row =
            sqlx::query("SELECT role FROM channel_members WHERE channel_id = ? AND user_address = ?")
                .bind(channel_id)
                .bind(user_addr)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|r| r.get("role")))
    }

    pub async fn is_channel_member(&self, channel_id: &str, user_addr: &str) -> AppResult<bool> {
        Ok(self.channel_role(channel_id, user_addr).await?.is_some())
    }

    pub async fn update_member_role(
        &self,
        channel_id: &str,
        user_addr: &str,
        new_role: &str,
    ) -> AppResult<()> {
        sqlx::query("UPDATE channel_members SET role = ? WHERE channel_id = ? AND user_address = ?")
            .bind(new_role)
            .bind(channel_id)
            .bind(user_addr)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Swaps owner and new owner in one transaction, keeping the single-owner
    /// invariant at every observable instant.
    pub async fn transfer_channel_ownership(
        &self,
        channel_id: &str,
        current_owner: &str,
        new_owner: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE channel_members SET role = 'admin' WHERE channel_id = ? AND user_address = ?",
        )
        .bind(channel_id)
        .bind(current_owner)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE channel_members SET role = 'owner' WHERE channel_id = ? AND user_address = ?",
        )
        .bind(channel_id)
        .bind(new_owner)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE channels SET owner_address = ? WHERE id = ?")
            .bind(new_owner)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_channel_muted(
        &self,
        channel_id: &str,
        user_addr: &str,
        muted: bool,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE channel_members SET is_muted = ? WHERE channel_id = ? AND user_address = ?",
        )
        .bind(muted)
        .bind(channel_id)
        .bind(user_addr)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_last_read_message(
        &self,
        channel_id: &str,
        user_addr: &str,
        message_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE channel_members SET last_read_message_id = ? WHERE channel_id = ? AND user_address = ?",
        )
        .bind(message_id)
        .bind(channel_id)
        .bind(user_addr)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // ========================================================================
    // Invites
    // ========================================================================

    /// Creates an invite with a fresh 128-bit code.
    pub async fn create_channel_invite(
        &self,
        channel_id: &str,
        invited_by: &str,
        max_uses: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<ChannelInvite> {
        let mut code_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut code_bytes);
        let invite_code = hex::encode(code_bytes);
        let invite_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let expires = expires_at.map(|t| t.to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO channel_invites
                (id, channel_id, invited_by, invite_code, max_uses, uses, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&invite_id)
        .bind(channel_id)
        .bind(invited_by)
        .bind(&invite_code)
        .bind(max_uses)
        .bind(&expires)
        .bind(&now)
        .execute(self.pool())
        .await?;

        Ok(ChannelInvite {
            id: invite_id,
            channel_id: channel_id.to_string(),
            invited_by: invited_by.to_string(),
            invite_code,
            max_uses,
            uses: 0,
            expires_at: expires,
            created_at: now,
        })
    }

    pub async fn channel_invites(&self, channel_id: &str) -> AppResult<Vec<ChannelInvite>> {
        let rows = sqlx::query(
            r#"
            SELECT id, channel_id, invited_by, invite_code, max_uses, uses, expires_at, created_at
            FROM channel_invites WHERE channel_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(invite_from_row).collect())
    }

    pub async fn revoke_channel_invite(&self, invite_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM channel_invites WHERE id = ?")
            .bind(invite_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Joins a private channel through an invite code. Validation, the `uses`
    /// increment and the membership insert run in one transaction so a code
    /// with `max_uses = 1` cannot be spent twice by racing joins.
    pub async fn join_channel_with_invite(
        &self,
        channel_id: &str,
        user_addr: &str,
        invite_code: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "SELECT channel_id, max_uses, uses, expires_at FROM channel_invites WHERE invite_code = ?",
        )
        .bind(invite_code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(AppError::forbidden("Invalid invite code"));
        };

        let invite_channel: String = row.get("channel_id");
        if invite_channel != channel_id {
            return Err(AppError::forbidden("Invalid invite code for this channel"));
        }

        let max_uses: i64 = row.get("max_uses");
        let uses: i64 = row.get("uses");
        if max_uses > 0 && uses >= max_uses {
            return Err(AppError::forbidden("Invite code has been exhausted"));
        }

        if let Some(expires_at) = row.get::<Option<String>, _>("expires_at") {
            let expired = DateTime::parse_from_rfc3339(&expires_at)
                .map(|t| t < Utc::now())
                .unwrap_or(true);
            if expired {
                return Err(AppError::forbidden("Invite code has expired"));
            }
        }

        sqlx::query("UPDATE channel_invites SET uses = uses + 1 WHERE invite_code = ?")
            .bind(invite_code)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_address, role) VALUES (?, ?, 'subscriber')",
        )
        .bind(channel_id)
        .bind(user_addr)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            sqlx::query("UPDATE channels SET subscriber_count = subscriber_count + 1 WHERE id = ?")
                .bind(channel_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
