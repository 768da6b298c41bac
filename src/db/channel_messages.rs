use chrono::Utc;
use sqlx::Row;

use crate::error::AppResult;
use crate::types::{ChannelMessage, Reaction, User};

use super::Db;

const CM_COLUMNS: &str = "id, channel_id, sender_address, content, timestamp, is_edited, \
     is_deleted, is_pinned, pinned_at, pinned_by, media_url, reactions, view_count";

impl Db {
    async fn channel_message_from_row(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> AppResult<ChannelMessage> {
        let sender_address: String = row.get("sender_address");
        let sender = self
            .get_user(&sender_address)
            .await?
            .unwrap_or_else(|| User {
                address: sender_address.clone(),
                name: sender_address.clone(),
                status: "offline".to_string(),
                ..Default::default()
            });

        let reactions_raw: String = row.get("reactions");

        Ok(ChannelMessage {
            id: row.get("id"),
            channel_id: row.get("channel_id"),
            sender,
            content: row.get("content"),
            timestamp: row.get("timestamp"),
            is_edited: row.get("is_edited"),
            is_deleted: row.get("is_deleted"),
            is_pinned: row.get("is_pinned"),
            pinned_at: row.get("pinned_at"),
            pinned_by: row.get("pinned_by"),
            media_url: row.get("media_url"),
            reactions: serde_json::from_str(&reactions_raw).unwrap_or_default(),
            view_count: row.get("view_count"),
        })
    }

    pub async fn save_channel_message(&self, msg: &ChannelMessage) -> AppResult<()> {
        let reactions = serde_json::to_string(&msg.reactions)?;
        sqlx::query(
            r#"
            INSERT INTO channel_messages
                (id, channel_id, sender_address, content, timestamp, media_url, reactions)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                reactions = excluded.reactions
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.channel_id)
        .bind(&msg.sender.address)
        .bind(&msg.content)
        .bind(&msg.timestamp)
        .bind(&msg.media_url)
        .bind(&reactions)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Loads channel messages newest-window-first; `before` pages backwards
    /// by message id.
    pub async fn load_channel_messages(
        &self,
        channel_id: &str,
        limit: i64,
        before: Option<&str>,
    ) -> AppResult<Vec<ChannelMessage>> {
        let rows = match before {
            Some(before_id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {CM_COLUMNS} FROM channel_messages
                    WHERE channel_id = ?
                      AND created_at < (SELECT created_at FROM channel_messages WHERE id = ?)
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#
                ))
                .bind(channel_id)
                .bind(before_id)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {CM_COLUMNS} FROM channel_messages
                    WHERE channel_id = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#
                ))
                .bind(channel_id)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };

        // Reverse so the caller receives chronological order.
        let mut out = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            out.push(self.channel_message_from_row(row).await?);
        }
        Ok(out)
    }

    pub async fn get_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> AppResult<Option<ChannelMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {CM_COLUMNS} FROM channel_messages WHERE channel_id = ? AND id = ?"
        ))
        .bind(channel_id)
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(self.channel_message_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    pub async fn edit_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
        new_content: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages SET content = ?, is_edited = 1
            WHERE channel_id = ? AND id = ? AND is_deleted = 0
            "#,
        )
        .bind(new_content)
        .bind(channel_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages
            SET is_deleted = 1, content = ?, media_url = '', is_pinned = 0
            WHERE channel_id = ? AND id = ?
            "#,
        )
        .bind(super::messages::DELETED_TOMBSTONE)
        .bind(channel_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn pin_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
        pinned_by: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages SET is_pinned = 1, pinned_at = ?, pinned_by = ?
            WHERE channel_id = ? AND id = ? AND is_deleted = 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(pinned_by)
        .bind(channel_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unpin_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages SET is_pinned = 0, pinned_at = '', pinned_by = ''
            WHERE channel_id = ? AND id = ?
            "#,
        )
        .bind(channel_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn pinned_channel_messages(
        &self,
        channel_id: &str,
    ) -> AppResult<Vec<ChannelMessage>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CM_COLUMNS} FROM channel_messages
            WHERE channel_id = ? AND is_pinned = 1
            ORDER BY pinned_at DESC
            "#
        ))
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.channel_message_from_row(row).await?);
        }
        Ok(out)
    }

    pub async fn update_channel_message_reactions(
        &self,
        channel_id: &str,
        message_id: &str,
        reactions: &[Reaction],
    ) -> AppResult<()> {
        let json = serde_json::to_string(reactions)?;
        sqlx::query("UPDATE channel_messages SET reactions = ? WHERE channel_id = ? AND id = ?")
            .bind(&json)
            .bind(channel_id)
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn increment_channel_message_views(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> AppResult<()> {
        for id in message_ids {
            sqlx::query(
                "UPDATE channel_messages SET view_count = view_count + 1 WHERE channel_id = ? AND id = ?",
            )
            .bind(channel_id)
            .bind(id)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }
}
