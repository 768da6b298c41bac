use sqlx::Row;

use crate::error::AppResult;
use crate::types::Message;

use super::Db;

impl Db {
    pub async fn star_message(
        &self,
        user_addr: &str,
        message_id: &str,
        peer_addr: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO starred_messages (user_address, message_id, peer_address)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_addr)
        .bind(message_id)
        .bind(peer_addr)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn unstar_message(&self, user_addr: &str, message_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM starred_messages WHERE user_address = ? AND message_id = ?")
            .bind(user_addr)
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn is_message_starred(&self, user_addr: &str, message_id: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM starred_messages WHERE user_address = ? AND message_id = ?",
        )
        .bind(user_addr)
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// Starred messages joined against the owner's message rows, newest star
    /// first.
    pub async fn starred_messages(&self, user_addr: &str) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.content, m.timestamp, m.sender, m.media_url,
                   m.is_edited, m.is_deleted, m.is_read, m.reactions
            FROM starred_messages s
            JOIN messages m
              ON m.user_address = s.user_address
             AND m.peer_address = s.peer_address
             AND m.id = s.message_id
            WHERE s.user_address = ?
            ORDER BY s.starred_at DESC
            "#,
        )
        .bind(user_addr)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let sender_raw: String = row.get("sender");
            let reactions_raw: String = row.get("reactions");
            let is_read: bool = row.get("is_read");
            out.push(Message {
                id: row.get("id"),
                content: row.get("content"),
                timestamp: row.get("timestamp"),
                sender: if sender_raw.starts_with('{') {
                    serde_json::from_str(&sender_raw)
                        .map(|u| crate::types::Sender::Peer(Box::new(u)))
                        .unwrap_or_else(|_| crate::types::Sender::Literal(sender_raw.clone()))
                } else {
                    crate::types::Sender::Literal(sender_raw.clone())
                },
                unread: !is_read,
                status: String::new(),
                reactions: serde_json::from_str(&reactions_raw).unwrap_or_default(),
                media_url: row.get("media_url"),
                is_edited: row.get("is_edited"),
                is_deleted: row.get("is_deleted"),
            });
        }
        Ok(out)
    }
}
