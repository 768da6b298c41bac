use std::collections::HashMap;

use sqlx::Row;

use crate::error::AppResult;
use crate::types::{Message, Reaction, Sender};

use super::Db;

/// Tombstone written over the content of soft-deleted messages.
pub const DELETED_TOMBSTONE: &str = "This message was deleted";

fn sender_to_column(sender: &Sender) -> String {
    match sender {
        Sender::Literal(s) => s.clone(),
        Sender::Peer(user) => serde_json::to_string(user).unwrap_or_else(|_| "You".to_string()),
    }
}

fn sender_from_column(raw: &str) -> Sender {
    if raw.starts_with('{') {
        if let Ok(user) = serde_json::from_str(raw) {
            return Sender::Peer(Box::new(user));
        }
    }
    Sender::Literal(raw.to_string())
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Message {
    let sender_raw: String = row.get("sender");
    let reactions_raw: String = row.get("reactions");
    let reactions: Vec<Reaction> = serde_json::from_str(&reactions_raw).unwrap_or_default();
    let is_read: bool = row.get("is_read");

    Message {
        id: row.get("id"),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
        sender: sender_from_column(&sender_raw),
        unread: !is_read,
        status: String::new(),
        reactions,
        media_url: row.get("media_url"),
        is_edited: row.get("is_edited"),
        is_deleted: row.get("is_deleted"),
    }
}

const MESSAGE_COLUMNS: &str =
    "id, content, timestamp, sender, media_url, is_edited, is_deleted, is_read, reactions";

impl Db {
    /// Saves a message row. Keyed on `(user, peer, id)`, so redelivery of the
    /// same message is an update rather than a duplicate row.
    pub async fn save_message(&self, user_addr: &str, peer_addr: &str, msg: &Message) -> AppResult<()> {
        let sender = sender_to_column(&msg.sender);
        let reactions = serde_json::to_string(&msg.reactions)?;
        // Locally sent messages are read by definition.
        let is_read = if msg.sender.is_local() { true } else { !msg.unread };

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, user_address, peer_address, content, timestamp, sender,
                 media_url, is_edited, is_deleted, is_read, reactions)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_address, peer_address, id) DO UPDATE SET
                content = excluded.content,
                is_edited = excluded.is_edited,
                is_deleted = excluded.is_deleted,
                media_url = excluded.media_url,
                reactions = excluded.reactions
            "#,
        )
        .bind(&msg.id)
        .bind(user_addr)
        .bind(peer_addr)
        .bind(&msg.content)
        .bind(&msg.timestamp)
        .bind(&sender)
        .bind(&msg.media_url)
        .bind(msg.is_edited)
        .bind(msg.is_deleted)
        .bind(is_read)
        .bind(&reactions)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn load_messages(&self, user_addr: &str, peer_addr: &str) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE user_address = ? AND peer_address = ?
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(user_addr)
        .bind(peer_addr)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Loads every chat of a user, keyed by peer address.
    pub async fn load_all_chats(
        &self,
        user_addr: &str,
    ) -> AppResult<HashMap<String, Vec<Message>>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT peer_address, {MESSAGE_COLUMNS} FROM messages
            WHERE user_address = ?
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(user_addr)
        .fetch_all(self.pool())
        .await?;

        let mut chats: HashMap<String, Vec<Message>> = HashMap::new();
        for row in &rows {
            let peer: String = row.get("peer_address");
            chats.entry(peer).or_default().push(message_from_row(row));
        }
        Ok(chats)
    }

    /// Soft delete: tombstone the content, clear media, keep the row so the
    /// id stays burned for dedup.
    pub async fn soft_delete_message(
        &self,
        user_addr: &str,
        peer_addr: &str,
        message_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_deleted = 1, content = ?, media_url = ''
            WHERE user_address = ? AND peer_address = ? AND id = ?
            "#,
        )
        .bind(DELETED_TOMBSTONE)
        .bind(user_addr)
        .bind(peer_addr)
        .bind(message_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn edit_message(
        &self,
        user_addr: &str,
        peer_addr: &str,
        message_id: &str,
        new_content: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET content = ?, is_edited = 1
            WHERE user_address = ? AND peer_address = ? AND id = ? AND is_deleted = 0
            "#,
        )
        .bind(new_content)
        .bind(user_addr)
        .bind(peer_addr)
        .bind(message_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_message_read(
        &self,
        user_addr: &str,
        peer_addr: &str,
        message_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages SET is_read = 1
            WHERE user_address = ? AND peer_address = ? AND id = ?
            "#,
        )
        .bind(user_addr)
        .bind(peer_addr)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_message_reactions(
        &self,
        user_addr: &str,
        peer_addr: &str,
        message_id: &str,
        reactions: &[Reaction],
    ) -> AppResult<()> {
        let json = serde_json::to_string(reactions)?;
        sqlx::query(
            r#"
            UPDATE messages SET reactions = ?
            WHERE user_address = ? AND peer_address = ? AND id = ?
            "#,
        )
        .bind(&json)
        .bind(user_addr)
        .bind(peer_addr)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Hard-deletes a whole chat for one owner (the peer's copy is theirs).
    pub async fn delete_chat(&self, user_addr: &str, peer_addr: &str) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM messages WHERE user_address = ? AND peer_address = ?")
            .bind(user_addr)
            .bind(peer_addr)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM starred_messages WHERE user_address = ? AND peer_address = ?")
            .bind(user_addr)
            .bind(peer_addr)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_message(
        &self,
        user_addr: &str,
        peer_addr: &str,
        message_id: &str,
    ) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE user_address = ? AND peer_address = ? AND id = ?
            "#
        ))
        .bind(user_addr)
        .bind(peer_addr)
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(message_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            content: content.to_string(),
            timestamp: "2026-08-01 12:00".to_string(),
            sender: Sender::you(),
            unread: false,
            status: "delivered".to_string(),
            reactions: vec![],
            media_url: String::new(),
            is_edited: false,
            is_deleted: false,
        }
    }

    #[tokio::test]
    async fn save_is_idempotent_and_last_write_wins() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("aa", "alice", &[]).await.unwrap();

        db.save_message("aa", "bb", &sample("msg_1", "first"))
            .await
            .unwrap();
        db.save_message("aa", "bb", &sample("msg_1", "second"))
            .await
            .unwrap();

        let msgs = db.load_messages("aa", "bb").await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "second");
    }

    #[tokio::test]
    async fn same_id_under_different_owner_is_a_separate_row() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("aa", "alice", &[]).await.unwrap();
        db.save_user("bb", "bob", &[]).await.unwrap();

        db.save_message("aa", "bb", &sample("msg_7", "from alice side"))
            .await
            .unwrap();
        db.save_message("bb", "aa", &sample("msg_7", "from bob side"))
            .await
            .unwrap();

        assert_eq!(db.load_messages("aa", "bb").await.unwrap().len(), 1);
        assert_eq!(db.load_messages("bb", "aa").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_tombstones_content() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("aa", "alice", &[]).await.unwrap();
        let mut msg = sample("msg_1", "[MEDIA] http://x/1");
        msg.media_url = "http://x/1".to_string();
        db.save_message("aa", "bb", &msg).await.unwrap();

        assert!(db.soft_delete_message("aa", "bb", "msg_1").await.unwrap());
        let msgs = db.load_messages("aa", "bb").await.unwrap();
        assert_eq!(msgs[0].content, DELETED_TOMBSTONE);
        assert!(msgs[0].is_deleted);
        assert!(msgs[0].media_url.is_empty());
    }

    #[tokio::test]
    async fn sender_round_trips_through_column() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("bb", "bob", &[]).await.unwrap();

        let user = crate::types::User {
            name: "Alice".into(),
            username: "alice".into(),
            bio: String::new(),
            online: true,
            status: "online".into(),
            address: "aa".repeat(20),
            ..Default::default()
        };
        let mut msg = sample("msg_9", "hello");
        msg.sender = Sender::Peer(Box::new(user));
        msg.unread = true;
        db.save_message("bb", &"aa".repeat(20), &msg).await.unwrap();

        let msgs = db.load_messages("bb", &"aa".repeat(20)).await.unwrap();
        match &msgs[0].sender {
            Sender::Peer(u) => assert_eq!(u.username, "alice"),
            other => panic!("expected peer sender, got {other:?}"),
        }
        assert!(msgs[0].unread);
    }
}
