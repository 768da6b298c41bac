use sqlx::Row;

use crate::error::AppResult;

use super::Db;

impl Db {
    /// Creates the contact row if it does not exist yet.
    pub async fn ensure_contact(
        &self,
        user_addr: &str,
        contact_addr: &str,
        username: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO contacts (user_address, contact_address, username)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_addr)
        .bind(contact_addr)
        .bind(username)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn set_contact_flag(
        &self,
        user_addr: &str,
        contact_addr: &str,
        column: &str,
        value: bool,
    ) -> AppResult<()> {
        // Upsert so blocking works even before any chat exists.
        let query = format!(
            r#"
            INSERT INTO contacts (user_address, contact_address, {column})
            VALUES (?, ?, ?)
            ON CONFLICT(user_address, contact_address) DO UPDATE SET {column} = excluded.{column}
            "#
        );
        sqlx::query(&query)
            .bind(user_addr)
            .bind(contact_addr)
            .bind(value)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_blocked(
        &self,
        user_addr: &str,
        contact_addr: &str,
        blocked: bool,
    ) -> AppResult<()> {
        self.set_contact_flag(user_addr, contact_addr, "is_blocked", blocked)
            .await
    }

    pub async fn set_muted(
        &self,
        user_addr: &str,
        contact_addr: &str,
        muted: bool,
    ) -> AppResult<()> {
        self.set_contact_flag(user_addr, contact_addr, "is_muted", muted)
            .await
    }

    pub async fn set_favorite(
        &self,
        user_addr: &str,
        contact_addr: &str,
        favorite: bool,
    ) -> AppResult<()> {
        self.set_contact_flag(user_addr, contact_addr, "is_favorite", favorite)
            .await
    }

    /// True when `user_addr` has blocked `contact_addr`.
    pub async fn is_blocked(&self, user_addr: &str, contact_addr: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT is_blocked FROM contacts WHERE user_address = ? AND contact_address = ?",
        )
        .bind(user_addr)
        .bind(contact_addr)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| r.get::<bool, _>("is_blocked")).unwrap_or(false))
    }

    pub async fn is_muted(&self, user_addr: &str, contact_addr: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT is_muted FROM contacts WHERE user_address = ? AND contact_address = ?",
        )
        .bind(user_addr)
        .bind(contact_addr)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| r.get::<bool, _>("is_muted")).unwrap_or(false))
    }

    pub async fn blocked_contacts(&self, user_addr: &str) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT contact_address FROM contacts WHERE user_address = ? AND is_blocked = 1",
        )
        .bind(user_addr)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(|r| r.get("contact_address")).collect())
    }

    pub async fn muted_contacts(&self, user_addr: &str) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT contact_address FROM contacts WHERE user_address = ? AND is_muted = 1",
        )
        .bind(user_addr)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(|r| r.get("contact_address")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_flag_round_trip() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("aa", "alice", &[]).await.unwrap();
        db.save_user("bb", "bob", &[]).await.unwrap();

        assert!(!db.is_blocked("aa", "bb").await.unwrap());
        db.set_blocked("aa", "bb", true).await.unwrap();
        assert!(db.is_blocked("aa", "bb").await.unwrap());
        // Blocking is directional.
        assert!(!db.is_blocked("bb", "aa").await.unwrap());

        db.set_blocked("aa", "bb", false).await.unwrap();
        assert!(!db.is_blocked("aa", "bb").await.unwrap());
    }

    #[tokio::test]
    async fn blocked_list_only_returns_blocked() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_user("aa", "alice", &[]).await.unwrap();
        db.set_blocked("aa", "bb", true).await.unwrap();
        db.set_muted("aa", "cc", true).await.unwrap();

        let blocked = db.blocked_contacts("aa").await.unwrap();
        assert_eq!(blocked, vec!["bb".to_string()]);
    }
}
