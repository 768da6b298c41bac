use sqlx::Row;

use crate::error::AppResult;
use crate::types::User;

use super::Db;

#[derive(sqlx::FromRow)]
struct UserRow {
    wallet_address: String,
    username: String,
    first_name: String,
    last_name: String,
    bio: String,
    avatar_chunk_id: i64,
    avatar_key: Option<Vec<u8>>,
    is_online: bool,
    status: String,
}

impl UserRow {
    fn into_user(self) -> User {
        // Display name prefers first/last name, falls back to username.
        let name = match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => self.username.clone(),
        };

        let status = if self.status.is_empty() {
            "online".to_string()
        } else {
            self.status
        };

        User {
            name,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            avatar_chunk_id: self.avatar_chunk_id as u64,
            avatar_key: self.avatar_key.unwrap_or_default(),
            bio: self.bio,
            online: self.is_online,
            status,
            address: self.wallet_address,
        }
    }
}

const USER_COLUMNS: &str = "wallet_address, username, first_name, last_name, bio, \
     avatar_chunk_id, avatar_key, is_online, status";

impl Db {
    /// Inserts the user row on first initialize; on conflict keeps the row
    /// and refreshes the username.
    pub async fn save_user(
        &self,
        wallet: &str,
        username: &str,
        public_key: &[u8],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (wallet_address, username, public_key)
            VALUES (?, ?, ?)
            ON CONFLICT(wallet_address) DO UPDATE SET username = excluded.username
            "#,
        )
        .bind(wallet)
        .bind(username)
        .bind(public_key)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, wallet: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE wallet_address = ?"
        ))
        .bind(wallet)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    pub async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? COLLATE NOCASE"
        ))
        .bind(username)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    /// A username is available unless a different wallet already holds it
    /// (case-insensitive).
    pub async fn is_username_available(
        &self,
        username: &str,
        exclude_wallet: &str,
    ) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT wallet_address FROM users WHERE username = ? COLLATE NOCASE",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let holder: String = row.get("wallet_address");
                Ok(holder == exclude_wallet)
            }
            None => Ok(true),
        }
    }

    pub async fn update_profile(
        &self,
        wallet: &str,
        first_name: &str,
        last_name: &str,
        bio: &str,
        avatar_chunk_id: u64,
        avatar_key: &[u8],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?, last_name = ?, bio = ?, avatar_chunk_id = ?, avatar_key = ?
            WHERE wallet_address = ?
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(bio)
        .bind(avatar_chunk_id as i64)
        .bind(avatar_key)
        .bind(wallet)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_username(&self, wallet: &str, new_username: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET username = ? WHERE wallet_address = ?")
            .bind(new_username)
            .bind(wallet)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_user_status(&self, wallet: &str, status: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET status = ? WHERE wallet_address = ?")
            .bind(status)
            .bind(wallet)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_online(&self, wallet: &str, online: bool) -> AppResult<()> {
        sqlx::query("UPDATE users SET is_online = ? WHERE wallet_address = ?")
            .bind(online)
            .bind(wallet)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_last_online(&self, wallet: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET last_online = CURRENT_TIMESTAMP, is_online = 0 WHERE wallet_address = ?",
        )
        .bind(wallet)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Hard-deletes a user and everything referencing it. Channel rows,
    /// contacts, messages, stars and media go with it via ON DELETE CASCADE.
    pub async fn delete_user_data(&self, wallet: &str) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        // Messages this user holds as "peer" on other owners' rows stay:
        // those rows belong to the other wallet's history.
        sqlx::query("DELETE FROM users WHERE wallet_address = ?")
            .bind(wallet)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
