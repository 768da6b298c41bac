use crate::error::AppResult;

use super::Db;

/// Metadata row for an uploaded media file; the bytes themselves live in
/// MeshStorage under `mesh_chunk_id`, encrypted with `encryption_key`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaFileRow {
    pub id: String,
    pub user_address: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub mesh_chunk_id: i64,
    pub encryption_key: Option<Vec<u8>>,
    pub uploaded_at: String,
}

impl Db {
    #[allow(clippy::too_many_arguments)]
    pub async fn save_media_file(
        &self,
        id: &str,
        user_addr: &str,
        file_name: &str,
        mime_type: &str,
        file_size: i64,
        mesh_chunk_id: u64,
        encryption_key: &[u8],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO media_files
                (id, user_address, file_name, mime_type, file_size, mesh_chunk_id, encryption_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_addr)
        .bind(file_name)
        .bind(mime_type)
        .bind(file_size)
        .bind(mesh_chunk_id as i64)
        .bind(encryption_key)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_media_file(&self, media_id: &str) -> AppResult<Option<MediaFileRow>> {
        let row = sqlx::query_as::<_, MediaFileRow>(
            r#"
            SELECT id, user_address, file_name, mime_type, file_size,
                   mesh_chunk_id, encryption_key, uploaded_at
            FROM media_files WHERE id = ?
            "#,
        )
        .bind(media_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn delete_media_file(&self, media_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM media_files WHERE id = ?")
            .bind(media_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
