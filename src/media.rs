//! MeshStorage client: the external blob store holding encrypted media and
//! avatars. The gateway keeps only chunk ids and encryption keys; bytes
//! live remotely.

use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    chunk_id: u64,
    /// Hex-encoded per-chunk encryption key minted by MeshStorage.
    encryption_key: String,
}

/// Thin HTTP client over the MeshStorage API.
#[derive(Clone)]
pub struct MeshStorageClient {
    base_url: String,
    http: reqwest::Client,
}

impl MeshStorageClient {
    pub fn new(base_url: &str) -> Self {
        MeshStorageClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Uploads a blob on behalf of `user_addr`; returns the chunk id and the
    /// encryption key needed to read it back.
    pub async fn upload(&self, user_addr: &str, data: &[u8]) -> AppResult<(u64, Vec<u8>)> {
        let url = format!("{}/api/upload", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-User-Address", user_addr)
            .body(data.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::unavailable(format!(
                "media store upload failed with status {}",
                response.status()
            )));
        }

        let body: UploadResponse = response.json().await?;
        let key = hex::decode(&body.encryption_key)
            .map_err(|_| AppError::internal("media store returned a malformed key"))?;
        Ok((body.chunk_id, key))
    }

    pub async fn download(&self, user_addr: &str, chunk_id: u64) -> AppResult<Vec<u8>> {
        let url = format!("{}/api/download/{chunk_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-User-Address", user_addr)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::not_found(format!(
                "chunk {chunk_id} not found in media store"
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
