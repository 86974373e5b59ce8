use anyhow::Result;

use super::DbClient;

impl DbClient {
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_encrypted_access_token(&self, owner_id: &str) -> Result<Option<String>> {
        let sealed: Option<String> = sqlx::query_scalar(
            "SELECT encrypted_access_token FROM owner_credentials WHERE owner_id = ?1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sealed)
    }

    /// Stores (or replaces) an owner's sealed source-control token. The
    /// value is ciphertext; plaintext never reaches this layer.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_encrypted_access_token(&self, owner_id: &str, sealed: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO owner_credentials (owner_id, encrypted_access_token) \
             VALUES (?1, ?2) \
             ON CONFLICT(owner_id) DO UPDATE SET \
             encrypted_access_token = excluded.encrypted_access_token, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(owner_id)
        .bind(sealed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
