//! Raw document text storage.
//!
//! The three vector collections hold chunked/summarized *derivatives* of a
//! document, not the original text. Paragraph ingestion needs the original
//! text to split it into natural paragraphs independently of how it was
//! chunked for the `documents` collection, so the original bytes are kept
//! once, in the plain `documents` table `migrate` creates alongside
//! `vector_chunks`.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::error::RagError;

pub struct DocumentTextStore {
    pool: SqlitePool,
}

impl DocumentTextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent on `filename`; overwrites a prior row on force re-ingest.
    pub async fn save(&self, filename: &str, text: &str) -> Result<String, RagError> {
        let content_hash = hash_text(text);
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (filename, byte_len, content_hash, text, first_ingested_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                byte_len = excluded.byte_len,
                content_hash = excluded.content_hash,
                text = excluded.text
            "#,
        )
        .bind(filename)
        .bind(text.len() as i64)
        .bind(&content_hash)
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(RagError::from)?;
        Ok(content_hash)
    }

    pub async fn get_text(&self, filename: &str) -> Result<Option<String>, RagError> {
        let row = sqlx::query("SELECT text FROM documents WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::from)?;
        Ok(row.map(|r| r.get("text")))
    }

    pub async fn content_hash(&self, filename: &str) -> Result<Option<String>, RagError> {
        let row = sqlx::query("SELECT content_hash FROM documents WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::from)?;
        Ok(row.map(|r| r.get("content_hash")))
    }

    pub async fn clear_all(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM documents").execute(&self.pool).await.map_err(RagError::from)?;
        Ok(())
    }
}

/// Computes the content hash used for idempotency (§3 Document.content_hash).
pub fn hash_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn test_store() -> DocumentTextStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        DocumentTextStore::new(pool)
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = test_store().await;
        store.save("a.txt", "hello world").await.unwrap();
        assert_eq!(store.get_text("a.txt").await.unwrap().as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn save_is_idempotent_on_filename() {
        let store = test_store().await;
        store.save("a.txt", "first").await.unwrap();
        store.save("a.txt", "second").await.unwrap();
        assert_eq!(store.get_text("a.txt").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn identical_text_hashes_identically() {
        assert_eq!(hash_text("same"), hash_text("same"));
        assert_ne!(hash_text("same"), hash_text("different"));
    }

    #[tokio::test]
    async fn missing_document_returns_none() {
        let store = test_store().await;
        assert!(store.get_text("missing.txt").await.unwrap().is_none());
    }
}
