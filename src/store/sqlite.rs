//! SQLite-backed [`VectorStore`]: a single `vector_chunks` table scoped by
//! `collection`, brute-force cosine ranking over the embedding BLOB column —
//! the same full-scan-then-sort approach the original store used, extended
//! with a dynamically built predicate `WHERE` clause via `sqlx::QueryBuilder`.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{blob_to_vec, cosine_similarity, vec_to_blob, Predicate, StoreHit, UpsertItem, VectorStore, Where};
use crate::error::RagError;
use crate::models::Collection;

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_predicates<'a>(qb: &mut QueryBuilder<'a, Sqlite>, where_: &'a Where) {
    for pred in where_ {
        match pred {
            Predicate::DocumentIn(docs) => {
                if docs.is_empty() {
                    qb.push(" AND 0");
                    continue;
                }
                qb.push(" AND document IN (");
                let mut sep = qb.separated(", ");
                for d in docs {
                    sep.push_bind(d);
                }
                qb.push(")");
            }
            Predicate::DocumentNotIn(docs) => {
                if docs.is_empty() {
                    continue;
                }
                qb.push(" AND document NOT IN (");
                let mut sep = qb.separated(", ");
                for d in docs {
                    sep.push_bind(d);
                }
                qb.push(")");
            }
            Predicate::ChunkIdIn(ids) => {
                if ids.is_empty() {
                    qb.push(" AND 0");
                    continue;
                }
                qb.push(" AND chunk_id IN (");
                let mut sep = qb.separated(", ");
                for id in ids {
                    sep.push_bind(id);
                }
                qb.push(")");
            }
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: Collection, items: Vec<UpsertItem>) -> Result<(), RagError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(RagError::from)?;
        let now = chrono::Utc::now().timestamp();

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO vector_chunks (collection, chunk_id, document, content, metadata_json, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, chunk_id) DO UPDATE SET
                    document = excluded.document,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection.as_str())
            .bind(&item.id)
            .bind(&item.document)
            .bind(&item.content)
            .bind(item.metadata.to_string())
            .bind(vec_to_blob(&item.vector))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RagError::from)?;
        }

        tx.commit().await.map_err(RagError::from)?;
        Ok(())
    }

    async fn query(&self, collection: Collection, vector: &[f32], k: usize, where_: &Where) -> Result<Vec<StoreHit>, RagError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT chunk_id, document, content, metadata_json, embedding FROM vector_chunks WHERE collection = ");
        qb.push_bind(collection.as_str());
        push_predicates(&mut qb, where_);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(RagError::from)?;

        let mut hits: Vec<StoreHit> = rows
            .into_iter()
            .map(|row| {
                let embedding: Vec<u8> = row.get("embedding");
                let stored_vector = blob_to_vec(&embedding);
                let similarity = cosine_similarity(vector, &stored_vector);
                let metadata_json: String = row.get("metadata_json");
                StoreHit {
                    id: row.get("chunk_id"),
                    document: row.get("document"),
                    content: row.get("content"),
                    distance: 1.0 - similarity,
                    metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
                }
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: Collection, where_: &Where) -> Result<u64, RagError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM vector_chunks WHERE collection = ");
        qb.push_bind(collection.as_str());
        push_predicates(&mut qb, where_);

        let result = qb.build().execute(&self.pool).await.map_err(RagError::from)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, collection: Collection, where_: &Where) -> Result<u64, RagError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) as n FROM vector_chunks WHERE collection = ");
        qb.push_bind(collection.as_str());
        push_predicates(&mut qb, where_);

        let row = qb.build().fetch_one(&self.pool).await.map_err(RagError::from)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn list_distinct(&self, collection: Collection, field: &str) -> Result<Vec<String>, RagError> {
        if field != "document" {
            return Err(RagError::internal("store", format!("unsupported distinct field: {field}")));
        }
        let rows = sqlx::query("SELECT DISTINCT document FROM vector_chunks WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::from)?;
        Ok(rows.into_iter().map(|r| r.get("document")).collect())
    }

    async fn fetch_by_document(&self, collection: Collection, document: &str) -> Result<Vec<StoreHit>, RagError> {
        let rows = sqlx::query(
            "SELECT chunk_id, document, content, metadata_json, embedding FROM vector_chunks \
             WHERE collection = ? AND document = ? ORDER BY chunk_id ASC",
        )
        .bind(collection.as_str())
        .bind(document)
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::from)?;

        Ok(rows_to_hits(rows))
    }

    async fn fetch_by_ids(&self, collection: Collection, ids: &[String]) -> Result<Vec<StoreHit>, RagError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT chunk_id, document, content, metadata_json, embedding FROM vector_chunks WHERE collection = ",
        );
        qb.push_bind(collection.as_str());
        qb.push(" AND chunk_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id);
        }
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(RagError::from)?;
        Ok(rows_to_hits(rows))
    }

    async fn heartbeat(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

/// Builds [`StoreHit`]s from raw rows with no similarity computed (`distance`
/// left at `0.0`); used by the exact-match fetch paths that do not rank by
/// vector distance.
fn rows_to_hits(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<StoreHit> {
    rows.into_iter()
        .map(|row| {
            let metadata_json: String = row.get("metadata_json");
            StoreHit {
                id: row.get("chunk_id"),
                document: row.get("document"),
                content: row.get("content"),
                distance: 0.0,
                metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
            }
        })
        .collect()
}
