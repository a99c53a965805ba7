//! Vector store (C3): collection-keyed CRUD and k-NN query with metadata
//! filters, generalized from a single-collection `Store` trait to the
//! three fixed collections this service indexes into.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::Collection;

/// An item to upsert: idempotent on `id` (the chunk's `chunk_id`).
#[derive(Debug, Clone)]
pub struct UpsertItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// A raw hit returned by the store before distance-to-similarity conversion.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    pub document: String,
    pub content: String,
    pub distance: f32,
    pub metadata: serde_json::Value,
}

/// A conjunction of exact-match metadata predicates.
#[derive(Debug, Clone)]
pub enum Predicate {
    DocumentIn(Vec<String>),
    DocumentNotIn(Vec<String>),
    ChunkIdIn(Vec<String>),
}

pub type Where = Vec<Predicate>;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent on `id`.
    async fn upsert(&self, collection: Collection, items: Vec<UpsertItem>) -> Result<(), RagError>;

    /// Returns hits sorted by ascending distance (descending similarity).
    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
        where_: &Where,
    ) -> Result<Vec<StoreHit>, RagError>;

    /// Returns the number of rows deleted.
    async fn delete(&self, collection: Collection, where_: &Where) -> Result<u64, RagError>;

    async fn count(&self, collection: Collection, where_: &Where) -> Result<u64, RagError>;

    /// Used by C9 for document inventory; `field` is currently always `"document"`.
    async fn list_distinct(&self, collection: Collection, field: &str) -> Result<Vec<String>, RagError>;

    /// Fetches every chunk of `document` in `collection`, ordered by
    /// ascending `chunk_id` — the zero-padded index suffix makes lexical and
    /// numeric order coincide. Used by the ingestion pipeline to read back
    /// raw chunks before grouping them into summary windows.
    async fn fetch_by_document(&self, collection: Collection, document: &str) -> Result<Vec<StoreHit>, RagError>;

    /// Fetches the chunks identified by `ids` within `collection`, in no
    /// particular order. Used by the QA orchestrator to resolve an explicit
    /// `chunk_ids` context request.
    async fn fetch_by_ids(&self, collection: Collection, ids: &[String]) -> Result<Vec<StoreHit>, RagError>;

    async fn heartbeat(&self) -> bool;
}

/// Encodes a float32 vector as a little-endian byte blob for storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decodes a little-endian byte blob back into a float32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()
}

/// Cosine similarity in `[-1, 1]`; returns 0.0 if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
