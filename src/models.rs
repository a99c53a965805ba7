//! Core data types shared across components: documents, chunks, collections,
//! search hits/result sets, and citations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three fixed vector-store collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Documents,
    LogicalSummaries,
    ParagraphSummaries,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Documents,
        Collection::LogicalSummaries,
        Collection::ParagraphSummaries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Documents => "documents",
            Collection::LogicalSummaries => "logical_summaries",
            Collection::ParagraphSummaries => "paragraph_summaries",
        }
    }

    /// Tie-break rank used when merging hits with equal similarity: lower
    /// rank wins, in the order (documents, paragraph_summaries, logical_summaries).
    pub fn tie_break_rank(&self) -> u8 {
        match self {
            Collection::Documents => 0,
            Collection::ParagraphSummaries => 1,
            Collection::LogicalSummaries => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Collection> {
        match s {
            "documents" => Some(Collection::Documents),
            "logical_summaries" => Some(Collection::LogicalSummaries),
            "paragraph_summaries" => Some(Collection::ParagraphSummaries),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `chunk_id` format: `<document>::<collection>::<zero-padded-index>`.
pub fn make_chunk_id(document: &str, collection: Collection, index: usize) -> String {
    format!("{document}::{}::{index:06}", collection.as_str())
}

/// The atomic indexed unit: text plus metadata plus (once embedded) a vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document: String,
    pub collection: Collection,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// A single retrieval hit. `score` is similarity in `[0,1]`, higher is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f32,
    pub document: String,
    pub chunk_id: String,
    pub collection: Collection,
    pub metadata: serde_json::Value,
}

/// A stored, cacheable outcome of a search, addressable by `search_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub search_id: uuid::Uuid,
    pub query: String,
    pub results: Vec<SearchHit>,
    pub unique_documents: Vec<String>,
    pub chunk_ids: Vec<String>,
    pub collections_searched: Vec<Collection>,
    pub timestamp: DateTime<Utc>,
}

/// A passage reference emitted alongside an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    pub document: String,
    pub collection: Collection,
    pub chunk_id: String,
    pub relevancy_score: f32,
    pub relevancy_percentage: f32,
}

/// Per-document, per-collection chunk counts tracked by the document registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub chunk_counts: std::collections::HashMap<String, u64>,
    pub first_ingest_time: Option<DateTime<Utc>>,
}
