//! Search engine (C6): strategy-selected cross-collection query, hit
//! merge/normalize/sort, and `search_id` assignment via the search cache.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::EmbeddingClient;
use crate::error::RagError;
use crate::models::{Collection, SearchHit, SearchResultSet};
use crate::registry::DocumentRegistry;
use crate::search_cache::SearchCache;
use crate::store::{Predicate, VectorStore, Where};

const EQUAL_SIMILARITY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub collections: Option<Vec<Collection>>,
    #[serde(default)]
    pub documents: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_documents: Option<Vec<String>>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub return_chunks: bool,
}

fn default_top_k() -> usize {
    10
}

const MAX_TOP_K: usize = 50;

pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingClient>,
    cache: Arc<SearchCache>,
    registry: Arc<DocumentRegistry>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingClient>,
        cache: Arc<SearchCache>,
        registry: Arc<DocumentRegistry>,
    ) -> Self {
        Self { store, embedding, cache, registry }
    }

    #[tracing::instrument(skip(self, request), fields(query_len = request.query.len()))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResultSet, RagError> {
        if request.query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".to_string()));
        }
        let top_k = request.top_k.clamp(1, MAX_TOP_K);

        let collections = match request.collections {
            Some(c) if !c.is_empty() => c,
            _ => self.select_strategy(request.documents.as_deref()).await?,
        };

        let query_vec = self
            .embedding
            .embed(&[request.query.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::internal("embed", "embedding client returned no vectors"))?;

        let where_ = build_where(&request.documents, &request.exclude_documents);
        let candidate_k = top_k * 3;

        let mut merged: Vec<SearchHit> = Vec::new();
        for collection in &collections {
            let hits = self.store.query(*collection, &query_vec, candidate_k, &where_).await?;
            for hit in hits {
                let similarity = (1.0 - hit.distance).clamp(0.0, 1.0);
                merged.push(SearchHit {
                    content: hit.content,
                    score: similarity,
                    document: hit.document,
                    chunk_id: hit.id,
                    collection: *collection,
                    metadata: hit.metadata,
                });
            }
        }

        if let Some(threshold) = request.threshold {
            merged.retain(|h| h.score >= threshold);
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    if (a.score - b.score).abs() <= EQUAL_SIMILARITY_EPSILON {
                        a.collection.tie_break_rank().cmp(&b.collection.tie_break_rank()).then_with(|| a.chunk_id.cmp(&b.chunk_id))
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
        });
        merged.truncate(top_k);

        let unique_documents: Vec<String> = {
            let mut seen = HashSet::new();
            merged.iter().filter(|h| seen.insert(h.document.clone())).map(|h| h.document.clone()).collect()
        };
        let chunk_ids: Vec<String> = merged.iter().map(|h| h.chunk_id.clone()).collect();

        let result_set = SearchResultSet {
            search_id: Uuid::new_v4(),
            query: request.query,
            results: merged,
            unique_documents,
            chunk_ids,
            collections_searched: collections,
            timestamp: Utc::now(),
        };

        self.cache.put(result_set.clone());
        tracing::info!(search_id = %result_set.search_id, hits = result_set.results.len(), "search completed");
        Ok(result_set)
    }

    /// Strategy selection per §4.6: `paragraph` if `paragraph_summaries` is
    /// populated for any involved document, else `enhanced` if
    /// `logical_summaries` is populated, else `basic`.
    async fn select_strategy(&self, documents: Option<&[String]>) -> Result<Vec<Collection>, RagError> {
        let relevant: Vec<String> = match documents {
            Some(docs) => docs.to_vec(),
            None => self.registry.list().await.into_iter().map(|d| d.filename).collect(),
        };

        let mut paragraph_populated = false;
        let mut logical_populated = false;
        for filename in &relevant {
            if let Some(info) = self.registry.get(filename).await {
                if info.chunk_counts.get(Collection::ParagraphSummaries.as_str()).copied().unwrap_or(0) > 0 {
                    paragraph_populated = true;
                }
                if info.chunk_counts.get(Collection::LogicalSummaries.as_str()).copied().unwrap_or(0) > 0 {
                    logical_populated = true;
                }
            }
        }

        Ok(if paragraph_populated {
            vec![Collection::ParagraphSummaries, Collection::Documents]
        } else if logical_populated {
            vec![Collection::LogicalSummaries, Collection::Documents]
        } else {
            vec![Collection::Documents]
        })
    }
}

fn build_where(documents: &Option<Vec<String>>, exclude_documents: &Option<Vec<String>>) -> Where {
    let mut where_: Where = Vec::new();
    if let Some(docs) = documents {
        if !docs.is_empty() {
            where_.push(Predicate::DocumentIn(docs.clone()));
        }
    }
    if let Some(docs) = exclude_documents {
        if !docs.is_empty() {
            where_.push(Predicate::DocumentNotIn(docs.clone()));
        }
    }
    where_
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionSizes {
    pub collection: Collection,
    pub count: u64,
    pub documents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::DemoEmbeddingClient;
    use crate::store::sqlite::SqliteVectorStore;
    use crate::store::UpsertItem;
    use sqlx::SqlitePool;
    use std::time::Duration;

    async fn engine_with_seed(seed: &[(&str, &str)]) -> SearchEngine {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool));
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(DemoEmbeddingClient::new(16));

        for (doc, text) in seed {
            let vector = embedding.embed(&[text.to_string()]).await.unwrap().remove(0);
            store
                .upsert(
                    Collection::Documents,
                    vec![UpsertItem {
                        id: format!("{doc}::documents::000000"),
                        vector,
                        content: text.to_string(),
                        document: doc.to_string(),
                        metadata: serde_json::json!({"document": doc, "chunk_index": 0}),
                    }],
                )
                .await
                .unwrap();
        }

        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        registry.rebuild().await.unwrap();
        let cache = Arc::new(SearchCache::new(100, Duration::from_secs(3600)));
        SearchEngine::new(store, embedding, cache, registry)
    }

    #[allow(dead_code)]
    fn _unused(_: &Config) {}

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let engine = engine_with_seed(&[]).await;
        let err = engine.search(SearchRequest { query: "  ".to_string(), top_k: 10, collections: None, documents: None, exclude_documents: None, threshold: None, return_chunks: false }).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn empty_store_search_returns_fresh_search_id_with_documents_collection() {
        let engine = engine_with_seed(&[]).await;
        let result = engine
            .search(SearchRequest { query: "anything".to_string(), top_k: 10, collections: None, documents: None, exclude_documents: None, threshold: None, return_chunks: false })
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert_eq!(result.collections_searched, vec![Collection::Documents]);
    }

    #[tokio::test]
    async fn search_finds_exact_document() {
        let engine = engine_with_seed(&[("mvp.txt", "Supervised learning uses labeled training data.")]).await;
        let result = engine
            .search(SearchRequest {
                query: "Supervised learning uses labeled training data.".to_string(),
                top_k: 1,
                collections: None,
                documents: None,
                exclude_documents: None,
                threshold: None,
                return_chunks: false,
            })
            .await
            .unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].document, "mvp.txt");
    }

    #[tokio::test]
    async fn scores_are_non_increasing_and_bounded_by_top_k() {
        let engine = engine_with_seed(&[("a.txt", "alpha beta gamma"), ("b.txt", "delta epsilon zeta")]).await;
        let result = engine
            .search(SearchRequest { query: "alpha".to_string(), top_k: 1, collections: None, documents: None, exclude_documents: None, threshold: None, return_chunks: false })
            .await
            .unwrap();
        assert!(result.results.len() <= 1);
        for w in result.results.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[tokio::test]
    async fn document_filter_excludes_other_documents() {
        let engine = engine_with_seed(&[("a.txt", "alpha beta"), ("b.txt", "alpha beta")]).await;
        let result = engine
            .search(SearchRequest {
                query: "alpha".to_string(),
                top_k: 10,
                collections: None,
                documents: Some(vec!["a.txt".to_string()]),
                exclude_documents: None,
                threshold: None,
                return_chunks: false,
            })
            .await
            .unwrap();
        assert!(result.results.iter().all(|h| h.document == "a.txt"));
    }
}
