//! QA orchestrator (C8): resolves context (from `search_id`, explicit chunk
//! ids, a document filter, or a fresh search), builds the LLM prompt,
//! filters citations by relevancy, and returns a sourced answer.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RagError;
use crate::models::{Citation, Collection, SearchHit};
use crate::search_cache::SearchCache;
use crate::search_engine::{SearchEngine, SearchRequest};
use crate::store::VectorStore;
use std::sync::Arc;

use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;

/// Number of trailing Q/A pairs from `conversation_history` kept in the prompt.
const HISTORY_WINDOW: usize = 3;

const BASE_INSTRUCTION: &str = "You answer questions using only the passages provided below. \
Never invent facts beyond what the passages state. For every claim, cite the source filename \
and chunk id using the [cN] tag matching the passage you drew it from. If the provided passages \
do not cover the question, answer exactly: \"I don't know based on the provided documents.\"";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Basic,
    Enhanced,
    Paragraph,
}

impl SearchStrategy {
    fn collections(&self) -> Vec<Collection> {
        match self {
            SearchStrategy::Basic => vec![Collection::Documents],
            SearchStrategy::Enhanced => vec![Collection::LogicalSummaries, Collection::Documents],
            SearchStrategy::Paragraph => vec![Collection::ParagraphSummaries, Collection::Documents],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QaTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub search_id: Option<Uuid>,
    #[serde(default)]
    pub chunk_ids: Option<Vec<String>>,
    #[serde(default)]
    pub documents: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_documents: Option<Vec<String>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<QaTurn>>,
    #[serde(default)]
    pub search_strategy: Option<SearchStrategy>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub raw_citations: Vec<Citation>,
    /// Wall-clock seconds from request arrival to response serialization,
    /// measured with a monotonic clock.
    pub processing_time: f64,
}

pub struct QaOrchestrator {
    store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
    search_engine: Arc<SearchEngine>,
    cache: Arc<SearchCache>,
    citation_threshold: f32,
    /// Hard cap on the number of passages fed into the prompt, regardless
    /// of how many a resolved context (especially an explicit `chunk_ids`
    /// or cached `search_id`) would otherwise supply. Configured via
    /// `MAX_CHUNKS` (§6).
    max_chunks: usize,
}

impl QaOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
        search_engine: Arc<SearchEngine>,
        cache: Arc<SearchCache>,
        citation_threshold: f32,
        max_chunks: usize,
    ) -> Self {
        Self { store, embedding, llm, search_engine, cache, citation_threshold, max_chunks }
    }

    #[tracing::instrument(skip(self, request), fields(question_len = request.question.len()))]
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse, RagError> {
        let started = Instant::now();

        let mut passages = self.resolve_context(&request).await?;
        passages.truncate(self.max_chunks.max(1));

        if passages.is_empty() {
            return Ok(AskResponse {
                answer: "I don't know based on the provided documents.".to_string(),
                sources: Vec::new(),
                raw_citations: Vec::new(),
                processing_time: started.elapsed().as_secs_f64(),
            });
        }

        let (system_prompt, user_message) = build_prompt(&request, &passages);
        let answer = self.llm.complete(&system_prompt, &user_message).await?;

        let (raw_citations, sources) = build_citations(&passages, &answer, self.citation_threshold);

        tracing::info!(citation_count = raw_citations.len(), "ask completed");
        Ok(AskResponse { answer, sources, raw_citations, processing_time: started.elapsed().as_secs_f64() })
    }

    /// Context resolution precedence per §4.8: `chunk_ids`, then `search_id`
    /// (miss falls straight through to a fresh, unfiltered search), then a
    /// document filter via a fresh search, then a fresh unfiltered search.
    async fn resolve_context(&self, request: &AskRequest) -> Result<Vec<SearchHit>, RagError> {
        if let Some(ids) = &request.chunk_ids {
            if !ids.is_empty() {
                return self.fetch_exact_chunks(ids).await;
            }
        }

        if let Some(search_id) = request.search_id {
            if let Some(result_set) = self.cache.get(search_id) {
                return Ok(result_set.results);
            }
            // Cache miss falls through to an unfiltered fresh search, not the
            // document-filter branch, per §4.8 resolution precedence.
            return self.fresh_search(request, None, None).await;
        }

        if request.documents.is_some() || request.exclude_documents.is_some() {
            return self.fresh_search(request, request.documents.clone(), request.exclude_documents.clone()).await;
        }

        self.fresh_search(request, None, None).await
    }

    async fn fresh_search(
        &self,
        request: &AskRequest,
        documents: Option<Vec<String>>,
        exclude_documents: Option<Vec<String>>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let collections = request.search_strategy.as_ref().map(|s| s.collections());
        let result_set = self
            .search_engine
            .search(SearchRequest {
                query: request.question.clone(),
                top_k: request.top_k,
                collections,
                documents,
                exclude_documents,
                threshold: None,
                return_chunks: true,
            })
            .await?;
        Ok(result_set.results)
    }

    /// Fetches chunks by explicit id, grouping by the collection segment
    /// embedded in each `chunk_id` (`<document>::<collection>::<index>`).
    async fn fetch_exact_chunks(&self, chunk_ids: &[String]) -> Result<Vec<SearchHit>, RagError> {
        let mut by_collection: std::collections::HashMap<Collection, Vec<String>> = std::collections::HashMap::new();
        for id in chunk_ids {
            let collection = parse_collection_from_chunk_id(id)
                .ok_or_else(|| RagError::InvalidQuery(format!("malformed chunk_id: {id}")))?;
            by_collection.entry(collection).or_default().push(id.clone());
        }

        let mut hits = Vec::new();
        for (collection, ids) in by_collection {
            for hit in self.store.fetch_by_ids(collection, &ids).await? {
                hits.push(SearchHit {
                    content: hit.content,
                    score: 1.0,
                    document: hit.document,
                    chunk_id: hit.id,
                    collection,
                    metadata: hit.metadata,
                });
            }
        }

        // Preserve the caller's requested order.
        let order: std::collections::HashMap<&str, usize> =
            chunk_ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        hits.sort_by_key(|h| order.get(h.chunk_id.as_str()).copied().unwrap_or(usize::MAX));
        Ok(hits)
    }
}

fn parse_collection_from_chunk_id(chunk_id: &str) -> Option<Collection> {
    let mut parts = chunk_id.rsplitn(3, "::");
    let _index = parts.next()?;
    let collection = parts.next()?;
    Collection::parse(collection)
}

fn build_prompt(request: &AskRequest, passages: &[SearchHit]) -> (String, String) {
    let mut system_prompt = BASE_INSTRUCTION.to_string();
    if let Some(extra) = &request.system_prompt {
        system_prompt.push_str("\n\n");
        system_prompt.push_str(extra);
    }

    let mut user_message = String::new();
    user_message.push_str("Context:\n");
    for (i, passage) in passages.iter().enumerate() {
        user_message.push_str(&format!("[c{}] ({} / {}): {}\n", i + 1, passage.document, passage.chunk_id, passage.content));
    }

    if let Some(history) = &request.conversation_history {
        let trimmed = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        if !trimmed.is_empty() {
            user_message.push_str("\nConversation so far:\n");
            for turn in trimmed {
                user_message.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
            }
        }
    }

    user_message.push_str(&format!("\nQuestion: {}\n", request.question));
    (system_prompt, user_message)
}

/// Citation law (§4.8/§8): keep passages with similarity ≥ threshold whose
/// `[cN]` tag the answer actually cites; if none were cited, keep the top
/// two passages by score instead — but only among those clearing threshold.
/// If every hit falls below threshold, return exactly the top-1 hit rather
/// than two sub-threshold citations, per §8's invariant.
fn build_citations(passages: &[SearchHit], answer: &str, threshold: f32) -> (Vec<Citation>, Vec<String>) {
    let cited: Vec<Citation> = passages
        .iter()
        .enumerate()
        .filter(|(i, hit)| hit.score >= threshold && answer.contains(&format!("[c{}]", i + 1)))
        .map(|(_, hit)| to_citation(hit))
        .collect();

    let citations = if !cited.is_empty() {
        cited
    } else {
        let above_threshold: Vec<&SearchHit> = passages.iter().filter(|h| h.score >= threshold).collect();
        if above_threshold.is_empty() {
            passages.iter().take(1).map(to_citation).collect()
        } else {
            above_threshold.into_iter().take(2).map(to_citation).collect()
        }
    };

    let mut seen = HashSet::new();
    let sources = citations.iter().filter(|c| seen.insert(c.document.clone())).map(|c| c.document.clone()).collect();

    (citations, sources)
}

fn to_citation(hit: &SearchHit) -> Citation {
    Citation {
        text: hit.content.clone(),
        document: hit.document.clone(),
        collection: hit.collection,
        chunk_id: hit.chunk_id.clone(),
        relevancy_score: hit.score,
        relevancy_percentage: hit.score * 100.0,
    }
}
