//! Ingestion pipeline (C5): for one document, writes three collections —
//! `documents` (raw overlapping chunks), `logical_summaries` (10:1 windows
//! of raw chunks), `paragraph_summaries` (3:1 natural paragraphs).
//!
//! Per-filename ingestion is serialized: a concurrent attempt for a filename
//! already in flight fails immediately with `AlreadyIngesting` rather than
//! queuing, mirroring the teacher's checkpoint-guarded `run_sync` but
//! generalized from one long-lived connector lock to a per-filename one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::document_store::{self, DocumentTextStore};
use crate::embedding::EmbeddingClient;
use crate::error::RagError;
use crate::llm::LlmClient;
use crate::models::{make_chunk_id, Collection};
use crate::registry::DocumentRegistry;
use crate::store::{Predicate, UpsertItem, VectorStore};

/// Target compression ratios per §3: logical summaries target 10:1
/// (output ≤ 0.12x input), paragraph summaries target 3:1 (output ≤ 0.40x
/// input). Both are passed straight through as `target_length_ratio` to
/// [`LlmClient::summarize`], which truncates at 1.2x of this bound.
const LOGICAL_COMPRESSION_RATIO: f64 = 0.12;
const PARAGRAPH_COMPRESSION_RATIO: f64 = 0.40;
const LOGICAL_WINDOW_SIZE: usize = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadRequest {
    pub filename: String,
    pub text: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Ingested { chunk_count: u64 },
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Ingested { chunk_count: u64 },
}

/// RAII guard for the per-filename ingestion lock: removes the filename from
/// the in-flight set on drop, so a panicking or early-returning task never
/// leaves a filename permanently blocked.
struct IngestGuard {
    inflight: Arc<Mutex<HashSet<String>>>,
    filename: String,
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        self.inflight.lock().expect("ingestion lock poisoned").remove(&self.filename);
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
    registry: Arc<DocumentRegistry>,
    documents: Arc<DocumentTextStore>,
    chunking: ChunkingConfig,
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
        registry: Arc<DocumentRegistry>,
        documents: Arc<DocumentTextStore>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self { store, embedding, llm, registry, documents, chunking, inflight: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Purges the original-text side table alongside the vector-store
    /// collections a caller clears via [`DocumentRegistry::clear_all`], so
    /// no raw text for a deleted document lingers for a later paragraph
    /// ingest to (harmlessly but incorrectly) pick back up.
    pub async fn clear_document_texts(&self) -> Result<(), RagError> {
        self.documents.clear_all().await
    }

    fn try_lock_filename(&self, filename: &str) -> Result<IngestGuard, RagError> {
        let mut inflight = self.inflight.lock().expect("ingestion lock poisoned");
        if !inflight.insert(filename.to_string()) {
            return Err(RagError::AlreadyIngesting(filename.to_string()));
        }
        Ok(IngestGuard { inflight: self.inflight.clone(), filename: filename.to_string() })
    }

    /// §4.5 Upload-and-basic-ingest.
    #[tracing::instrument(skip(self, request), fields(filename = %request.filename))]
    pub async fn upload_and_basic_ingest(&self, request: UploadRequest) -> Result<UploadOutcome, RagError> {
        let _guard = self.try_lock_filename(&request.filename)?;
        let UploadRequest { filename, text, force } = request;

        let content_hash = document_store::hash_text(&text);
        if !force && self.registry.has(&filename).await {
            return Ok(UploadOutcome::AlreadyExists);
        }

        if force {
            // A force resubmission of byte-identical content is still a
            // no-op: the content hash persisted from the prior ingest
            // short-circuits the delete-and-reindex below.
            if let Some(existing_hash) = self.documents.content_hash(&filename).await? {
                if existing_hash == content_hash {
                    return Ok(UploadOutcome::AlreadyExists);
                }
            }
            self.store.delete(Collection::Documents, &vec![Predicate::DocumentIn(vec![filename.clone()])]).await?;
        }

        let raw_chunks = chunk::split_into_chunks(&text, self.chunking.chunk_size, self.chunking.chunk_overlap);
        let n = raw_chunks.len();

        if n > 0 {
            let vectors = self.embedding.embed(&raw_chunks).await?;
            if vectors.len() != n {
                return Err(RagError::internal("embed", "embedding client returned a mismatched vector count"));
            }

            let items: Vec<UpsertItem> = raw_chunks
                .iter()
                .enumerate()
                .zip(vectors)
                .map(|((i, content), vector)| UpsertItem {
                    id: make_chunk_id(&filename, Collection::Documents, i),
                    vector,
                    content: content.clone(),
                    document: filename.clone(),
                    metadata: serde_json::json!({"document": filename, "chunk_index": i, "total_chunks": n}),
                })
                .collect();

            if let Err(err) = self.store.upsert(Collection::Documents, items).await {
                // Compensating delete: never partially leave a document indexed.
                let _ = self.store.delete(Collection::Documents, &vec![Predicate::DocumentIn(vec![filename.clone()])]).await;
                return Err(err);
            }
        }

        self.documents.save(&filename, &text).await?;
        self.registry.record(&filename, Collection::Documents, n as u64).await;

        tracing::info!(chunk_count = n, "basic ingest completed");
        Ok(UploadOutcome::Ingested { chunk_count: n as u64 })
    }

    /// §4.5 Summaries ingest (logical): 10:1 windows of raw chunks.
    #[tracing::instrument(skip(self), fields(filename))]
    pub async fn ingest_logical_summaries(&self, filename: &str) -> Result<SummaryOutcome, RagError> {
        let _guard = self.try_lock_filename(filename)?;
        let raw = self.store.fetch_by_document(Collection::Documents, filename).await?;
        if raw.is_empty() {
            return Err(RagError::NotFound(format!("no chunks indexed for document '{filename}'")));
        }

        let windows: Vec<(usize, usize, Vec<&crate::store::StoreHit>)> = raw
            .chunks(LOGICAL_WINDOW_SIZE)
            .enumerate()
            .map(|(i, w)| (i * LOGICAL_WINDOW_SIZE, i * LOGICAL_WINDOW_SIZE + w.len() - 1, w.iter().collect()))
            .collect();

        let instruction = "Summarize the following passage, asserting roughly 10:1 compression.";
        let summaries = self
            .summarize_windows(filename, windows, instruction, LOGICAL_COMPRESSION_RATIO, Collection::LogicalSummaries)
            .await?;

        self.store.upsert(Collection::LogicalSummaries, summaries.items).await?;
        self.registry.record(filename, Collection::LogicalSummaries, summaries.count as u64).await;
        tracing::info!(chunk_count = summaries.count, "logical summaries ingest completed");
        Ok(SummaryOutcome::Ingested { chunk_count: summaries.count as u64 })
    }

    /// §4.5 Paragraph ingest: natural paragraphs targeting 3:1 compression.
    #[tracing::instrument(skip(self), fields(filename))]
    pub async fn ingest_paragraph_summaries(&self, filename: &str) -> Result<SummaryOutcome, RagError> {
        let _guard = self.try_lock_filename(filename)?;
        if !self.registry.has(filename).await {
            return Err(RagError::NotFound(format!("document '{filename}' is not known")));
        }
        let text = self
            .documents
            .get_text(filename)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document '{filename}' has no stored text")))?;

        let paragraphs = chunk::split_into_paragraphs(&text);
        if paragraphs.is_empty() {
            return Ok(SummaryOutcome::Ingested { chunk_count: 0 });
        }

        let instruction = "Summarize the following paragraph, asserting roughly 3:1 compression.";
        let concurrency = self.chunking.summary_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        for (index, paragraph) in paragraphs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let llm = self.llm.clone();
            let embedding = self.embedding.clone();
            let filename = filename.to_string();
            let instruction = instruction.to_string();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let summary = llm.summarize(&instruction, &paragraph, PARAGRAPH_COMPRESSION_RATIO).await?;
                let vector = embedding.embed(&[summary.clone()]).await?.into_iter().next().ok_or_else(|| {
                    RagError::internal("embed", "embedding client returned no vectors for paragraph summary")
                })?;
                Ok::<_, RagError>(UpsertItem {
                    id: make_chunk_id(&filename, Collection::ParagraphSummaries, index),
                    vector,
                    content: summary.clone(),
                    document: filename.clone(),
                    metadata: serde_json::json!({
                        "document": filename,
                        "paragraph_index": index,
                        "source_length": paragraph.chars().count(),
                        "summary_length": summary.chars().count(),
                    }),
                })
            });
        }

        let mut items = Vec::new();
        while let Some(res) = join_set.join_next().await {
            let item = res.map_err(|e| RagError::internal("ingest", e.to_string()))??;
            items.push(item);
        }

        let count = items.len();
        self.store.upsert(Collection::ParagraphSummaries, items).await?;
        self.registry.record(filename, Collection::ParagraphSummaries, count as u64).await;
        tracing::info!(chunk_count = count, "paragraph summaries ingest completed");
        Ok(SummaryOutcome::Ingested { chunk_count: count as u64 })
    }

    async fn summarize_windows(
        &self,
        filename: &str,
        windows: Vec<(usize, usize, Vec<&crate::store::StoreHit>)>,
        instruction: &str,
        ratio: f64,
        collection: Collection,
    ) -> Result<UpsertBatch, RagError> {
        let concurrency = self.chunking.summary_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        for (index, (start, end, chunks)) in windows.into_iter().enumerate() {
            let body: String = chunks.iter().map(|c| c.content.clone()).collect::<Vec<_>>().join("\n\n");
            let source_chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
            let semaphore = semaphore.clone();
            let llm = self.llm.clone();
            let embedding = self.embedding.clone();
            let filename = filename.to_string();
            let instruction = instruction.to_string();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let summary = llm.summarize(&instruction, &body, ratio).await?;
                let vector = embedding
                    .embed(&[summary.clone()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| RagError::internal("embed", "embedding client returned no vectors for summary"))?;
                Ok::<_, RagError>(UpsertItem {
                    id: make_chunk_id(&filename, collection, index),
                    vector,
                    content: summary.clone(),
                    document: filename.clone(),
                    metadata: serde_json::json!({
                        "document": filename,
                        "window_start": start,
                        "window_end": end,
                        "source_chunk_ids": source_chunk_ids,
                        "compression_ratio": ratio,
                    }),
                })
            });
        }

        let mut items = Vec::new();
        while let Some(res) = join_set.join_next().await {
            let item = res.map_err(|e| RagError::internal("ingest", e.to_string()))??;
            items.push(item);
        }
        let count = items.len();
        Ok(UpsertBatch { items, count })
    }
}

struct UpsertBatch {
    items: Vec<UpsertItem>,
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DemoEmbeddingClient;
    use crate::llm::DemoLlmClient;
    use crate::store::sqlite::SqliteVectorStore;
    use sqlx::SqlitePool;

    async fn test_pipeline() -> IngestionPipeline {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(DemoEmbeddingClient::new(16));
        let llm: Arc<dyn LlmClient> = Arc::new(DemoLlmClient);
        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        let documents = Arc::new(DocumentTextStore::new(pool));
        let chunking = ChunkingConfig { chunk_size: 1000, chunk_overlap: 100, max_chunks: 8, summary_concurrency: 4 };
        IngestionPipeline::new(store, embedding, llm, registry, documents, chunking)
    }

    #[tokio::test]
    async fn basic_ingest_writes_chunks_and_records_registry() {
        let pipeline = test_pipeline().await;
        let outcome = pipeline
            .upload_and_basic_ingest(UploadRequest {
                filename: "mvp.txt".to_string(),
                text: "Supervised learning uses labeled training data.".to_string(),
                force: false,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Ingested { chunk_count: 1 }));
        assert!(pipeline.registry.has("mvp.txt").await);
    }

    #[tokio::test]
    async fn duplicate_upload_without_force_is_already_exists() {
        let pipeline = test_pipeline().await;
        let req = UploadRequest { filename: "a.txt".to_string(), text: "hello world".to_string(), force: false };
        pipeline.upload_and_basic_ingest(req.clone()).await.unwrap();
        let second = pipeline.upload_and_basic_ingest(req).await.unwrap();
        assert!(matches!(second, UploadOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn force_reingest_overwrites_chunk_count() {
        let pipeline = test_pipeline().await;
        pipeline
            .upload_and_basic_ingest(UploadRequest { filename: "a.txt".to_string(), text: "one two three".to_string(), force: false })
            .await
            .unwrap();

        let long_text = "sentence number one. ".repeat(200);
        let outcome = pipeline
            .upload_and_basic_ingest(UploadRequest { filename: "a.txt".to_string(), text: long_text, force: true })
            .await
            .unwrap();
        match outcome {
            UploadOutcome::Ingested { chunk_count } => assert!(chunk_count > 1),
            other => panic!("expected Ingested, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn force_reingest_of_identical_content_is_a_no_op() {
        let pipeline = test_pipeline().await;
        let req = UploadRequest { filename: "a.txt".to_string(), text: "hello world".to_string(), force: false };
        pipeline.upload_and_basic_ingest(req).await.unwrap();

        let outcome = pipeline
            .upload_and_basic_ingest(UploadRequest { filename: "a.txt".to_string(), text: "hello world".to_string(), force: true })
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn logical_summaries_require_existing_raw_chunks() {
        let pipeline = test_pipeline().await;
        let err = pipeline.ingest_logical_summaries("missing.txt").await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn logical_summaries_ingest_groups_into_windows_of_ten() {
        let pipeline = test_pipeline().await;
        let text = "Sentence number filler here for the corpus today. ".repeat(400);
        pipeline.upload_and_basic_ingest(UploadRequest { filename: "big.txt".to_string(), text, force: false }).await.unwrap();

        let raw_count = pipeline.registry.get("big.txt").await.unwrap().chunk_counts[Collection::Documents.as_str()];
        let outcome = pipeline.ingest_logical_summaries("big.txt").await.unwrap();
        let expected_windows = (raw_count as usize).div_ceil(LOGICAL_WINDOW_SIZE);
        match outcome {
            SummaryOutcome::Ingested { chunk_count } => assert_eq!(chunk_count as usize, expected_windows),
        }
    }

    #[tokio::test]
    async fn paragraph_summaries_ingest_uses_source_text() {
        let pipeline = test_pipeline().await;
        let text = "First paragraph has plenty of words to avoid merging forward into the next paragraph during this test run today.\n\nSecond paragraph also has plenty of words to avoid merging during this particular test run right now.";
        pipeline.upload_and_basic_ingest(UploadRequest { filename: "p.txt".to_string(), text: text.to_string(), force: false }).await.unwrap();

        let outcome = pipeline.ingest_paragraph_summaries("p.txt").await.unwrap();
        match outcome {
            SummaryOutcome::Ingested { chunk_count } => assert_eq!(chunk_count, 2),
        }
    }

    #[tokio::test]
    async fn concurrent_ingest_of_same_filename_fails_with_already_ingesting() {
        let pipeline = Arc::new(test_pipeline().await);
        let _guard = pipeline.try_lock_filename("busy.txt").unwrap();
        let err = pipeline
            .upload_and_basic_ingest(UploadRequest { filename: "busy.txt".to_string(), text: "x".to_string(), force: false })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::AlreadyIngesting(_)));
    }
}
