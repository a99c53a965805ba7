//! HTTP surface (§6): a stable, versionless `/api` exposing the ingestion
//! pipeline, search engine, and QA orchestrator. Bodies are JSON except for
//! the multipart upload endpoint; every error response is `{"detail": "..."}`
//! with the status `RagError::status_code` assigns.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::document_store::DocumentTextStore;
use crate::embedding::EmbeddingClient;
use crate::error::RagError;
use crate::ingest::{IngestionPipeline, UploadOutcome, UploadRequest};
use crate::llm::LlmClient;
use crate::models::{Collection, SearchResultSet};
use crate::qa::{AskRequest, AskResponse, QaOrchestrator};
use crate::registry::DocumentRegistry;
use crate::search_cache::SearchCache;
use crate::search_engine::{CollectionSizes, SearchEngine, SearchRequest};
use crate::store::VectorStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<DocumentRegistry>,
    pub ingestion: Arc<IngestionPipeline>,
    pub search_engine: Arc<SearchEngine>,
    pub qa: Arc<QaOrchestrator>,
    pub store: Arc<dyn VectorStore>,
    pub embedding: Arc<dyn EmbeddingClient>,
    pub llm: Arc<dyn LlmClient>,
}

impl AppState {
    /// Wires every component from a loaded [`Config`]: connects the pool,
    /// runs migrations, rebuilds the document registry from the vector
    /// store, and constructs the embedding/LLM clients (real or `DEMO_MODE`
    /// stubs per §6).
    pub async fn from_config(config: Config) -> anyhow::Result<AppState> {
        let pool = crate::db::connect(&config).await?;
        crate::migrate::run_migrations_on(&pool).await?;

        let store: Arc<dyn VectorStore> = Arc::new(crate::store::sqlite::SqliteVectorStore::new(pool.clone()));
        let documents = Arc::new(DocumentTextStore::new(pool));
        let embedding = crate::embedding::create_client(&config);
        let llm = crate::llm::create_client(&config);

        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        registry.rebuild().await?;

        let cache = Arc::new(SearchCache::new(config.cache.capacity, config.cache.ttl));
        let search_engine = Arc::new(SearchEngine::new(store.clone(), embedding.clone(), cache.clone(), registry.clone()));
        let qa = Arc::new(QaOrchestrator::new(
            store.clone(),
            embedding.clone(),
            llm.clone(),
            search_engine.clone(),
            cache,
            config.retrieval.citation_threshold,
            config.chunking.max_chunks,
        ));
        let ingestion = Arc::new(IngestionPipeline::new(
            store.clone(),
            embedding.clone(),
            llm.clone(),
            registry.clone(),
            documents,
            config.chunking.clone(),
        ));

        Ok(AppState { config: Arc::new(config), registry, ingestion, search_engine, qa, store, embedding, llm })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/status", get(handle_status))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents", delete(handle_clear_documents))
        .route("/api/process/upload", post(handle_upload))
        .route("/api/process/{filename}/summaries", post(handle_logical_summaries))
        .route("/api/process/{filename}/paragraphs", post(handle_paragraph_summaries))
        .route("/api/search", post(handle_search))
        .route("/api/ask", post(handle_ask))
        .route("/api/collections", get(handle_collections))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::from_config(config).await?;
    let app = router(state);

    tracing::info!(%bind_addr, "ragforge listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Tags every request with a `x-request-id` header and threads it through
/// the request's `tracing` span, so one log line traces end to end.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!("http_request", %request_id, %method, %path);

    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(HeaderName::from_static("x-request-id"), value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Waits for SIGINT or (on unix) SIGTERM so `axum::serve` can drain
/// in-flight requests before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

// ============ GET /healthz ============

async fn handle_healthz() -> &'static str {
    "ok"
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    vector_store_ok: bool,
    embedding_model: String,
    chat_model: String,
    demo_mode: bool,
    counts: HashMap<String, u64>,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, RagError> {
    let vector_store_ok = state.store.heartbeat().await;
    let mut counts = HashMap::new();
    for collection in Collection::ALL {
        counts.insert(collection.as_str().to_string(), state.store.count(collection, &vec![]).await?);
    }

    Ok(Json(StatusResponse {
        vector_store_ok,
        embedding_model: state.config.embedding.model.clone(),
        chat_model: state.config.llm.model.clone(),
        demo_mode: state.config.demo_mode,
        counts,
    }))
}

// ============ GET /api/documents ============

async fn handle_list_documents(State(state): State<AppState>) -> Json<HashMap<String, HashMap<String, u64>>> {
    let inventory = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|info| (info.filename, info.chunk_counts))
        .collect();
    Json(inventory)
}

// ============ DELETE /api/documents ============

#[derive(Serialize)]
struct ClearDeleted {
    collection: Collection,
    n_deleted: u64,
}

async fn handle_clear_documents(State(state): State<AppState>) -> Result<Json<Vec<ClearDeleted>>, RagError> {
    let deleted = state.registry.clear_all().await?;
    state.ingestion.clear_document_texts().await?;
    Ok(Json(deleted.into_iter().map(|(collection, n_deleted)| ClearDeleted { collection, n_deleted }).collect()))
}

// ============ POST /api/process/upload ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    #[serde(flatten)]
    outcome: UploadOutcome,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, RagError> {
    let mut filename: Option<String> = None;
    let mut text: Option<String> = None;
    let mut force = false;

    while let Some(field) = multipart.next_field().await.map_err(|e| RagError::InvalidQuery(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                let bytes = field.bytes().await.map_err(|e| RagError::InvalidQuery(e.to_string()))?;
                text = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            "force" => {
                let value = field.text().await.map_err(|e| RagError::InvalidQuery(e.to_string()))?;
                force = value == "true" || value == "1";
            }
            _ => {}
        }
    }

    let filename = filename.ok_or_else(|| RagError::InvalidQuery("multipart request missing 'file' field".to_string()))?;
    let text = text.ok_or_else(|| RagError::InvalidQuery("multipart request missing file contents".to_string()))?;

    let outcome = state.ingestion.upload_and_basic_ingest(UploadRequest { filename: filename.clone(), text, force }).await?;
    Ok(Json(UploadResponse { filename, outcome }))
}

// ============ POST /api/process/{filename}/summaries ============

async fn handle_logical_summaries(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<crate::ingest::SummaryOutcome>, RagError> {
    Ok(Json(state.ingestion.ingest_logical_summaries(&filename).await?))
}

// ============ POST /api/process/{filename}/paragraphs ============

async fn handle_paragraph_summaries(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<crate::ingest::SummaryOutcome>, RagError> {
    Ok(Json(state.ingestion.ingest_paragraph_summaries(&filename).await?))
}

// ============ POST /api/search ============

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResultSet>, RagError> {
    Ok(Json(state.search_engine.search(request).await?))
}

// ============ POST /api/ask ============

async fn handle_ask(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Result<Json<AskResponse>, RagError> {
    Ok(Json(state.qa.ask(request).await?))
}

// ============ GET /api/collections ============

async fn handle_collections(State(state): State<AppState>) -> Result<Json<Vec<CollectionSizes>>, RagError> {
    let mut sizes = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        let count = state.store.count(collection, &vec![]).await?;
        let documents = state.store.list_distinct(collection, "document").await?;
        sizes.push(CollectionSizes { collection, count, documents });
    }
    Ok(Json(sizes))
}
