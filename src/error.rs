//! Classified error taxonomy.
//!
//! Every public operation returns `Result<_, RagError>`. Retry loops inside
//! the embedding/LLM client wrappers use `anyhow` internally and classify
//! into one of these variants only at the wrapper boundary, so higher layers
//! always see a single, already-classified error with its failing stage
//! attached.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("already ingesting: {0}")]
    AlreadyIngesting(String),

    #[error("upstream unavailable ({stage}): {message}")]
    UpstreamUnavailable { stage: &'static str, message: String },

    #[error("llm timeout ({stage})")]
    LlmTimeout { stage: &'static str },

    #[error("canceled ({stage})")]
    Canceled { stage: &'static str },

    #[error("internal error ({stage}): {message}")]
    Internal { stage: &'static str, message: String },
}

impl RagError {
    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        RagError::Internal { stage, message: message.into() }
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        RagError::UpstreamUnavailable { stage, message: message.into() }
    }

    /// The stage this error occurred in, per spec's client-facing error contract.
    pub fn stage(&self) -> &'static str {
        match self {
            RagError::InvalidQuery(_) => "validate",
            RagError::NotFound(_) => "lookup",
            RagError::AlreadyExists(_) => "ingest",
            RagError::AlreadyIngesting(_) => "ingest",
            RagError::UpstreamUnavailable { stage, .. } => stage,
            RagError::LlmTimeout { stage } => stage,
            RagError::Canceled { stage } => stage,
            RagError::Internal { stage, .. } => stage,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RagError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::AlreadyExists(_) => StatusCode::CONFLICT,
            RagError::AlreadyIngesting(_) => StatusCode::CONFLICT,
            RagError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::LlmTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RagError::Canceled { .. } => StatusCode::from_u16(499).unwrap(),
            RagError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Process exit code per spec §6: 0 success, 2 invalid args, 3 upstream
    /// unavailable, 4 not found, 5 conflict, 1 generic.
    pub fn exit_code(&self) -> i32 {
        match self {
            RagError::InvalidQuery(_) => 2,
            RagError::UpstreamUnavailable { .. } | RagError::LlmTimeout { .. } => 3,
            RagError::NotFound(_) => 4,
            RagError::AlreadyExists(_) | RagError::AlreadyIngesting(_) => 5,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(e: sqlx::Error) -> Self {
        RagError::internal("store", e.to_string())
    }
}

#[derive(Serialize)]
struct DetailBody {
    detail: String,
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(stage = self.stage(), error = %self, "request failed");
        (status, Json(DetailBody { detail: self.to_string() })).into_response()
    }
}
