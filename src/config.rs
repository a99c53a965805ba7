//! Configuration loading and validation.
//!
//! ragforge is configured entirely from the environment (see §6 of the
//! specification this crate implements). All keys have defaults except the
//! upstream credentials, so a demo run needs nothing but `DEMO_MODE=1`.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    /// When set, embedding/LLM clients return deterministic stubs instead of
    /// calling an upstream provider. Used for tests and smoke runs.
    pub demo_mode: bool,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks: usize,
    pub summary_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub citation_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub vector_store_url: Option<String>,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) => v.parse::<usize>().map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(v) => v.parse::<u32>().map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_f32(key: &str, default: f32) -> Result<f32> {
    match std::env::var(key) {
        Ok(v) => v.parse::<f32>().map_err(|_| anyhow::anyhow!("{key} must be a number, got '{v}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// defaults named in §6, then validates cross-field invariants.
    pub fn from_env() -> Result<Config> {
        let chunking = ChunkingConfig {
            chunk_size: env_usize("CHUNK_SIZE", 1000)?,
            chunk_overlap: env_usize("CHUNK_OVERLAP", 100)?,
            max_chunks: env_usize("MAX_CHUNKS", 8)?,
            summary_concurrency: env_usize("SUMMARY_CONCURRENCY", 4)?,
        };

        let retrieval = RetrievalConfig {
            citation_threshold: env_f32("CITATION_THRESHOLD", 0.40)?,
        };

        let embedding = EmbeddingConfig {
            model: env_string("EMBEDDING_MODEL", "text-embedding-ada-002"),
            api_key: env_opt_string("EMBEDDING_API_KEY"),
            batch_size: env_usize("EMBEDDING_BATCH_SIZE", 96)?,
            max_retries: env_u32("EMBEDDING_MAX_RETRIES", 3)?,
            timeout: Duration::from_secs(env_u32("EMBEDDING_TIMEOUT_SECS", 30)? as u64),
        };

        let llm = LlmConfig {
            model: env_string("CHAT_MODEL", "gpt-3.5-turbo"),
            api_key: env_opt_string("LLM_API_KEY"),
            max_retries: env_u32("LLM_MAX_RETRIES", 3)?,
            timeout: Duration::from_secs(env_u32("LLM_TIMEOUT_SECS", 60)? as u64),
        };

        let cache = CacheConfig {
            capacity: env_usize("SEARCH_CACHE_CAPACITY", 1000)?,
            ttl: Duration::from_secs(env_u32("SEARCH_CACHE_TTL_SEC", 3600)? as u64),
        };

        let server = ServerConfig {
            bind: env_string("BIND_ADDR", "0.0.0.0:8000"),
            vector_store_url: env_opt_string("VECTOR_STORE_URL"),
        };

        let db = DbConfig {
            path: PathBuf::from(env_string("DB_PATH", "./ragforge.sqlite3")),
        };

        let demo_mode = std::env::var("DEMO_MODE").map(|v| v != "0" && !v.is_empty()).unwrap_or(false);

        let config = Config { db, chunking, retrieval, embedding, llm, cache, server, demo_mode };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("CHUNK_SIZE must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("CHUNK_OVERLAP must be less than CHUNK_SIZE");
        }
        if !(0.0..=1.0).contains(&self.retrieval.citation_threshold) {
            bail!("CITATION_THRESHOLD must be in [0.0, 1.0]");
        }
        if self.chunking.summary_concurrency == 0 {
            bail!("SUMMARY_CONCURRENCY must be > 0");
        }
        if self.cache.capacity == 0 {
            bail!("SEARCH_CACHE_CAPACITY must be > 0");
        }
        if !self.demo_mode && self.embedding.api_key.is_none() {
            bail!("EMBEDDING_API_KEY must be set unless DEMO_MODE is enabled");
        }
        if !self.demo_mode && self.llm.api_key.is_none() {
            bail!("LLM_API_KEY must be set unless DEMO_MODE is enabled");
        }
        Ok(())
    }
}
