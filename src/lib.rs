//! # ragforge
//!
//! A multi-representation retrieval-augmented generation service: ingest
//! documents into three parallel vector collections — raw overlapping
//! chunks, 10:1 logical summaries, and 3:1 paragraph summaries — then serve
//! search and sourced question-answering over whichever representations a
//! document has.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ chunk (C4) ──▶ embed (C1) ──▶ vector store (C3, SQLite)
//!              │                                  │
//!              ├──▶ logical summaries (C2 + C1) ───┤
//!              └──▶ paragraph summaries (C2 + C1) ─┤
//!                                                   │
//!                      search engine (C6) ◀─────────┤──▶ document registry (C9)
//!                              │                    │
//!                       search cache (C7)      QA orchestrator (C8)
//!                                                   │
//!                                           HTTP server (Axum)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven configuration and validation |
//! | [`models`] | Core data types: `Collection`, `Document`, `Chunk`, `SearchHit`, `Citation` |
//! | [`chunk`] | Sentence-boundary chunker and paragraph splitter (C4) |
//! | [`embedding`] | Embedding client trait, OpenAI implementation, `DEMO_MODE` stub (C1) |
//! | [`llm`] | LLM client trait for completion/summarization (C2) |
//! | [`store`] | Vector store trait and SQLite-backed implementation (C3) |
//! | [`document_store`] | Raw document text persistence, used by paragraph ingestion |
//! | [`registry`] | In-memory per-document chunk-count registry (C9) |
//! | [`ingest`] | Ingestion pipeline: upload, logical summaries, paragraph summaries (C5) |
//! | [`search_cache`] | `search_id`-addressable cache of recent result sets (C7) |
//! | [`search_engine`] | Strategy-selected cross-collection search (C6) |
//! | [`qa`] | Question-answering orchestrator: context resolution, citations (C8) |
//! | [`server`] | HTTP surface (Axum) with CORS |
//! | [`db`] | SQLite connection pool management |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`error`] | Classified error taxonomy shared across every operation |
//!
//! ## Quick start
//!
//! ```bash
//! DEMO_MODE=1 ragforge serve
//! ```

pub mod chunk;
pub mod config;
pub mod db;
pub mod document_store;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod qa;
pub mod registry;
pub mod search_cache;
pub mod search_engine;
pub mod server;
pub mod store;
