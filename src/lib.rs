//! # Document QA
//!
//! Session-scoped question answering over uploaded documents.
//!
//! Uploads are extracted page by page, chunked, embedded and stored in a
//! local SQLite index. Questions are answered by fusing semantic,
//! keyword-biased and diversity-aware retrieval over the documents a
//! session has selected, then asking a language model to answer strictly
//! from that context with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │  Upload  │──▶│ Extract+Chunk │──▶│ ChunkIndex │
//! │ PDF/DOCX │   │    +Embed     │   │  (SQLite)  │
//! └──────────┘   └──────────────┘   └─────┬──────┘
//!                                         │
//!                  ┌──────────────────────┤
//!                  ▼                      ▼
//!            ┌──────────┐          ┌─────────────┐
//!            │  Fusion  │─────────▶│ Synthesizer │
//!            └──────────┘          │  (LLM call) │
//!                                  └─────────────┘
//! ```
//!
//! Storage-agnostic logic lives in `docqa-core`; this crate adds the
//! concrete providers, persistence, and the CLI and HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF, DOCX, PPTX and plain-text extraction |
//! | [`sqlite_store`] | SQLite chunk store |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Language model providers |
//! | [`registry`] | Document registry |
//! | [`sessions`] | Session manager |
//! | [`usage`] | Token and cost accounting |
//! | [`service`] | The orchestrator |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod remote;
pub mod server;
pub mod service;
pub mod sessions;
pub mod snapshot;
pub mod sqlite_store;
pub mod stats;
pub mod usage;
