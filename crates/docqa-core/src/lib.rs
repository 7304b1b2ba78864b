//! # docqa core
//!
//! Storage-agnostic logic for the document QA engine: data models,
//! page-aware chunking, keyword utilities, the chunk store and model
//! traits, the retrieval fusion pipeline, and answer synthesis.
//!
//! This crate performs no filesystem or network I/O of its own. Concrete
//! embedders, language models and persistent stores live in the `docqa`
//! application crate and are injected through the traits defined here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod llm;
pub mod models;
pub mod store;
pub mod synth;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RagError, Result};
