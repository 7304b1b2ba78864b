//! Storage abstraction for indexed chunks.
//!
//! The [`ChunkStore`] trait is the backend half of the Chunk Store: it
//! persists chunk text, metadata and embedding vectors, and answers the
//! primitive queries the [`ChunkIndex`](crate::index::ChunkIndex) facade
//! composes into similarity, keyword-biased and MMR searches.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

/// Restricts a query to a set of document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    ids: BTreeSet<String>,
}

impl DocumentFilter {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.ids.contains(document_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// Whether `document_id` passes an optional filter.
pub fn passes(filter: Option<&DocumentFilter>, document_id: &str) -> bool {
    filter.map_or(true, |f| f.contains(document_id))
}

/// A chunk together with its embedding, as written to a store.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A vector-search hit. The stored vector is returned so MMR can compare
/// candidates without another round-trip.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub vector: Vec<f32>,
}

/// A lexical-search hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: Chunk,
    /// [`lexical_score`](crate::text::lexical_score) of the chunk text.
    pub score: f64,
}

/// Abstract chunk storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](ChunkStore::insert_chunks) | Write a batch of chunks and vectors (upsert by chunk id) |
/// | [`vector_search`](ChunkStore::vector_search) | Cosine nearest neighbours |
/// | [`lexical_search`](ChunkStore::lexical_search) | Substring pattern matching |
/// | [`fetch_by_documents`](ChunkStore::fetch_by_documents) | Every chunk of the given documents |
/// | [`fetch_by_filename`](ChunkStore::fetch_by_filename) | Every chunk carrying a filename |
/// | [`delete_by_document`](ChunkStore::delete_by_document) | Remove a document's chunks |
/// | [`count`](ChunkStore::count) | Number of chunks, optionally filtered |
/// | [`clear`](ChunkStore::clear) | Drop everything |
///
/// Fetches return chunks ordered by document id, then chunk index.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Short backend identifier for stats, e.g. `"sqlite"`.
    fn backend_name(&self) -> &str;

    /// Human-readable location of the data, if any.
    fn location(&self) -> Option<String> {
        None
    }

    async fn insert_chunks(&self, items: Vec<IndexedChunk>) -> Result<()>;

    /// Up to `limit` chunks ordered by descending cosine similarity.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<VectorHit>>;

    /// Up to `limit` chunks containing at least one pattern, ordered by
    /// descending lexical score. Patterns are lowercase.
    async fn lexical_search(
        &self,
        patterns: &[String],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<LexicalHit>>;

    async fn fetch_by_documents(&self, filter: &DocumentFilter) -> Result<Vec<Chunk>>;

    async fn fetch_by_filename(&self, filename: &str) -> Result<Vec<Chunk>>;

    /// Returns the number of chunks removed. Removing nothing is not an error.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    async fn count(&self, filter: Option<&DocumentFilter>) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_membership() {
        let f = DocumentFilter::new(["a", "b", "a"]);
        assert_eq!(f.len(), 2);
        assert!(f.contains("a"));
        assert!(!f.contains("c"));
        assert!(passes(None, "c"));
        assert!(!passes(Some(&f), "c"));
        assert!(DocumentFilter::default().is_empty());
    }
}
