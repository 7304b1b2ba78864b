//! In-memory [`ChunkStore`] for tests and ephemeral runs.
//!
//! Chunks live in a `HashMap` keyed by chunk id behind a
//! `std::sync::RwLock`. Vector search is a brute-force cosine scan;
//! lexical search scans every chunk for the given patterns.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::Chunk;
use crate::text::lexical_score;

use super::{passes, ChunkStore, DocumentFilter, IndexedChunk, LexicalHit, VectorHit};

pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<String, IndexedChunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory chunk store lock poisoned")
}

fn reading_order(a: &Chunk, b: &Chunk) -> Ordering {
    a.document_id
        .cmp(&b.document_id)
        .then(a.chunk_index.cmp(&b.chunk_index))
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn insert_chunks(&self, items: Vec<IndexedChunk>) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        for item in items {
            stored.insert(item.chunk.id.clone(), item);
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<VectorHit>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut hits: Vec<VectorHit> = stored
            .values()
            .filter(|ic| passes(filter, &ic.chunk.document_id))
            .map(|ic| VectorHit {
                chunk: ic.chunk.clone(),
                score: cosine_similarity(query_vec, &ic.vector),
                vector: ic.vector.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| reading_order(&a.chunk, &b.chunk))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        patterns: &[String],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<LexicalHit>> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut hits: Vec<LexicalHit> = stored
            .values()
            .filter(|ic| passes(filter, &ic.chunk.document_id))
            .filter_map(|ic| {
                let score = lexical_score(&ic.chunk.text, patterns);
                (score > 0.0).then(|| LexicalHit {
                    chunk: ic.chunk.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| reading_order(&a.chunk, &b.chunk))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_by_documents(&self, filter: &DocumentFilter) -> Result<Vec<Chunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut chunks: Vec<Chunk> = stored
            .values()
            .filter(|ic| filter.contains(&ic.chunk.document_id))
            .map(|ic| ic.chunk.clone())
            .collect();
        chunks.sort_by(reading_order);
        Ok(chunks)
    }

    async fn fetch_by_filename(&self, filename: &str) -> Result<Vec<Chunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut chunks: Vec<Chunk> = stored
            .values()
            .filter(|ic| ic.chunk.filename == filename)
            .map(|ic| ic.chunk.clone())
            .collect();
        chunks.sort_by(reading_order);
        Ok(chunks)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, ic| ic.chunk.document_id != document_id);
        Ok(before - stored.len())
    }

    async fn count(&self, filter: Option<&DocumentFilter>) -> Result<usize> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored
            .values()
            .filter(|ic| passes(filter, &ic.chunk.document_id))
            .count())
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;

    fn item(doc: &str, index: usize, text: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: Chunk::chunk_id(doc, index),
                document_id: doc.to_string(),
                filename: format!("{}.txt", doc),
                content_type: "text/plain".into(),
                page: Some(1),
                chunk_index: index,
                text: text.to_string(),
                hash: content_hash(text),
            },
            vector,
        }
    }

    async fn seeded() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        store
            .insert_chunks(vec![
                item("a", 0, "refund policy details", vec![1.0, 0.0]),
                item("a", 1, "shipping times", vec![0.0, 1.0]),
                item("b", 0, "refund window is 30 days", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_vector_search_ranks_and_filters() {
        let store = seeded().await;
        let hits = store.vector_search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits[0].chunk.id, "a_chunk_0");
        assert_eq!(hits[1].chunk.id, "b_chunk_0");

        let only_b = DocumentFilter::new(["b"]);
        let hits = store.vector_search(&[1.0, 0.0], 10, Some(&only_b)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, "b");
    }

    #[tokio::test]
    async fn test_lexical_search_requires_a_match() {
        let store = seeded().await;
        let hits = store
            .lexical_search(&["refund".to_string()], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(store.lexical_search(&[], 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_in_reading_order() {
        let store = seeded().await;
        let all = store
            .fetch_by_documents(&DocumentFilter::new(["a", "b"]))
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a_chunk_0", "a_chunk_1", "b_chunk_0"]);
        assert_eq!(store.fetch_by_filename("a.txt").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = seeded().await;
        assert_eq!(store.delete_by_document("a").await.unwrap(), 2);
        assert_eq!(store.delete_by_document("a").await.unwrap(), 0);
        assert_eq!(store.count(None).await.unwrap(), 1);
        store.clear().await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_upserts_by_id() {
        let store = seeded().await;
        store
            .insert_chunks(vec![item("a", 0, "replaced", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count(None).await.unwrap(), 3);
    }
}
