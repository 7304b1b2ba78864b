//! The Chunk Store facade: a [`ChunkStore`] backend plus an [`Embedder`].
//!
//! [`ChunkIndex`] turns text queries into vector and lexical lookups and
//! implements the higher-level strategies the fusion engine runs:
//! plain similarity, keyword-biased search, and maximum marginal
//! relevance. Backend failures are mapped onto [`RagError`].

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, embed_one, Embedder};
use crate::error::{RagError, Result};
use crate::models::Chunk;
use crate::store::{ChunkStore, DocumentFilter, IndexedChunk, VectorHit};
use crate::text::{match_patterns, search_keywords};

pub const DEFAULT_MMR_LAMBDA: f32 = 0.5;
pub const DEFAULT_EMBED_BATCH: usize = 64;

#[derive(Clone)]
pub struct ChunkIndex {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

fn read_err(e: anyhow::Error) -> RagError {
    RagError::IndexRead(format!("{:#}", e))
}

fn embed_err(e: anyhow::Error) -> RagError {
    RagError::Embedding(format!("{:#}", e))
}

impl ChunkIndex {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed and write a batch of chunks.
    ///
    /// After the write, the chunk count of every document in the batch is
    /// read back and must equal the number of distinct chunk ids written;
    /// a mismatch is reported as [`RagError::IndexWrite`]. Callers that
    /// re-chunk a document must delete its old chunks first.
    pub async fn add_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed(batch).await.map_err(embed_err)?;
            if embedded.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }

        let filter = DocumentFilter::new(chunks.iter().map(|c| c.document_id.clone()));
        let expected = chunks.iter().map(|c| c.id.as_str()).collect::<HashSet<_>>().len();

        let items: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();
        self.store
            .insert_chunks(items)
            .await
            .map_err(|e| RagError::IndexWrite(format!("{:#}", e)))?;

        let stored = self
            .store
            .count(Some(&filter))
            .await
            .map_err(|e| RagError::IndexWrite(format!("count check failed: {:#}", e)))?;
        if stored != expected {
            return Err(RagError::IndexWrite(format!(
                "count check failed: wrote {} chunks, index holds {}",
                expected, stored
            )));
        }

        tracing::debug!(chunks = expected, backend = self.store.backend_name(), "Indexed chunks");
        Ok(expected)
    }

    /// Up to `k` chunks nearest to `query`.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<Chunk>> {
        Ok(self
            .similarity_search_with_score(query, k, filter)
            .await?
            .into_iter()
            .map(|(chunk, _)| chunk)
            .collect())
    }

    /// Like [`similarity_search`](Self::similarity_search), with cosine scores.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let hits = self.nearest(query, k, filter).await?;
        Ok(hits.into_iter().map(|h| (h.chunk, h.score)).collect())
    }

    /// Search on the question's keywords rather than the whole question.
    ///
    /// Lexical matches on the keywords (and their CJK bigrams) come first,
    /// followed by embedding matches on the joined keyword string. Returns
    /// nothing when the question has no keywords.
    pub async fn keyword_biased_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<Chunk>> {
        let keywords = search_keywords(query);
        if keywords.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let patterns = match_patterns(&keywords);
        let lexical = self
            .store
            .lexical_search(&patterns, k, filter)
            .await
            .map_err(read_err)?;
        let semantic = self.similarity_search(&keywords.join(" "), k, filter).await?;

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(k);
        for chunk in lexical.into_iter().map(|h| h.chunk).chain(semantic) {
            if out.len() == k {
                break;
            }
            if seen.insert(chunk.id.clone()) {
                out.push(chunk);
            }
        }
        Ok(out)
    }

    /// Greedy MMR over the `fetch_k` nearest candidates.
    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<Chunk>> {
        let query_vec = embed_one(self.embedder.as_ref(), query)
            .await
            .map_err(embed_err)?;
        let candidates = self
            .store
            .vector_search(&query_vec, fetch_k.max(k), filter)
            .await
            .map_err(read_err)?;
        let picks = mmr_select(&query_vec, &candidates, k, lambda);
        Ok(picks.into_iter().map(|i| candidates[i].chunk.clone()).collect())
    }

    /// Every chunk of the filtered documents, in reading order.
    pub async fn exact_metadata_fetch(&self, filter: &DocumentFilter) -> Result<Vec<Chunk>> {
        self.store.fetch_by_documents(filter).await.map_err(read_err)
    }

    pub async fn chunks_for_filename(&self, filename: &str) -> Result<Vec<Chunk>> {
        self.store.fetch_by_filename(filename).await.map_err(read_err)
    }

    /// Idempotent; returns the number of chunks removed.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        self.store
            .delete_by_document(document_id)
            .await
            .map_err(|e| RagError::IndexWrite(format!("{:#}", e)))
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(None).await.map_err(read_err)
    }

    pub async fn count_in(&self, filter: &DocumentFilter) -> Result<usize> {
        self.store.count(Some(filter)).await.map_err(read_err)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store
            .clear()
            .await
            .map_err(|e| RagError::IndexWrite(format!("{:#}", e)))
    }

    async fn nearest(
        &self,
        query: &str,
        k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), query)
            .await
            .map_err(embed_err)?;
        self.store
            .vector_search(&query_vec, k, filter)
            .await
            .map_err(read_err)
    }
}

/// Greedy maximum marginal relevance selection.
///
/// Each pick maximizes `λ·sim(query, c) − (1−λ)·max sim(c, picked)`.
/// Returns indices into `candidates`, at most `k`, never repeating a
/// chunk id.
pub fn mmr_select(query_vec: &[f32], candidates: &[VectorHit], k: usize, lambda: f32) -> Vec<usize> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query_vec, &c.vector))
        .collect();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked: Vec<usize> = Vec::new();

    while picked.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = picked
                .iter()
                .map(|&p| cosine_similarity(&candidates[idx].vector, &candidates[p].vector))
                .fold(0.0f32, f32::max);
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        let chosen = remaining.remove(best_pos);
        let chosen_id = &candidates[chosen].chunk.id;
        remaining.retain(|&i| &candidates[i].chunk.id != chosen_id);
        picked.push(chosen);
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryChunkStore;
    use crate::testing::{chunk, FailingEmbedder, LetterEmbedder};

    fn index() -> ChunkIndex {
        ChunkIndex::new(Arc::new(InMemoryChunkStore::new()), Arc::new(LetterEmbedder))
            .with_batch_size(2)
    }

    #[tokio::test]
    async fn test_add_chunks_counts_and_batches() {
        let idx = index();
        let n = idx
            .add_chunks(vec![chunk("d", 0, "aaa"), chunk("d", 1, "bbb"), chunk("d", 2, "ccc")])
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(idx.count().await.unwrap(), 3);
        assert_eq!(idx.add_chunks(vec![]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_add() {
        let idx = ChunkIndex::new(Arc::new(InMemoryChunkStore::new()), Arc::new(FailingEmbedder));
        let err = idx.add_chunks(vec![chunk("d", 0, "aaa")]).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
        assert_eq!(idx.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_readd_without_delete_fails_count_check() {
        let idx = index();
        idx.add_chunks(vec![chunk("d", 0, "aaa"), chunk("d", 1, "bbb")])
            .await
            .unwrap();
        let err = idx.add_chunks(vec![chunk("d", 0, "aaa")]).await.unwrap_err();
        assert!(matches!(err, RagError::IndexWrite(_)));
    }

    #[tokio::test]
    async fn test_similarity_respects_filter() {
        let idx = index();
        idx.add_chunks(vec![chunk("x", 0, "aaaa")]).await.unwrap();
        idx.add_chunks(vec![chunk("y", 0, "aaab")]).await.unwrap();
        let only_y = DocumentFilter::new(["y"]);
        let hits = idx.similarity_search("aaaa", 5, Some(&only_y)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "y");

        let scored = idx.similarity_search_with_score("aaaa", 5, None).await.unwrap();
        assert_eq!(scored[0].0.document_id, "x");
        assert!(scored[0].1 >= scored[1].1);
    }

    #[tokio::test]
    async fn test_keyword_biased_puts_lexical_hits_first() {
        let idx = index();
        idx.add_chunks(vec![
            chunk("d", 0, "營業時間 aaaa"),
            chunk("d", 1, "退貨政策 eeee"),
            chunk("d", 2, "其他 aaab"),
        ])
        .await
        .unwrap();
        let hits = idx.keyword_biased_search("退貨政策是什麼", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "d_chunk_1");

        assert!(idx.keyword_biased_search("is it", 2, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mmr_never_duplicates_or_exceeds_k() {
        let idx = index();
        let texts = ["aaaa", "aaab", "aaac", "bbbb", "bbbc", "cccc", "dddd", "eeee", "aabb"];
        let chunks = texts.iter().enumerate().map(|(i, t)| chunk("m", i, t)).collect();
        idx.add_chunks(chunks).await.unwrap();

        let picks = idx
            .max_marginal_relevance_search("aaaa", 3, 9, DEFAULT_MMR_LAMBDA, None)
            .await
            .unwrap();
        assert_eq!(picks.len(), 3);
        let ids: HashSet<_> = picks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(picks[0].text, "aaaa");
    }

    #[test]
    fn test_mmr_prefers_diverse_second_pick() {
        let hit = |id: &str, v: Vec<f32>| VectorHit {
            chunk: chunk(id, 0, id),
            score: 0.0,
            vector: v,
        };
        let candidates = vec![
            hit("a", vec![1.0, 0.0]),
            hit("a2", vec![1.0, 0.05]),
            hit("b", vec![0.0, 1.0]),
        ];
        let query = [0.8, 0.6];
        assert_eq!(mmr_select(&query, &candidates, 2, 0.5), vec![1, 2]);
        assert_eq!(mmr_select(&query, &candidates, 2, 1.0), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_exact_fetch_covers_every_scoped_strategy() {
        let idx = index();
        let texts = ["aaaa 退貨政策", "aaab", "bbbb 政策", "cccd", "dddd", "eeea 退貨"];
        idx.add_chunks(texts.iter().enumerate().map(|(i, t)| chunk("d", i, t)).collect())
            .await
            .unwrap();
        idx.add_chunks(vec![chunk("other", 0, "aaaa 退貨政策"), chunk("other", 1, "bbbb")])
            .await
            .unwrap();

        let filter = DocumentFilter::new(["d"]);
        let exact: HashSet<String> = idx
            .exact_metadata_fetch(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(exact.len(), texts.len());

        for query in ["aaaa", "退貨政策是什麼", "bbbb cccc"] {
            let similar = idx.similarity_search(query, 10, Some(&filter)).await.unwrap();
            let keyword = idx.keyword_biased_search(query, 10, Some(&filter)).await.unwrap();
            let mmr = idx
                .max_marginal_relevance_search(query, 4, 10, DEFAULT_MMR_LAMBDA, Some(&filter))
                .await
                .unwrap();
            assert!(!similar.is_empty());
            for c in similar.iter().chain(&keyword).chain(&mmr) {
                assert!(exact.contains(&c.id), "{} missing from exact fetch", c.id);
            }
        }
    }

    #[tokio::test]
    async fn test_delete_by_document_is_idempotent() {
        let idx = index();
        idx.add_chunks(vec![chunk("d", 0, "aaa")]).await.unwrap();
        assert_eq!(idx.delete_by_document("d").await.unwrap(), 1);
        assert_eq!(idx.delete_by_document("d").await.unwrap(), 0);
        assert_eq!(idx.count().await.unwrap(), 0);
    }
}
