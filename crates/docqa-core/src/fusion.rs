//! Retrieval fusion: several retrieval strategies merged into one pool.
//!
//! Each strategy alone misses a different class of evidence. Similarity
//! search misses verbatim phrases, MMR trades recall for diversity, and
//! any embedding search can skip parts of a small document. The fusion
//! engine runs them all and keeps the union.
//!
//! # Algorithm
//!
//! 1. If a scope is given and holds zero chunks, stop with
//!    [`FusionOutcome::NoDocuments`].
//! 2. Similarity search at `2k`.
//! 3. Keyword-biased search at `k` (empty when the question has no
//!    keywords).
//! 4. MMR at `k` with `fetch_k = 3k`.
//! 5. Similarity-with-score at `2k`; scores stay local to the stage.
//! 6. Exact fetch of every chunk of every document in scope.
//! 7. Concatenate and deduplicate on [`DedupKey`].
//! 8. Stable sort by page ascending; chunks without a page go last.
//! 9. Truncate to `4k`.
//!
//! Stages 2–6 fail independently: a failing stage is logged and
//! contributes nothing. If all of them fail the pool is empty.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::index::{ChunkIndex, DEFAULT_MMR_LAMBDA};
use crate::models::Chunk;
use crate::store::DocumentFilter;

/// How stage 7 decides two chunks are the same evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// Hash of the first `n` characters. Tolerates chunks that differ
    /// only past the prefix, but collapses distinct chunks that share a
    /// boilerplate opening.
    ContentPrefix(usize),
    /// Hash of the whole text.
    FullContent,
}

impl Default for DedupKey {
    fn default() -> Self {
        DedupKey::ContentPrefix(200)
    }
}

impl DedupKey {
    fn digest(&self, text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        match self {
            DedupKey::ContentPrefix(n) => {
                let end = text.char_indices().nth(*n).map_or(text.len(), |(i, _)| i);
                hasher.update(text[..end].as_bytes());
            }
            DedupKey::FullContent => hasher.update(text.as_bytes()),
        }
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Similarity,
    KeywordBiased,
    Mmr,
    ScoredSimilarity,
    FullDocument,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Similarity => "similarity",
            Strategy::KeywordBiased => "keyword",
            Strategy::Mmr => "mmr",
            Strategy::ScoredSimilarity => "scored_similarity",
            Strategy::FullDocument => "full_document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub strategy: Strategy,
    pub returned: usize,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub k: usize,
    pub mmr_lambda: f32,
    pub dedup: DedupKey,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            k: 8,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            dedup: DedupKey::default(),
        }
    }
}

/// The fused evidence set and how it was assembled.
#[derive(Debug, Clone, Default)]
pub struct FusedPool {
    pub chunks: Vec<Chunk>,
    pub stages: Vec<StageReport>,
    /// Chunks returned by all stages before dedup.
    pub candidates: usize,
    /// Chunks left after dedup, before the `4k` cap.
    pub unique: usize,
}

impl FusedPool {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.unique > self.chunks.len()
    }

    pub fn stage(&self, strategy: Strategy) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.strategy == strategy)
    }
}

#[derive(Debug, Clone)]
pub enum FusionOutcome {
    /// The scope is non-empty but none of its documents has indexed chunks.
    NoDocuments,
    Pool(FusedPool),
}

/// Chunks of one file, in pool order.
#[derive(Debug, Clone, PartialEq)]
pub struct FileGroup {
    pub filename: String,
    pub chunks: Vec<Chunk>,
}

impl FileGroup {
    /// Chunk texts joined by blank lines.
    pub fn content(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Run all stages for `question` within an optional document scope.
///
/// `None` means the whole corpus; the full-document stage then has nothing
/// to fetch and is skipped.
pub async fn fuse(
    index: &ChunkIndex,
    question: &str,
    scope: Option<&DocumentFilter>,
    params: &FusionParams,
) -> FusionOutcome {
    let k = params.k.max(1);

    if let Some(scope) = scope {
        if scope.is_empty() {
            return FusionOutcome::NoDocuments;
        }
        match index.count_in(scope).await {
            Ok(0) => return FusionOutcome::NoDocuments,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Scope count failed, continuing with retrieval"),
        }
    }

    let mut gathered: Vec<Chunk> = Vec::new();
    let mut stages = Vec::with_capacity(5);

    let similarity = index.similarity_search(question, 2 * k, scope).await;
    collect(Strategy::Similarity, similarity, &mut gathered, &mut stages);

    let keyword = index.keyword_biased_search(question, k, scope).await;
    collect(Strategy::KeywordBiased, keyword, &mut gathered, &mut stages);

    let mmr = index
        .max_marginal_relevance_search(question, k, 3 * k, params.mmr_lambda, scope)
        .await;
    collect(Strategy::Mmr, mmr, &mut gathered, &mut stages);

    let scored = index
        .similarity_search_with_score(question, 2 * k, scope)
        .await
        .map(|hits| hits.into_iter().map(|(chunk, _)| chunk).collect());
    collect(Strategy::ScoredSimilarity, scored, &mut gathered, &mut stages);

    if let Some(scope) = scope {
        let full = index.exact_metadata_fetch(scope).await;
        collect(Strategy::FullDocument, full, &mut gathered, &mut stages);
    }

    let candidates = gathered.len();
    let mut chunks = dedup_chunks(gathered, params.dedup);
    let unique = chunks.len();
    sort_by_page(&mut chunks);
    chunks.truncate(4 * k);

    tracing::debug!(
        candidates,
        unique,
        kept = chunks.len(),
        "Fused retrieval pool"
    );

    FusionOutcome::Pool(FusedPool {
        chunks,
        stages,
        candidates,
        unique,
    })
}

fn collect(
    strategy: Strategy,
    result: Result<Vec<Chunk>>,
    gathered: &mut Vec<Chunk>,
    stages: &mut Vec<StageReport>,
) {
    match result {
        Ok(chunks) => {
            stages.push(StageReport {
                strategy,
                returned: chunks.len(),
                failed: false,
            });
            gathered.extend(chunks);
        }
        Err(e) => {
            tracing::warn!(stage = strategy.name(), error = %e, "Retrieval stage failed");
            stages.push(StageReport {
                strategy,
                returned: 0,
                failed: true,
            });
        }
    }
}

/// Keep the first chunk for every dedup key, preserving order.
pub fn dedup_chunks(chunks: Vec<Chunk>, key: DedupKey) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(key.digest(&c.text)))
        .collect()
}

/// Stable sort by page; missing pages sort after every numbered page.
pub fn sort_by_page(chunks: &mut [Chunk]) {
    chunks.sort_by_key(|c| c.page.unwrap_or(u32::MAX));
}

/// Group chunks by filename, files in first-seen order.
pub fn group_by_filename(chunks: &[Chunk]) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();
    for chunk in chunks {
        match groups.iter_mut().find(|g| g.filename == chunk.filename) {
            Some(group) => group.chunks.push(chunk.clone()),
            None => groups.push(FileGroup {
                filename: chunk.filename.clone(),
                chunks: vec![chunk.clone()],
            }),
        }
    }
    groups
}

/// One context block, each file labelled with its name.
pub fn build_context(groups: &[FileGroup]) -> String {
    groups
        .iter()
        .map(|g| format!("[File: {}]\n{}", g.filename, g.content()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
