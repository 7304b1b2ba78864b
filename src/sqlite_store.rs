//! SQLite-backed [`ChunkStore`].
//!
//! One `chunks` table holds text, metadata and the embedding as a
//! little-endian f32 BLOB. Vector search is a brute-force cosine scan over
//! the (optionally filtered) rows. Lexical search scans the same rows and
//! scores them in Rust with [`lexical_score`]. SQLite's `LIKE` and `lower()`
//! only fold ASCII case, so they are not used for matching. Both scans are
//! adequate for the small, per-user corpora this service targets.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};

use docqa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docqa_core::models::Chunk;
use docqa_core::store::{ChunkStore, DocumentFilter, IndexedChunk, LexicalHit, VectorHit};
use docqa_core::text::lexical_score;

use crate::{db, migrate};

const CHUNK_COLUMNS: &str =
    "SELECT id, document_id, filename, content_type, page, chunk_index, text, hash";

pub struct SqliteChunkStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteChunkStore {
    /// Open the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool, path: None })
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let page: Option<i64> = row.get("page");
    let chunk_index: i64 = row.get("chunk_index");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        page: page.and_then(|p| u32::try_from(p).ok()),
        chunk_index: chunk_index.max(0) as usize,
        text: row.get("text"),
        hash: row.get("hash"),
    }
}

/// Appends `WHERE document_id IN (...)` for a non-empty filter.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &DocumentFilter) {
    qb.push(" WHERE document_id IN (");
    let mut ids = qb.separated(", ");
    for id in filter.ids() {
        ids.push_bind(id.to_string());
    }
    ids.push_unseparated(")");
}

fn descending<T: PartialOrd>(a: T, b: T) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    fn location(&self) -> Option<String> {
        self.path.as_ref().map(|p| p.display().to_string())
    }

    async fn insert_chunks(&self, items: Vec<IndexedChunk>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for item in &items {
            let chunk = &item.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, filename, content_type, page,
                                    chunk_index, text, hash, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    filename = excluded.filename,
                    content_type = excluded.content_type,
                    page = excluded.page,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.filename)
            .bind(&chunk.content_type)
            .bind(chunk.page.map(i64::from))
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&item.vector))
            .bind(item.vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<VectorHit>> {
        if limit == 0 || filter.is_some_and(DocumentFilter::is_empty) {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(CHUNK_COLUMNS);
        qb.push(", embedding FROM chunks");
        if let Some(filter) = filter {
            push_filter(&mut qb, filter);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                VectorHit {
                    score: cosine_similarity(query_vec, &vector),
                    chunk: row_to_chunk(row),
                    vector,
                }
            })
            .collect();

        hits.sort_by(|a, b| descending(a.score, b.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        patterns: &[String],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<LexicalHit>> {
        if patterns.is_empty() || limit == 0 || filter.is_some_and(DocumentFilter::is_empty) {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(CHUNK_COLUMNS);
        qb.push(" FROM chunks");
        if let Some(filter) = filter {
            push_filter(&mut qb, filter);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut hits: Vec<LexicalHit> = rows
            .iter()
            .filter_map(|row| {
                let chunk = row_to_chunk(row);
                let score = lexical_score(&chunk.text, patterns);
                (score > 0.0).then_some(LexicalHit { chunk, score })
            })
            .collect();

        hits.sort_by(|a, b| descending(a.score, b.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_by_documents(&self, filter: &DocumentFilter) -> Result<Vec<Chunk>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(CHUNK_COLUMNS);
        qb.push(" FROM chunks");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY document_id, chunk_index");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn fetch_by_filename(&self, filename: &str) -> Result<Vec<Chunk>> {
        let sql = format!(
            "{} FROM chunks WHERE filename = ? ORDER BY document_id, chunk_index",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(filename).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, filter: Option<&DocumentFilter>) -> Result<usize> {
        if filter.is_some_and(DocumentFilter::is_empty) {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM chunks");
        if let Some(filter) = filter {
            push_filter(&mut qb, filter);
        }
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::chunk::content_hash;
    use docqa_core::store::memory::InMemoryChunkStore;
    use docqa_core::text::match_patterns;
    use tempfile::TempDir;

    fn item(doc: &str, index: usize, page: Option<u32>, text: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: Chunk::chunk_id(doc, index),
                document_id: doc.to_string(),
                filename: format!("{}.txt", doc),
                content_type: "text/plain".into(),
                page,
                chunk_index: index,
                text: text.to_string(),
                hash: content_hash(text),
            },
            vector,
        }
    }

    async fn seeded(tmp: &TempDir) -> SqliteChunkStore {
        let store = SqliteChunkStore::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        store
            .insert_chunks(vec![
                item("a", 0, Some(1), "Opening hours", vec![1.0, 0.0]),
                item("a", 1, Some(2), "退貨政策：七天內", vec![0.0, 1.0]),
                item("b", 0, None, "Refund policy", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let chunks = store
            .fetch_by_documents(&DocumentFilter::new(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(chunks[1].text, "退貨政策：七天內");
        assert_eq!(chunks[2].page, None);
        assert_eq!(store.fetch_by_filename("a.txt").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_vector_search_with_filter() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let hits = store.vector_search(&[0.0, 1.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "a_chunk_1");
        assert_eq!(hits[0].vector, vec![0.0, 1.0]);

        let only_b = DocumentFilter::new(["b"]);
        let hits = store.vector_search(&[0.0, 1.0], 5, Some(&only_b)).await.unwrap();
        assert_eq!(hits.len(), 1);
        let none = store
            .vector_search(&[0.0, 1.0], 5, Some(&DocumentFilter::default()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_search_matches_cjk_and_case() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let hits = store
            .lexical_search(&["退貨".to_string(), "政策".to_string()], 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "a_chunk_1");

        let hits = store
            .lexical_search(&["refund".to_string()], 5, Some(&DocumentFilter::new(["b"])))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_lexical_search_folds_non_ascii_case() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        store
            .insert_chunks(vec![item("c", 0, Some(1), "Ärger über die Lieferung", vec![0.5, 0.5])])
            .await
            .unwrap();
        let patterns = match_patterns(&["ÄRGER".to_string()]);
        let hits = store.lexical_search(&patterns, 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c_chunk_0");

        let memory = InMemoryChunkStore::new();
        memory
            .insert_chunks(vec![item("c", 0, Some(1), "Ärger über die Lieferung", vec![0.5, 0.5])])
            .await
            .unwrap();
        assert_eq!(memory.lexical_search(&patterns, 5, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_delete_clear() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some(&DocumentFilter::new(["a"]))).await.unwrap(), 2);
        assert_eq!(store.delete_by_document("a").await.unwrap(), 2);
        assert_eq!(store.delete_by_document("a").await.unwrap(), 0);
        store.clear().await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        drop(seeded(&tmp).await);
        let reopened = SqliteChunkStore::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        assert_eq!(reopened.count(None).await.unwrap(), 3);
        assert!(reopened.location().unwrap().ends_with("index.sqlite"));
    }
}
