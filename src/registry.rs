//! Document registry.
//!
//! The authoritative record of uploaded documents and their processing
//! status, independent of what the chunk index holds. Every mutation is
//! serialized through one mutex and written through to
//! `document_metadata.json` before it becomes visible.
//!
//! The registry never cascades: deleting an entry leaves chunks, files and
//! session memberships to the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use docqa_core::models::{Document, DocumentStatus};
use docqa_core::{RagError, Result};
use tokio::sync::Mutex;

use crate::snapshot;

const INTERRUPTED: &str = "processing was interrupted by a restart; upload the file again";

pub struct DocumentRegistry {
    path: PathBuf,
    docs: Mutex<BTreeMap<String, Document>>,
}

impl DocumentRegistry {
    /// Load the registry snapshot at `path` (empty when absent).
    ///
    /// Documents left in `processing` by a previous run can never finish,
    /// so they are moved to `error`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let mut docs: BTreeMap<String, Document> = snapshot::load(path).await?;

        let mut interrupted = 0;
        for doc in docs.values_mut() {
            if doc.status == DocumentStatus::Processing {
                doc.status = DocumentStatus::Error;
                doc.error = Some(INTERRUPTED.to_string());
                interrupted += 1;
            }
        }
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "marked interrupted uploads as failed");
            snapshot::save(path, &docs).await?;
        }

        tracing::debug!(path = %path.display(), documents = docs.len(), "document registry loaded");
        Ok(Self {
            path: path.to_path_buf(),
            docs: Mutex::new(docs),
        })
    }

    async fn persist(&self, docs: &BTreeMap<String, Document>) -> Result<()> {
        snapshot::save(&self.path, docs)
            .await
            .map_err(|e| RagError::Persistence(format!("{:#}", e)))
    }

    /// Create a new document in `processing`. Its file path is
    /// `{uploads_dir}/{id}_{filename}`.
    pub async fn register(
        &self,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
        uploads_dir: &Path,
    ) -> Result<Document> {
        let id = uuid::Uuid::new_v4().to_string();
        let file_path = uploads_dir.join(format!("{}_{}", id, filename));
        let doc = Document {
            id: id.clone(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            file_path: file_path.display().to_string(),
            size_bytes,
            status: DocumentStatus::Processing,
            chunk_count: 0,
            error: None,
            upload_time: Utc::now(),
        };

        let mut docs = self.docs.lock().await;
        let mut next = docs.clone();
        next.insert(id, doc.clone());
        self.persist(&next).await?;
        *docs = next;
        Ok(doc)
    }

    pub async fn mark_ready(&self, id: &str, chunk_count: usize) -> Result<Document> {
        self.transition(id, DocumentStatus::Ready, |doc| {
            doc.chunk_count = chunk_count;
            doc.error = None;
        })
        .await
    }

    pub async fn mark_error(&self, id: &str, message: &str) -> Result<Document> {
        self.transition(id, DocumentStatus::Error, |doc| {
            doc.chunk_count = 0;
            doc.error = Some(message.to_string());
        })
        .await
    }

    /// Only `processing → ready` and `processing → error` are legal.
    async fn transition<F>(&self, id: &str, to: DocumentStatus, apply: F) -> Result<Document>
    where
        F: FnOnce(&mut Document),
    {
        let mut docs = self.docs.lock().await;
        let current = docs
            .get(id)
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))?;

        if current.status != DocumentStatus::Processing {
            return Err(RagError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            });
        }

        let mut updated = current.clone();
        updated.status = to;
        apply(&mut updated);

        let mut next = docs.clone();
        next.insert(id.to_string(), updated.clone());
        self.persist(&next).await?;
        *docs = next;
        Ok(updated)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        self.docs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.docs.lock().await.contains_key(id)
    }

    /// Every document regardless of status, oldest upload first.
    pub async fn list(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.docs.lock().await.values().cloned().collect();
        docs.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then(a.id.cmp(&b.id)));
        docs
    }

    /// Remove an entry. Returns the removed document, or `None` when the id
    /// was unknown.
    pub async fn delete(&self, id: &str) -> Result<Option<Document>> {
        let mut docs = self.docs.lock().await;
        if !docs.contains_key(id) {
            return Ok(None);
        }
        let mut next = docs.clone();
        let removed = next.remove(id);
        self.persist(&next).await?;
        *docs = next;
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut docs = self.docs.lock().await;
        let next = BTreeMap::new();
        self.persist(&next).await?;
        *docs = next;
        Ok(())
    }
}
