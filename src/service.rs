//! The orchestrator.
//!
//! [`RagService`] owns the chunk index, document registry, session manager,
//! synthesizer and usage tracker, and is the only place that composes them.
//! Route handlers and CLI commands call it and nothing else.
//!
//! Query-path operations always return a well-formed result: structural
//! "no data" conditions and model failures become explanatory answer text
//! instead of errors. Ingestion failures are recorded on the document, not
//! raised.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use docqa_core::chunk::chunk_document;
use docqa_core::embedding::{embed_one, Embedder};
use docqa_core::fusion::{build_context, fuse, group_by_filename, FusionOutcome};
use docqa_core::index::ChunkIndex;
use docqa_core::llm::{GenerationOptions, LanguageModel};
use docqa_core::models::{
    Chunk, Document, DocumentStatus, QueryResult, QuizResult, Session, SessionSummary,
    SummaryResult,
};
use docqa_core::store::{ChunkStore, DocumentFilter};
use docqa_core::synth::{
    Synthesizer, NOTHING_TO_SUMMARIZE, NO_DATA, NO_DOCUMENTS_IN_SESSION, NO_INDEXED_CONTENT,
    NO_RELEVANT_CONTENT,
};
use docqa_core::text::{highlight, match_patterns, question_terms, truncate_chars};
use docqa_core::{RagError, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::{extract_pages, is_supported, normalize_content_type};
use crate::llm::create_model;
use crate::registry::DocumentRegistry;
use crate::sessions::SessionManager;
use crate::sqlite_store::SqliteChunkStore;
use crate::usage::{Operation, Pricing, UsageStats, UsageTotals, UsageTracker};

pub const DEFAULT_QUIZ_QUESTIONS: usize = 5;
pub const MAX_QUIZ_QUESTIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDocument {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContent {
    pub file_name: String,
    pub content: String,
    pub chunks_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedSource {
    pub file_name: String,
    pub content: String,
    pub highlighted_content: String,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorStoreInfo {
    pub total_vectors: usize,
    pub backend: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStats {
    pub total_uploaded: usize,
    pub status_breakdown: BTreeMap<String, usize>,
    pub type_breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub by_operation: BTreeMap<String, UsageTotals>,
}

impl From<UsageStats> for TokenStats {
    fn from(stats: UsageStats) -> Self {
        Self {
            total_input_tokens: stats.total.input_tokens,
            total_output_tokens: stats.total.output_tokens,
            total_tokens: stats.total.total_tokens(),
            total_cost_usd: stats.total.cost_usd,
            by_operation: stats.by_operation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationInfo {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub llm_model: String,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub vector_store: VectorStoreInfo,
    pub documents: DocumentStats,
    pub token_usage: TokenStats,
    pub configuration: ConfigurationInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetReport {
    pub status: ResetStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub components: BTreeMap<String, String>,
}

pub struct RagService {
    config: Config,
    index: ChunkIndex,
    registry: DocumentRegistry,
    sessions: SessionManager,
    synthesizer: Synthesizer,
    usage: UsageTracker,
}

impl RagService {
    /// Build the service with the SQLite index and the providers named in
    /// `config`.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = SqliteChunkStore::open(&config.storage.index_path())
            .await
            .context("Failed to open chunk index")?;
        let embedder = create_embedder(&config.embedding).context("Failed to create embedder")?;
        let model = create_model(&config.llm).context("Failed to create language model")?;
        Self::with_components(config, Arc::new(store), embedder, model).await
    }

    /// Build the service around caller-supplied backends. Registry, session
    /// and usage snapshots still live under `config.storage.data_dir`.
    pub async fn with_components(
        config: Config,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let storage = &config.storage;
        tokio::fs::create_dir_all(storage.uploads_dir())
            .await
            .with_context(|| format!("Failed to create {}", storage.uploads_dir().display()))?;

        let registry = DocumentRegistry::open(&storage.registry_path()).await?;
        let sessions = SessionManager::open(&storage.sessions_path()).await?;
        let usage = UsageTracker::open(&storage.usage_path(), Pricing::from_config(&config.llm)).await?;

        let index = ChunkIndex::new(store, embedder).with_batch_size(config.embedding.batch_size);
        let synthesizer = Synthesizer::new(model, config.synthesizer_config());

        tracing::info!(
            backend = index.store().backend_name(),
            embedding_model = index.embedder().model_name(),
            llm_model = synthesizer.model().model_name(),
            "RAG service ready"
        );

        Ok(Self {
            config,
            index,
            registry,
            sessions,
            synthesizer,
            usage,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ Documents ============

    /// Store, extract, chunk and index an upload.
    ///
    /// Unsupported content types are rejected before anything is recorded.
    /// Any later failure leaves the document in `error` with the reason.
    pub async fn add_document(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<Document> {
        let filename = sanitize_filename(filename);
        let content_type = normalize_content_type(content_type, &filename);
        if !is_supported(&content_type) {
            return Err(RagError::UnsupportedContentType(content_type));
        }

        let doc = self
            .registry
            .register(
                &filename,
                &content_type,
                bytes.len() as u64,
                &self.config.storage.uploads_dir(),
            )
            .await?;
        tracing::info!(document_id = %doc.id, filename = %doc.filename, content_type = %doc.content_type, "document registered");

        match self.ingest(&doc, bytes).await {
            Ok(chunk_count) => {
                tracing::info!(document_id = %doc.id, chunks = chunk_count, "document ready");
                self.registry.mark_ready(&doc.id, chunk_count).await
            }
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "document processing failed");
                if let Err(cleanup) = self.index.delete_by_document(&doc.id).await {
                    tracing::warn!(document_id = %doc.id, error = %cleanup, "failed to remove partial chunks");
                }
                self.registry.mark_error(&doc.id, &e.to_string()).await
            }
        }
    }

    async fn ingest(&self, doc: &Document, bytes: &[u8]) -> Result<usize> {
        tokio::fs::write(&doc.file_path, bytes)
            .await
            .map_err(|e| RagError::Persistence(format!("saving {}: {}", doc.file_path, e)))?;

        let owned = bytes.to_vec();
        let content_type = doc.content_type.clone();
        let text = tokio::task::spawn_blocking(move || extract_pages(&owned, &content_type))
            .await
            .map_err(|e| RagError::Extraction(e.to_string()))?
            .map_err(|e| RagError::Extraction(e.to_string()))?;

        if text.total_chars() == 0 {
            return Err(RagError::Extraction("no text could be extracted".to_string()));
        }

        let chunks = chunk_document(doc, &text, &self.config.chunking.params());
        if chunks.is_empty() {
            return Err(RagError::Extraction("document produced no chunks".to_string()));
        }
        self.index.add_chunks(chunks).await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        self.registry.get(id).await
    }

    pub async fn list_documents(&self) -> Vec<Document> {
        self.registry.list().await
    }

    /// Remove a document everywhere: sessions, stored file, chunks, then the
    /// registry entry. Returns `false` for an unknown id.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let doc = match self.registry.get(id).await {
            Ok(doc) => doc,
            Err(RagError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.sessions.remove_document_everywhere(id).await?;

        match tokio::fs::remove_file(&doc.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %doc.file_path, error = %e, "failed to remove stored file"),
        }

        let removed = self.index.delete_by_document(id).await?;
        self.registry.delete(id).await?;
        tracing::info!(document_id = %id, chunks = removed, "document deleted");
        Ok(true)
    }

    // ============ Sessions ============

    pub async fn create_session(&self, id: Option<&str>) -> Result<Session> {
        self.sessions.create_or_get(id).await
    }

    pub async fn add_document_to_session(&self, session_id: &str, document_id: &str) -> Result<Session> {
        self.sessions
            .add_document(session_id, document_id, &self.registry)
            .await
    }

    pub async fn remove_document_from_session(&self, session_id: &str, document_id: &str) -> Result<bool> {
        self.sessions.remove_document(session_id, document_id).await
    }

    pub async fn get_session_documents(&self, session_id: &str) -> Vec<String> {
        self.sessions.active_documents(session_id).await
    }

    /// Active documents with their registry details. Ids that no longer
    /// resolve are skipped.
    pub async fn session_document_details(&self, session_id: &str) -> Vec<SessionDocument> {
        let mut details = Vec::new();
        for id in self.sessions.active_documents(session_id).await {
            if let Ok(doc) = self.registry.get(&id).await {
                details.push(SessionDocument {
                    id: doc.id,
                    filename: doc.filename,
                    status: doc.status,
                });
            }
        }
        details
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions().await
    }

    // ============ Question answering ============

    /// Answer `question` from the documents in scope.
    ///
    /// With a session, the scope is its active documents; without one, the
    /// whole corpus.
    pub async fn query(
        &self,
        question: &str,
        session_id: Option<&str>,
        k: Option<usize>,
    ) -> Result<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question must not be empty".to_string()));
        }
        let query_id = uuid::Uuid::new_v4().to_string();

        let scope = match session_id {
            Some(sid) => {
                let docs = self.sessions.active_documents(sid).await;
                if docs.is_empty() {
                    tracing::info!(query_id = %query_id, session_id = %sid, "no documents in session");
                    return Ok(explanation(query_id, question, NO_DOCUMENTS_IN_SESSION));
                }
                Some(DocumentFilter::new(docs))
            }
            None => None,
        };

        match self.index.count().await {
            Ok(0) => return Ok(explanation(query_id, question, NO_DATA)),
            Ok(total) => tracing::debug!(query_id = %query_id, total_chunks = total, "corpus size"),
            Err(e) => tracing::warn!(query_id = %query_id, error = %e, "chunk count failed, continuing"),
        }

        let params = self.config.retrieval.fusion_params(k);
        let pool = match fuse(&self.index, question, scope.as_ref(), &params).await {
            FusionOutcome::NoDocuments => {
                return Ok(explanation(query_id, question, NO_INDEXED_CONTENT));
            }
            FusionOutcome::Pool(pool) => pool,
        };
        tracing::info!(
            query_id = %query_id,
            candidates = pool.candidates,
            unique = pool.unique,
            kept = pool.chunks.len(),
            "retrieval complete"
        );
        if pool.is_empty() {
            return Ok(explanation(query_id, question, NO_RELEVANT_CONTENT));
        }

        let groups = group_by_filename(&pool.chunks);
        let sources = self.synthesizer.citations(&pool.chunks, question);
        let source_documents = self.synthesizer.build_source_previews(&groups, question);

        let (answer, token_usage) = match self.synthesizer.answer(question, &groups).await {
            Ok(answer) => {
                let usage = self.usage.record(Operation::Query, answer.usage).await;
                (answer.text, Some(usage))
            }
            Err(e) => {
                tracing::warn!(query_id = %query_id, error = %e, "answer generation failed");
                (model_failure_message(&e), None)
            }
        };

        Ok(QueryResult {
            id: query_id,
            question: question.to_string(),
            answer,
            sources,
            source_documents,
            timestamp: Utc::now(),
            token_usage,
        })
    }

    /// The documents a summary or quiz draws from: the session's active
    /// documents, or every ready document when no session is given.
    async fn content_scope(&self, session_id: Option<&str>) -> Option<DocumentFilter> {
        let ids: Vec<String> = match session_id {
            Some(sid) => self.sessions.active_documents(sid).await,
            None => self
                .registry
                .list()
                .await
                .into_iter()
                .filter(|d| d.status == DocumentStatus::Ready)
                .map(|d| d.id)
                .collect(),
        };
        (!ids.is_empty()).then(|| DocumentFilter::new(ids))
    }

    /// Every chunk in scope, as one filename-labelled context block.
    async fn scope_content(&self, session_id: Option<&str>) -> String {
        let Some(scope) = self.content_scope(session_id).await else {
            return String::new();
        };
        match self.index.exact_metadata_fetch(&scope).await {
            Ok(chunks) => build_context(&group_by_filename(&chunks)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch chunks for scope");
                String::new()
            }
        }
    }

    pub async fn generate_summary(&self, session_id: Option<&str>) -> Result<SummaryResult> {
        let content = self.scope_content(session_id).await;
        if content.trim().is_empty() {
            return Ok(SummaryResult {
                summary: NOTHING_TO_SUMMARIZE.to_string(),
                key_points: Vec::new(),
                timestamp: Utc::now(),
            });
        }

        let (summary, key_points) = match self.synthesizer.summarize(&content).await {
            Ok(draft) => {
                self.usage.record(Operation::Summary, draft.usage).await;
                (draft.summary, draft.key_points)
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed");
                (model_failure_message(&e), Vec::new())
            }
        };

        Ok(SummaryResult {
            summary,
            key_points,
            timestamp: Utc::now(),
        })
    }

    /// Generate up to `num_questions` multiple-choice questions (capped at
    /// [`MAX_QUIZ_QUESTIONS`]). Never fails on model trouble: the quiz is
    /// just empty.
    pub async fn generate_quiz(&self, session_id: Option<&str>, num_questions: usize) -> Result<QuizResult> {
        let n = num_questions.min(MAX_QUIZ_QUESTIONS);
        let content = self.scope_content(session_id).await;
        let draft = self.synthesizer.generate_quiz(&content, n).await;
        if let Some(usage) = draft.usage {
            self.usage.record(Operation::Quiz, usage).await;
        }
        Ok(QuizResult {
            questions: draft.questions,
            timestamp: Utc::now(),
        })
    }

    // ============ Sources ============

    async fn file_chunks(&self, file_name: &str) -> Result<Vec<Chunk>> {
        let chunks = self.index.chunks_for_filename(file_name).await?;
        if chunks.is_empty() {
            return Err(RagError::NotFound(format!("no indexed content for file {}", file_name)));
        }
        Ok(chunks)
    }

    /// Indexed text of a file, capped at `retrieval.source_content_chars`.
    /// With a `chunk_id` belonging to the file, only that chunk is returned.
    pub async fn get_source_content(&self, file_name: &str, chunk_id: Option<&str>) -> Result<SourceContent> {
        let chunks = self.file_chunks(file_name).await?;
        let selected: Vec<&Chunk> = match chunk_id.and_then(|id| chunks.iter().find(|c| c.id == id)) {
            Some(chunk) => vec![chunk],
            None => chunks.iter().collect(),
        };

        let joined = selected
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let cap = self.config.retrieval.source_content_chars;
        Ok(SourceContent {
            file_name: file_name.to_string(),
            truncated: joined.chars().count() > cap,
            content: truncate_chars(&joined, cap),
            chunks_count: selected.len(),
        })
    }

    /// Full indexed text of a file plus a variant with the query's keywords
    /// emphasised.
    pub async fn expand_source(&self, file_name: &str, query: Option<&str>) -> Result<ExpandedSource> {
        let chunks = self.file_chunks(file_name).await?;
        let content = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let highlighted_content = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => highlight(&content, &match_patterns(&question_terms(q))),
            None => content.clone(),
        };
        Ok(ExpandedSource {
            file_name: file_name.to_string(),
            length: content.chars().count(),
            content,
            highlighted_content,
        })
    }

    // ============ Operations ============

    pub async fn get_vector_store_stats(&self) -> Result<SystemStats> {
        let total_vectors = self.index.count().await?;
        let docs = self.registry.list().await;

        let mut status_breakdown = BTreeMap::new();
        let mut type_breakdown = BTreeMap::new();
        for doc in &docs {
            *status_breakdown.entry(doc.status.to_string()).or_insert(0) += 1;
            *type_breakdown.entry(doc.content_type.clone()).or_insert(0) += 1;
        }

        Ok(SystemStats {
            vector_store: VectorStoreInfo {
                total_vectors,
                backend: self.index.store().backend_name().to_string(),
                path: self.index.store().location(),
            },
            documents: DocumentStats {
                total_uploaded: docs.len(),
                status_breakdown,
                type_breakdown,
            },
            token_usage: self.usage.snapshot().await.into(),
            configuration: ConfigurationInfo {
                chunk_size: self.config.chunking.chunk_size,
                chunk_overlap: self.config.chunking.chunk_overlap,
                embedding_model: self.index.embedder().model_name().to_string(),
                llm_model: self.synthesizer.model().model_name().to_string(),
                k: self.config.retrieval.k,
            },
        })
    }

    /// Drop every document, session, stored file and chunk. Token usage is
    /// kept.
    pub async fn reset_system(&self) -> ResetReport {
        let mut failures: Vec<String> = Vec::new();

        if let Err(e) = self.registry.clear().await {
            failures.push(format!("registry: {}", e));
        }
        if let Err(e) = self.sessions.clear().await {
            failures.push(format!("sessions: {}", e));
        }
        if let Err(e) = reset_dir(&self.config.storage.uploads_dir()).await {
            failures.push(format!("uploads: {:#}", e));
        }
        if let Err(e) = self.index.clear().await {
            failures.push(format!("index: {}", e));
        }

        let (status, message) = if failures.is_empty() {
            tracing::info!("system reset");
            (ResetStatus::Success, "System reset to its initial state".to_string())
        } else {
            tracing::error!(failures = ?failures, "system reset incomplete");
            (ResetStatus::Error, format!("Reset failed: {}", failures.join("; ")))
        };
        ResetReport {
            status,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Probe every component. Index or embedding trouble degrades the
    /// service; a failing live model call makes it unhealthy.
    pub async fn health_check(&self) -> HealthReport {
        let mut status = HealthStatus::Healthy;
        let mut components = BTreeMap::new();

        let api_key = match self.config.llm.api_key_env() {
            Some(var) if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) => "configured",
            Some(_) => "missing",
            None => "not_required",
        };
        components.insert("api_key".to_string(), api_key.to_string());

        let vector_store = match self.index.count().await {
            Ok(n) => format!("operational ({} chunks)", n),
            Err(e) => {
                status = HealthStatus::Degraded;
                format!("error: {}", e)
            }
        };
        components.insert("vector_store".to_string(), vector_store);

        let embedder = self.index.embedder();
        let embedding = match embed_one(embedder.as_ref(), "health check").await {
            Ok(v) => format!("operational ({}, {} dims)", embedder.model_name(), v.len()),
            Err(e) => {
                status = HealthStatus::Degraded;
                format!("error: {:#}", e)
            }
        };
        components.insert("embedding".to_string(), embedding);

        let options = GenerationOptions {
            json_output: false,
            max_tokens: Some(8),
        };
        let prompt = "Reply with OK.";
        let llm = match self.synthesizer.model().generate(prompt, &options).await {
            Ok(generation) => {
                self.usage
                    .record(Operation::Health, generation.usage_or_estimate(prompt))
                    .await;
                "operational".to_string()
            }
            Err(e) => {
                status = HealthStatus::Unhealthy;
                format!("error: {:#}", e)
            }
        };
        components.insert("llm".to_string(), llm);

        let file_storage = if self.config.storage.uploads_dir().is_dir() {
            "operational"
        } else {
            "missing"
        };
        components.insert("file_storage".to_string(), file_storage.to_string());

        HealthReport {
            status,
            timestamp: Utc::now(),
            components,
        }
    }
}

fn explanation(id: String, question: &str, message: &str) -> QueryResult {
    QueryResult {
        id,
        question: question.to_string(),
        answer: message.to_string(),
        sources: Vec::new(),
        source_documents: Vec::new(),
        timestamp: Utc::now(),
        token_usage: None,
    }
}

fn model_failure_message(err: &RagError) -> String {
    format!(
        "The language model could not produce an answer right now ({}). Please try again later.",
        err
    )
}

/// Keep only the final path component of an uploaded name.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

async fn reset_dir(dir: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(())
}
