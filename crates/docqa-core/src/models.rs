//! Core data models shared by the engine and its callers.
//!
//! These are the documents, chunks, sessions, and result shapes that flow
//! through ingestion and retrieval. All of them serialize with `serde` so
//! they can be snapshotted to disk and returned over HTTP unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Error => "error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub file_path: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub upload_time: DateTime<Utc>,
}

/// A bounded span of a document's extracted text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub content_type: String,
    /// 1-based page number, when known or estimated.
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Deterministic chunk id derived from the owning document and index.
    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{}_chunk_{}", document_id, index)
    }
}

/// A named scope restricting which documents a query may draw from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub active_docs: Vec<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let short: String = id.chars().take(8).collect();
        Self {
            name: format!("Session {}", short),
            id,
            created_at: Utc::now(),
            active_docs: Vec::new(),
        }
    }
}

/// Summary row returned by `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub document_count: usize,
}

/// A citable location in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub file_name: String,
    pub page: Option<u32>,
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePreviewMetadata {
    pub filename: String,
    pub chunks_count: usize,
    pub relevance_score: f64,
    pub expandable: bool,
}

/// Per-file preview shown next to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePreview {
    pub snippet: String,
    pub highlighted: String,
    pub full_content: String,
    pub metadata: SourcePreviewMetadata,
}

/// Token and cost figures for a single model-backed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub source_documents: Vec<SourcePreview>,
    pub timestamp: DateTime<Utc>,
    /// Present only when a language model was actually called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    pub key_points: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: usize,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub questions: Vec<QuizQuestion>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_combines_document_and_index() {
        assert_eq!(Chunk::chunk_id("abc", 3), "abc_chunk_3");
    }

    #[test]
    fn session_default_name_uses_id_prefix() {
        let s = Session::new("0123456789abcdef");
        assert_eq!(s.name, "Session 01234567");
        assert!(s.active_docs.is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DocumentStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let back: DocumentStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, DocumentStatus::Error);
    }

    #[test]
    fn token_usage_omitted_when_absent() {
        let result = QueryResult {
            id: "q".into(),
            question: "?".into(),
            answer: "a".into(),
            sources: vec![],
            source_documents: vec![],
            timestamp: Utc::now(),
            token_usage: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("token_usage").is_none());
    }
}
