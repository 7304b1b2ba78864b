//! Session manager.
//!
//! A session is a named, mutable scope restricting which documents a query
//! may draw from. Sessions are created by explicit upsert
//! ([`SessionManager::create_or_get`]) or implicitly by
//! [`SessionManager::add_document`]; both are idempotent. State is written
//! through to `session_metadata.json` under a single-writer mutex.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docqa_core::models::{Session, SessionSummary};
use docqa_core::{RagError, Result};
use tokio::sync::Mutex;

use crate::registry::DocumentRegistry;
use crate::snapshot;

pub struct SessionManager {
    path: PathBuf,
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl SessionManager {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let sessions: BTreeMap<String, Session> = snapshot::load(path).await?;
        tracing::debug!(path = %path.display(), sessions = sessions.len(), "sessions loaded");
        Ok(Self {
            path: path.to_path_buf(),
            sessions: Mutex::new(sessions),
        })
    }

    async fn persist(&self, sessions: &BTreeMap<String, Session>) -> Result<()> {
        snapshot::save(&self.path, sessions)
            .await
            .map_err(|e| RagError::Persistence(format!("{:#}", e)))
    }

    /// Return the session with `id`, creating it when absent. Without an id a
    /// fresh one is generated.
    pub async fn create_or_get(&self, id: Option<&str>) -> Result<Session> {
        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&id) {
            return Ok(existing.clone());
        }

        let session = Session::new(id.clone());
        let mut next = sessions.clone();
        next.insert(id, session.clone());
        self.persist(&next).await?;
        *sessions = next;
        tracing::info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Add a registered document to a session, creating the session if
    /// needed. Adding a document twice is a no-op.
    pub async fn add_document(
        &self,
        session_id: &str,
        document_id: &str,
        registry: &DocumentRegistry,
    ) -> Result<Session> {
        registry.get(document_id).await?;

        let mut sessions = self.sessions.lock().await;
        let mut session = sessions
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Session::new(session_id));

        if session.active_docs.iter().any(|d| d == document_id) {
            return Ok(session);
        }
        session.active_docs.push(document_id.to_string());

        let mut next = sessions.clone();
        next.insert(session_id.to_string(), session.clone());
        self.persist(&next).await?;
        *sessions = next;
        Ok(session)
    }

    /// Remove a document from a session. Returns whether the session exists;
    /// removing an absent membership is a no-op.
    pub async fn remove_document(&self, session_id: &str, document_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(session_id) else {
            return Ok(false);
        };
        if !session.active_docs.iter().any(|d| d == document_id) {
            return Ok(true);
        }

        let mut next = sessions.clone();
        if let Some(session) = next.get_mut(session_id) {
            session.active_docs.retain(|d| d != document_id);
        }
        self.persist(&next).await?;
        *sessions = next;
        Ok(true)
    }

    /// Active document ids; empty for an unknown session.
    pub async fn active_documents(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.active_docs.clone())
            .unwrap_or_default()
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Summaries, oldest session first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                name: s.name.clone(),
                created_at: s.created_at,
                document_count: s.active_docs.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Strip a document from every session. Returns the number of sessions
    /// that changed.
    pub async fn remove_document_everywhere(&self, document_id: &str) -> Result<usize> {
        let mut sessions = self.sessions.lock().await;
        let mut next = sessions.clone();
        let mut changed = 0;
        for session in next.values_mut() {
            let before = session.active_docs.len();
            session.active_docs.retain(|d| d != document_id);
            if session.active_docs.len() != before {
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(&next).await?;
            *sessions = next;
        }
        Ok(changed)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let next = BTreeMap::new();
        self.persist(&next).await?;
        *sessions = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        dir: PathBuf,
        registry: DocumentRegistry,
        sessions: SessionManager,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let registry = DocumentRegistry::open(&dir.join("document_metadata.json"))
            .await
            .unwrap();
        let sessions = SessionManager::open(&dir.join("session_metadata.json"))
            .await
            .unwrap();
        Fixture {
            _tmp: tmp,
            dir,
            registry,
            sessions,
        }
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let f = fixture().await;
        let first = f.sessions.create_or_get(Some("abc")).await.unwrap();
        let again = f.sessions.create_or_get(Some("abc")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.name, "Session abc");

        let generated = f.sessions.create_or_get(None).await.unwrap();
        assert_eq!(generated.id.len(), 36);
        assert_eq!(f.sessions.list_sessions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_add_then_remove_document() {
        let f = fixture().await;
        let doc = f.registry.register("a.txt", "text/plain", 1, &f.dir).await.unwrap();

        f.sessions.add_document("s1", &doc.id, &f.registry).await.unwrap();
        f.sessions.add_document("s1", &doc.id, &f.registry).await.unwrap();
        assert_eq!(f.sessions.active_documents("s1").await, vec![doc.id.clone()]);

        assert!(f.sessions.remove_document("s1", &doc.id).await.unwrap());
        assert!(f.sessions.active_documents("s1").await.is_empty());
        assert!(f.sessions.remove_document("s1", &doc.id).await.unwrap());
        assert!(!f.sessions.remove_document("missing", &doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_unknown_document_is_not_found() {
        let f = fixture().await;
        let err = f.sessions.add_document("s1", "ghost", &f.registry).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
        assert!(f.sessions.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_has_no_documents() {
        let f = fixture().await;
        assert!(f.sessions.active_documents("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_everywhere_and_reopen() {
        let f = fixture().await;
        let a = f.registry.register("a.txt", "text/plain", 1, &f.dir).await.unwrap();
        let b = f.registry.register("b.txt", "text/plain", 1, &f.dir).await.unwrap();
        f.sessions.add_document("s1", &a.id, &f.registry).await.unwrap();
        f.sessions.add_document("s1", &b.id, &f.registry).await.unwrap();
        f.sessions.add_document("s2", &a.id, &f.registry).await.unwrap();

        assert_eq!(f.sessions.remove_document_everywhere(&a.id).await.unwrap(), 2);

        let reopened = SessionManager::open(&f.dir.join("session_metadata.json"))
            .await
            .unwrap();
        assert_eq!(reopened.active_documents("s1").await, vec![b.id.clone()]);
        assert!(reopened.active_documents("s2").await.is_empty());
        assert_eq!(reopened.list_sessions().await.len(), 2);

        reopened.clear().await.unwrap();
        assert!(reopened.list_sessions().await.is_empty());
    }
}
