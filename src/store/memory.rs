//! In-memory [`Store`] implementation for testing.
//!
//! Uses `Vec`s behind `std::sync::RwLock`; insertion order doubles as creation
//! order. Lexical search ranks a chunk by how many query-term occurrences it
//! contains, and a stable sort keeps earlier chunks first on ties.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ApiKey, ChatMessage, ChatSession, ChunkMatch, Document, DocumentChunk, NewProject, Project,
    ProjectUpdate, Role,
};

use super::{now_ts, query_terms, Store};

/// In-memory store for tests.
pub struct InMemoryStore {
    sessions: RwLock<Vec<ChatSession>>,
    messages: RwLock<Vec<ChatMessage>>,
    projects: RwLock<Vec<Project>>,
    documents: RwLock<Vec<Document>>,
    chunks: RwLock<Vec<DocumentChunk>>,
    api_keys: RwLock<Vec<ApiKey>>,
    search_calls: AtomicUsize,
    fail_searches: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
            projects: RwLock::new(Vec::new()),
            documents: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            api_keys: RwLock::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
            fail_searches: AtomicBool::new(false),
        }
    }

    /// Number of times [`Store::search_chunks`] has been called.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent chunk search fail, simulating an unreachable index.
    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// Term-frequency score of `content` against lowercased `terms`.
fn term_frequency(content: &str, terms: &[String]) -> usize {
    let words = query_terms(content);
    terms
        .iter()
        .map(|t| words.iter().filter(|w| *w == t).count())
        .sum()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_session(
        &self,
        user_id: &str,
        title: &str,
        project_id: Option<&str>,
    ) -> Result<ChatSession> {
        let now = now_ts();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.map(str::to_string),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .write()
            .map_err(poisoned)?
            .push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str, user_id: &str) -> Result<Option<ChatSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .iter()
            .find(|s| s.id == id && s.user_id == user_id)
            .cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut owned: Vec<ChatSession> = sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.reverse();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn delete_session(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|s| !(s.id == id && s.user_id == user_id));
        let removed = sessions.len() != before;
        if removed {
            self.messages
                .write()
                .map_err(poisoned)?
                .retain(|m| m.session_id != id);
        }
        Ok(removed)
    }

    async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage> {
        let now = now_ts();
        {
            let mut sessions = self.sessions.write().map_err(poisoned)?;
            let session = sessions
                .iter_mut()
                .find(|s| s.id == session_id)
                .ok_or_else(|| anyhow!("session not found: {}", session_id))?;
            session.updated_at = now;
        }
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        };
        self.messages
            .write()
            .map_err(poisoned)?
            .push(message.clone());
        Ok(message)
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn create_project(&self, new: &NewProject) -> Result<Project> {
        let now = now_ts();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id.clone(),
            name: new.name.clone(),
            icon: new.icon.clone().unwrap_or_else(|| "📁".to_string()),
            description: new.description.clone(),
            system_prompt: new.system_prompt.clone(),
            created_at: now,
            updated_at: now,
        };
        self.projects
            .write()
            .map_err(poisoned)?
            .push(project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str, user_id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects
            .iter()
            .find(|p| p.id == id && p.user_id == user_id)
            .cloned())
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_project(
        &self,
        id: &str,
        user_id: &str,
        changes: &ProjectUpdate,
    ) -> Result<Option<Project>> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let Some(project) = projects
            .iter_mut()
            .find(|p| p.id == id && p.user_id == user_id)
        else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            project.name = name.clone();
        }
        if let Some(icon) = &changes.icon {
            project.icon = icon.clone();
        }
        if let Some(description) = &changes.description {
            project.description = Some(description.clone());
        }
        if let Some(prompt) = &changes.system_prompt {
            project.system_prompt = Some(prompt.clone());
        }
        project.updated_at = now_ts();
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let before = projects.len();
        projects.retain(|p| !(p.id == id && p.user_id == user_id));
        let removed = projects.len() != before;
        if removed {
            self.documents
                .write()
                .map_err(poisoned)?
                .retain(|d| d.project_id != id);
            self.chunks
                .write()
                .map_err(poisoned)?
                .retain(|c| c.project_id != id);
        }
        Ok(removed)
    }

    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        if chunks.iter().any(|c| c.document_id != doc.id) {
            bail!("chunk does not belong to document {}", doc.id);
        }
        self.documents.write().map_err(poisoned)?.push(doc.clone());
        self.chunks
            .write()
            .map_err(poisoned)?
            .extend(chunks.iter().cloned());
        Ok(())
    }

    async fn project_documents(&self, project_id: &str, user_id: &str) -> Result<Vec<Document>> {
        let documents = self.documents.read().map_err(poisoned)?;
        Ok(documents
            .iter()
            .filter(|d| d.project_id == project_id && d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_document(&self, id: &str, project_id: &str, user_id: &str) -> Result<bool> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let before = documents.len();
        documents.retain(|d| !(d.id == id && d.project_id == project_id && d.user_id == user_id));
        let removed = documents.len() != before;
        if removed {
            self.chunks
                .write()
                .map_err(poisoned)?
                .retain(|c| c.document_id != id);
        }
        Ok(removed)
    }

    async fn search_chunks(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_searches.load(Ordering::SeqCst) {
            bail!("search index unavailable");
        }

        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut matches: Vec<ChunkMatch> = chunks
            .iter()
            .filter(|c| c.project_id == project_id)
            .filter_map(|c| {
                let score = term_frequency(&c.content, &terms);
                (score > 0).then(|| ChunkMatch {
                    chunk_id: c.id.clone(),
                    document_id: c.document_id.clone(),
                    chunk_index: c.chunk_index,
                    content: c.content.clone(),
                    rank: score as f64,
                })
            })
            .collect();

        // Stable: equal ranks keep insertion order.
        matches.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        let mut keys = self.api_keys.write().map_err(poisoned)?;
        if keys.iter().any(|k| k.key_hash == key.key_hash) {
            bail!("duplicate api key hash");
        }
        keys.push(key.clone());
        Ok(())
    }

    async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let keys = self.api_keys.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .rev()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let keys = self.api_keys.read().map_err(poisoned)?;
        Ok(keys.iter().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn touch_api_key(&self, id: &str) -> Result<()> {
        let mut keys = self.api_keys.write().map_err(poisoned)?;
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.last_used = Some(now_ts());
        }
        Ok(())
    }

    async fn delete_api_key(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut keys = self.api_keys.write().map_err(poisoned)?;
        let before = keys.len();
        keys.retain(|k| !(k.id == id && k.user_id == user_id));
        Ok(keys.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    fn document(id: &str, project_id: &str, user_id: &str) -> Document {
        Document {
            id: id.to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            filename: format!("{}.txt", id),
            original_filename: "notes.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 0,
            extracted_text: String::new(),
            chunk_count: 0,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let store = InMemoryStore::new();
        let session = store.create_session("u1", "t", None).await.unwrap();
        store
            .append_message(&session.id, "u1", Role::User, "hi")
            .await
            .unwrap();
        store
            .append_message(&session.id, "u1", Role::Assistant, "hello")
            .await
            .unwrap();
        let msgs = store.session_messages(&session.id).await.unwrap();
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_frequency_with_stable_ties() {
        let store = InMemoryStore::new();
        let doc = document("d1", "p1", "u1");
        let mut chunks = Vec::new();
        for (i, text) in ["rust tips", "python rust rust", "rust again"].iter().enumerate() {
            let mut c = chunk_text("d1", "p1", text, 100).remove(0);
            c.chunk_index = i as i64;
            chunks.push(c);
        }
        store.insert_document(&doc, &chunks).await.unwrap();

        let results = store.search_chunks("p1", "Rust", 5).await.unwrap();
        let order: Vec<i64> = results.iter().map(|m| m.chunk_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(store.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_project() {
        let store = InMemoryStore::new();
        let doc = document("d1", "p1", "u1");
        let chunks = chunk_text("d1", "p1", "kubernetes cluster", 100);
        store.insert_document(&doc, &chunks).await.unwrap();

        assert!(store
            .search_chunks("p2", "kubernetes", 5)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.search_chunks("p1", "kubernetes", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_project_is_partial_and_user_scoped() {
        let store = InMemoryStore::new();
        let project = store
            .create_project(&NewProject {
                user_id: "u1".into(),
                name: "kb".into(),
                icon: None,
                description: Some("notes".into()),
                system_prompt: None,
            })
            .await
            .unwrap();

        let changes = ProjectUpdate {
            name: Some("renamed".into()),
            system_prompt: Some("Be terse.".into()),
            ..ProjectUpdate::default()
        };
        assert!(store
            .update_project(&project.id, "u2", &changes)
            .await
            .unwrap()
            .is_none());

        let updated = store
            .update_project(&project.id, "u1", &changes)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description.as_deref(), Some("notes"));
        assert_eq!(updated.effective_system_prompt(), Some("Be terse."));
        assert_eq!(
            store.get_project(&project.id, "u1").await.unwrap(),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let store = InMemoryStore::new();
        let project = store
            .create_project(&NewProject {
                user_id: "u1".into(),
                name: "kb".into(),
                icon: None,
                description: None,
                system_prompt: None,
            })
            .await
            .unwrap();
        let doc = document("d1", &project.id, "u1");
        let chunks = chunk_text("d1", &project.id, "alpha beta", 100);
        store.insert_document(&doc, &chunks).await.unwrap();

        assert!(!store.delete_project(&project.id, "someone-else").await.unwrap());
        assert!(store.delete_project(&project.id, "u1").await.unwrap());
        assert!(store
            .project_documents(&project.id, "u1")
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .search_chunks(&project.id, "alpha", 5)
            .await
            .unwrap()
            .is_empty());
    }
}
