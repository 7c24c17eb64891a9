//! Storage abstraction for ragchat.
//!
//! The [`Store`] trait is the persistence collaborator the chat pipeline talks
//! to: sessions and messages, projects and their documents, lexical search
//! over document chunks, and API keys. Two backends implement it:
//!
//! - [`SqliteStore`](sqlite::SqliteStore): the production backend, with an
//!   FTS5 index ranked by bm25.
//! - [`InMemoryStore`](memory::InMemoryStore): `RwLock`-guarded collections
//!   with a term-frequency rank, for tests.
//!
//! Every read of user-owned data is scoped by `user_id`. Implementations must
//! be `Send + Sync` to sit behind an `Arc` in the HTTP server state.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ApiKey, ChatMessage, ChatSession, ChunkMatch, Document, DocumentChunk, NewProject, Project,
    ProjectUpdate, Role,
};

/// Abstract storage backend.
///
/// | Group | Methods |
/// |-------|---------|
/// | Sessions | [`create_session`](Store::create_session), [`get_session`](Store::get_session), [`list_sessions`](Store::list_sessions), [`delete_session`](Store::delete_session) |
/// | Messages | [`append_message`](Store::append_message), [`session_messages`](Store::session_messages) |
/// | Projects | [`create_project`](Store::create_project), [`get_project`](Store::get_project), [`list_projects`](Store::list_projects), [`update_project`](Store::update_project), [`delete_project`](Store::delete_project) |
/// | Documents | [`insert_document`](Store::insert_document), [`project_documents`](Store::project_documents), [`delete_document`](Store::delete_document), [`search_chunks`](Store::search_chunks) |
/// | API keys | [`insert_api_key`](Store::insert_api_key), [`list_api_keys`](Store::list_api_keys), [`find_api_key`](Store::find_api_key), [`touch_api_key`](Store::touch_api_key), [`delete_api_key`](Store::delete_api_key) |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        title: &str,
        project_id: Option<&str>,
    ) -> Result<ChatSession>;

    async fn get_session(&self, id: &str, user_id: &str) -> Result<Option<ChatSession>>;

    /// Sessions for a user, most recently active first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>>;

    /// Deletes the session and its messages. Returns false if nothing matched.
    async fn delete_session(&self, id: &str, user_id: &str) -> Result<bool>;

    /// Append a message and bump the session's `updated_at`.
    async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage>;

    /// All messages of a session in creation order.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    async fn create_project(&self, project: &NewProject) -> Result<Project>;

    async fn get_project(&self, id: &str, user_id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>>;

    /// Apply the fields set in `changes` and bump `updated_at`.
    /// Returns `None` if the user has no such project.
    async fn update_project(
        &self,
        id: &str,
        user_id: &str,
        changes: &ProjectUpdate,
    ) -> Result<Option<Project>>;

    /// Deletes the project with its documents and chunks.
    async fn delete_project(&self, id: &str, user_id: &str) -> Result<bool>;

    /// Store a document together with its chunks, atomically.
    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()>;

    /// Documents of a project in upload order.
    async fn project_documents(&self, project_id: &str, user_id: &str) -> Result<Vec<Document>>;

    /// Deletes the document and its chunks.
    async fn delete_document(&self, id: &str, project_id: &str, user_id: &str) -> Result<bool>;

    /// Lexical search over one project's chunks.
    ///
    /// Results are ordered by `rank` descending; equal ranks keep insertion
    /// order (earlier chunk first).
    async fn search_chunks(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>>;

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()>;

    /// Keys of a user, newest first.
    async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>>;

    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Record a successful use.
    async fn touch_api_key(&self, id: &str) -> Result<()>;

    async fn delete_api_key(&self, id: &str, user_id: &str) -> Result<bool>;
}

/// Lowercased alphanumeric terms of a free-text query.
///
/// Shared by both backends so they agree on what counts as a match.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
