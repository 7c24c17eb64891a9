//! SQLite-backed [`Store`] implementation.
//!
//! Wraps a [`SqlitePool`] and maps each `Store` operation onto the schema
//! created by [`migrate::apply_schema`](crate::migrate::apply_schema). Chunk
//! search goes through the `document_chunks_fts` FTS5 table; its bm25 score is
//! negated so that a higher `rank` means a better match.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    ApiKey, ChatMessage, ChatSession, ChunkMatch, Document, DocumentChunk, NewProject, Project,
    ProjectUpdate, Role,
};

use super::{now_ts, query_terms, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Build an FTS5 MATCH expression from free text.
///
/// Each term is double-quoted so punctuation and FTS operators in the user's
/// message are matched literally; terms are OR-joined and bm25 does the ranking.
/// Returns `None` when the text has no searchable terms.
pub fn fts_match_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn session_from_row(row: &SqliteRow) -> ChatSession {
    ChatSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.get("role");
    Ok(ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        role: role.parse()?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

fn project_from_row(row: &SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        icon: row.get("icon"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        user_id: row.get("user_id"),
        filename: row.get("filename"),
        original_filename: row.get("original_filename"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        extracted_text: row.get("extracted_text"),
        chunk_count: row.get("chunk_count"),
        created_at: row.get("created_at"),
    }
}

fn api_key_from_row(row: &SqliteRow) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        key_hash: row.get("key_hash"),
        key_suffix: row.get("key_suffix"),
        last_used: row.get("last_used"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for SqliteStore {
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

        sqlx::query(
            "INSERT INTO chat_sessions (id, user_id, project_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.project_id)
        .bind(&session.title)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_session(&self, id: &str, user_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query(
            "SELECT id, user_id, project_id, title, created_at, updated_at FROM chat_sessions WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query(
            "SELECT id, user_id, project_id, title, created_at, updated_at FROM chat_sessions WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn delete_session(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM chat_sessions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted > 0 {
            sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage> {
        let now = now_ts();
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, user_id, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, session_id, user_id, role, content, created_at FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
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

        sqlx::query(
            r#"
            INSERT INTO projects (id, user_id, name, icon, description, system_prompt, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.user_id)
        .bind(&project.name)
        .bind(&project.icon)
        .bind(&project.description)
        .bind(&project.system_prompt)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(project)
    }

    async fn get_project(&self, id: &str, user_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, icon, description, system_prompt, created_at, updated_at FROM projects WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(project_from_row))
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, icon, description, system_prompt, created_at, updated_at FROM projects WHERE user_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn update_project(
        &self,
        id: &str,
        user_id: &str,
        changes: &ProjectUpdate,
    ) -> Result<Option<Project>> {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                name = COALESCE(?, name),
                icon = COALESCE(?, icon),
                description = COALESCE(?, description),
                system_prompt = COALESCE(?, system_prompt),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&changes.name)
        .bind(&changes.icon)
        .bind(&changes.description)
        .bind(&changes.system_prompt)
        .bind(now_ts())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_project(id, user_id).await
    }

    async fn delete_project(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<String> =
            sqlx::query_scalar("SELECT id FROM projects WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        if owned.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM document_chunks_fts WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_chunks WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE chat_sessions SET project_id = NULL WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, user_id, filename, original_filename, file_type,
                                   file_size, extracted_text, chunk_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.user_id)
        .bind(&doc.filename)
        .bind(&doc.original_filename)
        .bind(&doc.file_type)
        .bind(doc.file_size)
        .bind(&doc.extracted_text)
        .bind(doc.chunk_count)
        .bind(doc.created_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO document_chunks (id, document_id, project_id, chunk_index, content, token_count) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.project_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO document_chunks_fts (chunk_id, document_id, project_id, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.project_id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn project_documents(&self, project_id: &str, user_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, user_id, filename, original_filename, file_type,
                   file_size, extracted_text, chunk_count, created_at
            FROM documents
            WHERE project_id = ? AND user_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn delete_document(&self, id: &str, project_id: &str, user_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted =
            sqlx::query("DELETE FROM documents WHERE id = ? AND project_id = ? AND user_id = ?")
                .bind(id)
                .bind(project_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        if deleted > 0 {
            sqlx::query("DELETE FROM document_chunks_fts WHERE document_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn search_chunks(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let expr = match fts_match_expression(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.content,
                   -bm25(document_chunks_fts) AS score
            FROM document_chunks_fts
            JOIN document_chunks c ON c.id = document_chunks_fts.chunk_id
            WHERE document_chunks_fts MATCH ?
              AND document_chunks_fts.project_id = ?
            ORDER BY score DESC, c.rowid ASC
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChunkMatch {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                rank: row.get("score"),
            })
            .collect())
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, name, key_hash, key_suffix, last_used, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(&key.user_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_suffix)
        .bind(key.last_used)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, key_hash, key_suffix, last_used, created_at FROM api_keys WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(api_key_from_row).collect())
    }

    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, key_hash, key_suffix, last_used, created_at FROM api_keys WHERE key_hash = ?",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(api_key_from_row))
    }

    async fn touch_api_key(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used = ? WHERE id = ?")
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_api_key(&self, id: &str, user_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}
