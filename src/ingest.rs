//! Document upload into a project's knowledge base.
//!
//! Flow: extension check → project ownership check → text extraction →
//! chunking → one atomic store write (document, chunks, FTS rows).
//!
//! Only plain text is extracted today. PDF and Word uploads are accepted and
//! stored with a placeholder body so they show up in the project listing.

use std::path::Path;

use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::error::{ChatError, Result};
use crate::models::Document;
use crate::store::{now_ts, Store};

pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "pdf", "doc", "docx"];

/// A file handed in for ingestion.
#[derive(Debug, Clone)]
pub struct Upload {
    pub user_id: String,
    pub project_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Lowercased extension if it is one we accept.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

pub fn extract_text(ext: &str, original_filename: &str, bytes: &[u8]) -> String {
    match ext {
        "txt" => String::from_utf8_lossy(bytes).into_owned(),
        _ => format!(
            "[Document content extraction pending - {}]",
            original_filename
        ),
    }
}

pub async fn ingest_document(
    store: &dyn Store,
    chunk_chars: usize,
    upload: Upload,
) -> Result<Document> {
    if upload.user_id.trim().is_empty() || upload.filename.trim().is_empty() {
        return Err(ChatError::validation("userId and filename are required"));
    }
    let ext = allowed_extension(&upload.filename).ok_or_else(|| {
        ChatError::validation(format!(
            "Unsupported file type. Allowed: {}",
            ALLOWED_EXTENSIONS
                .iter()
                .map(|e| format!(".{}", e))
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    store
        .get_project(&upload.project_id, &upload.user_id)
        .await?
        .ok_or_else(|| ChatError::not_found("Project not found"))?;

    let text = extract_text(&ext, &upload.filename, &upload.bytes);
    let doc_id = Uuid::new_v4().to_string();
    let chunks = chunk_text(&doc_id, &upload.project_id, &text, chunk_chars);

    let doc = Document {
        filename: format!("{}.{}", doc_id, ext),
        id: doc_id,
        project_id: upload.project_id,
        user_id: upload.user_id,
        original_filename: upload.filename,
        file_type: ext,
        file_size: upload.bytes.len() as i64,
        extracted_text: text,
        chunk_count: chunks.len() as i64,
        created_at: now_ts(),
    };

    store.insert_document(&doc, &chunks).await?;
    tracing::info!(
        document_id = %doc.id,
        project_id = %doc.project_id,
        chunks = doc.chunk_count,
        "document ingested"
    );

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProject;
    use crate::store::memory::InMemoryStore;

    async fn project_id(store: &InMemoryStore) -> String {
        store
            .create_project(&NewProject {
                user_id: "u1".into(),
                name: "Docs".into(),
                icon: None,
                description: None,
                system_prompt: None,
            })
            .await
            .unwrap()
            .id
    }

    fn upload(project_id: &str, filename: &str, bytes: &[u8]) -> Upload {
        Upload {
            user_id: "u1".into(),
            project_id: project_id.into(),
            filename: filename.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_allowed_extensions() {
        assert_eq!(allowed_extension("notes.TXT").as_deref(), Some("txt"));
        assert_eq!(allowed_extension("report.docx").as_deref(), Some("docx"));
        assert!(allowed_extension("image.png").is_none());
        assert!(allowed_extension("README").is_none());
    }

    #[test]
    fn test_non_text_gets_placeholder() {
        assert_eq!(
            extract_text("pdf", "paper.pdf", b"%PDF-1.7"),
            "[Document content extraction pending - paper.pdf]"
        );
    }

    #[tokio::test]
    async fn test_text_upload_is_chunked() {
        let store = InMemoryStore::new();
        let pid = project_id(&store).await;
        let body = "a".repeat(1100);

        let doc = ingest_document(&store, 500, upload(&pid, "notes.txt", body.as_bytes()))
            .await
            .unwrap();

        assert_eq!(doc.chunk_count, 3);
        assert_eq!(doc.file_size, 1100);
        assert_eq!(doc.filename, format!("{}.txt", doc.id));
        assert_eq!(doc.original_filename, "notes.txt");
        let docs = store.project_documents(&pid, "u1").await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_type() {
        let store = InMemoryStore::new();
        let pid = project_id(&store).await;
        let err = ingest_document(&store, 500, upload(&pid, "photo.jpg", b"\xff\xd8"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(store.project_documents(&pid, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_foreign_project() {
        let store = InMemoryStore::new();
        let pid = project_id(&store).await;
        let mut up = upload(&pid, "notes.txt", b"hello");
        up.user_id = "u2".into();
        let err = ingest_document(&store, 500, up).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }
}
