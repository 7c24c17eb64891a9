//! Context retrieval over a project's knowledge base.
//!
//! Given a project and the user's message, [`ContextRetriever::retrieve`] asks
//! the [`Store`] for the highest-ranked chunks and pairs them with provenance
//! records for the caller to cite.
//!
//! # Contract
//!
//! - A project with no documents is never searched.
//! - Chunks whose parent document has vanished keep their text in the
//!   rendered block but get no provenance entry.
//! - Store failures propagate. A knowledge base that silently returns nothing
//!   would be worse than a failed request.

use std::collections::HashMap;

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::models::{ChunkMatch, KnowledgeSource};
use crate::store::Store;

pub const KNOWLEDGE_BASE_HEADER: &str = "Relevant information from knowledge base:";

/// Ranked chunks plus the provenance list derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeContext {
    pub matches: Vec<ChunkMatch>,
    pub sources: Vec<KnowledgeSource>,
}

impl KnowledgeContext {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// The text block appended to the user's turn, or `None` when nothing matched.
    pub fn render(&self) -> Option<String> {
        render_knowledge_block(&self.matches)
    }
}

#[derive(Debug, Clone)]
pub struct ContextRetriever {
    top_k: usize,
    preview_chars: usize,
}

impl ContextRetriever {
    pub fn new(top_k: usize, preview_chars: usize) -> Self {
        Self {
            top_k: top_k.max(1),
            preview_chars,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.top_k, config.preview_chars)
    }

    pub async fn retrieve(
        &self,
        store: &dyn Store,
        project_id: &str,
        user_id: &str,
        query: &str,
    ) -> Result<KnowledgeContext> {
        let documents = store.project_documents(project_id, user_id).await?;
        if documents.is_empty() {
            tracing::debug!(project_id, "project has no documents, skipping retrieval");
            return Ok(KnowledgeContext::default());
        }

        let matches = store.search_chunks(project_id, query, self.top_k).await?;

        let filenames: HashMap<&str, &str> = documents
            .iter()
            .map(|d| (d.id.as_str(), d.original_filename.as_str()))
            .collect();

        let sources = matches
            .iter()
            .filter_map(|m| {
                let filename = filenames.get(m.document_id.as_str())?;
                Some(KnowledgeSource {
                    document_id: m.document_id.clone(),
                    filename: filename.to_string(),
                    content_preview: preview(&m.content, self.preview_chars),
                    rank: m.rank,
                })
            })
            .collect::<Vec<_>>();

        if sources.len() < matches.len() {
            tracing::debug!(
                project_id,
                omitted = matches.len() - sources.len(),
                "chunks without a resolvable document left out of provenance"
            );
        }

        Ok(KnowledgeContext { matches, sources })
    }
}

/// Render chunks as `[Source i]: {content}` entries under the knowledge-base header.
pub fn render_knowledge_block(matches: &[ChunkMatch]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let entries = matches
        .iter()
        .enumerate()
        .map(|(i, m)| format!("[Source {}]: {}", i + 1, m.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(format!("{}\n{}", KNOWLEDGE_BASE_HEADER, entries))
}

/// First `max_chars` characters followed by an ellipsis.
pub fn preview(content: &str, max_chars: usize) -> String {
    let head: String = content.chars().take(max_chars).collect();
    format!("{}...", head)
}
