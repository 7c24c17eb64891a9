//! Core data models used throughout ragchat.
//!
//! Persisted entities (projects, documents, chunks, sessions, messages, API
//! keys) plus the ephemeral records produced per request: conversation turns
//! sent to inference and the provenance lists surfaced back to the caller.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => bail!("unknown role: '{}'", other),
        }
    }
}

/// One role-tagged message in the list submitted to the inference backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Optional grouping of documents with a leading system prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub icon: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// The system prompt, if set to something other than whitespace.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }
}

/// Fields supplied when creating a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Partial edit of a project. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

/// An uploaded file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    /// Unique stored name, `{uuid}.{ext}`.
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    #[serde(skip_serializing)]
    pub extracted_text: String,
    pub chunk_count: i64,
    pub created_at: i64,
}

/// A fixed-size window of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub project_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
}

/// A chunk returned by lexical search. Higher `rank` = more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub rank: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

impl From<&ChatMessage> for ConversationTurn {
    fn from(msg: &ChatMessage) -> Self {
        ConversationTurn::new(msg.role, msg.content.clone())
    }
}

/// Stored API key. Only the hash and the last four characters are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_hash: String,
    pub key_suffix: String,
    pub last_used: Option<i64>,
    pub created_at: i64,
}

/// A normalized web search hit. Provenance only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Knowledge-base provenance surfaced alongside the assistant's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSource {
    pub document_id: String,
    pub filename: String,
    pub content_preview: String,
    pub rank: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_turn_serializes_openai_shape() {
        let turn = ConversationTurn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_blank_system_prompt_is_ignored() {
        let mut project = Project {
            id: "p1".into(),
            user_id: "u1".into(),
            name: "Notes".into(),
            icon: "📁".into(),
            description: None,
            system_prompt: Some("  \n".into()),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(project.effective_system_prompt(), None);
        project.system_prompt = Some("Be terse.".into());
        assert_eq!(project.effective_system_prompt(), Some("Be terse."));
    }

    #[test]
    fn test_knowledge_source_uses_camel_case() {
        let src = KnowledgeSource {
            document_id: "d1".into(),
            filename: "notes.txt".into(),
            content_preview: "abc...".into(),
            rank: 0.8,
        };
        let json = serde_json::to_value(&src).unwrap();
        assert_eq!(json["documentId"], "d1");
        assert_eq!(json["contentPreview"], "abc...");
    }
}
