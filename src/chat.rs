//! The chat request flow.
//!
//! [`ChatService::handle`] runs one request end to end:
//!
//! 1. Validate `message` and `userId`. Nothing is written on failure.
//! 2. Resolve the bound project, if any, for this user.
//! 3. Resolve the session, or open a new one titled after the message.
//! 4. Persist the user turn, reload the history, assemble the prompt.
//! 5. Call the model, persist the assistant turn, return it with provenance.
//!
//! A failure after step 4 leaves the user turn persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assembler::{AssemblyInput, PromptAssembler};
use crate::error::{ChatError, Result};
use crate::inference::{GenerationOverrides, InferenceClient};
use crate::models::{KnowledgeSource, Role, SearchResult};
use crate::store::Store;

const TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub web_search_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    /// Present whenever a project was bound, even if empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<KnowledgeSource>>,
    /// Present whenever web search was enabled, even if empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_sources: Option<Vec<SearchResult>>,
}

pub struct ChatService {
    store: Arc<dyn Store>,
    assembler: PromptAssembler,
    inference: Arc<InferenceClient>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        assembler: PromptAssembler,
        inference: Arc<InferenceClient>,
    ) -> Self {
        Self {
            store,
            assembler,
            inference,
        }
    }

    pub async fn handle(&self, req: ChatRequest) -> Result<ChatResponse> {
        let message = non_blank(req.message.as_deref());
        let user_id = non_blank(req.user_id.as_deref());
        let (message, user_id) = match (message, user_id) {
            (Some(m), Some(u)) => (m, u),
            _ => return Err(ChatError::validation("Message and userId are required")),
        };
        let web_search = req.web_search_enabled.unwrap_or(false);

        let project = match non_blank(req.project_id.as_deref()) {
            Some(project_id) => Some(
                self.store
                    .get_project(project_id, user_id)
                    .await?
                    .ok_or_else(|| ChatError::not_found("Project not found"))?,
            ),
            None => None,
        };

        let session = match non_blank(req.session_id.as_deref()) {
            Some(session_id) => self
                .store
                .get_session(session_id, user_id)
                .await?
                .ok_or_else(|| ChatError::not_found("Session not found"))?,
            None => {
                self.store
                    .create_session(
                        user_id,
                        &session_title(message),
                        project.as_ref().map(|p| p.id.as_str()),
                    )
                    .await?
            }
        };

        self.store
            .append_message(&session.id, user_id, Role::User, message)
            .await?;
        let history = self.store.session_messages(&session.id).await?;

        let prompt = self
            .assembler
            .assemble(AssemblyInput {
                history: &history,
                project: project.as_ref(),
                user_id,
                query: message,
                web_search,
            })
            .await?;

        let completion = self
            .inference
            .complete(&prompt.turns, &GenerationOverrides::default())
            .await
            .map_err(|e| {
                tracing::error!(session_id = %session.id, error = %e, "inference failed");
                ChatError::from(e)
            })?;

        self.store
            .append_message(&session.id, user_id, Role::Assistant, &completion.content)
            .await?;

        tracing::info!(
            session_id = %session.id,
            project = project.is_some(),
            web_search,
            "chat turn completed"
        );

        Ok(ChatResponse {
            message: completion.content,
            session_id: session.id,
            sources: project.map(|_| prompt.kb_sources),
            web_sources: web_search.then_some(prompt.web_sources),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// First 50 characters of the opening message, then an ellipsis.
pub fn session_title(message: &str) -> String {
    let head: String = message.chars().take(TITLE_CHARS).collect();
    format!("{}...", head)
}
