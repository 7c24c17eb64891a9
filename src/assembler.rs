//! Prompt assembly.
//!
//! Turns a session's history plus optional enrichment into the ordered list
//! of [`ConversationTurn`]s sent to the model:
//!
//! 1. History, in creation order, roles and content untouched.
//! 2. The bound project's system prompt, if non-blank, as the single leading
//!    `system` turn.
//! 3. Web search results (when enabled) and knowledge-base chunks (when a
//!    project is bound), fetched concurrently.
//! 4. Each non-empty result rendered as a [`ContextBlock`] and attached, web
//!    first, to the final `user` turn by [`attach_context`].
//!
//! The caller must append the new user message to the history before
//! assembling; context is never attached to any other role.

use std::sync::Arc;

use anyhow::Result;

use crate::models::{
    ChatMessage, ConversationTurn, KnowledgeSource, Project, Role, SearchResult,
};
use crate::retrieval::{ContextRetriever, KnowledgeContext};
use crate::store::Store;
use crate::websearch::{render_web_block, WebSearchGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    WebSearch,
    KnowledgeBase,
}

/// Retrieved material destined for the last user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub kind: ContextKind,
    pub text: String,
}

pub struct AssemblyInput<'a> {
    /// Session history, already ending with the new user message.
    pub history: &'a [ChatMessage],
    pub project: Option<&'a Project>,
    pub user_id: &'a str,
    /// Text used for web search and chunk retrieval.
    pub query: &'a str,
    pub web_search: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub turns: Vec<ConversationTurn>,
    /// Blocks actually attached, in attachment order.
    pub context: Vec<ContextBlock>,
    pub web_sources: Vec<SearchResult>,
    pub kb_sources: Vec<KnowledgeSource>,
}

pub struct PromptAssembler {
    store: Arc<dyn Store>,
    web: Arc<WebSearchGateway>,
    retriever: ContextRetriever,
}

impl PromptAssembler {
    pub fn new(
        store: Arc<dyn Store>,
        web: Arc<WebSearchGateway>,
        retriever: ContextRetriever,
    ) -> Self {
        Self {
            store,
            web,
            retriever,
        }
    }

    /// Build the conversation for one request.
    ///
    /// Web search never fails; a knowledge-base failure is returned as an error.
    pub async fn assemble(&self, input: AssemblyInput<'_>) -> Result<AssembledPrompt> {
        let mut turns: Vec<ConversationTurn> =
            input.history.iter().map(ConversationTurn::from).collect();

        apply_system_prompt(
            &mut turns,
            input.project.and_then(Project::effective_system_prompt),
        );

        let web_fut = async {
            if input.web_search {
                self.web.search(input.query).await
            } else {
                Vec::new()
            }
        };
        let kb_fut = async {
            match input.project {
                Some(project) => {
                    self.retriever
                        .retrieve(self.store.as_ref(), &project.id, input.user_id, input.query)
                        .await
                }
                None => Ok(KnowledgeContext::default()),
            }
        };
        let (web_sources, knowledge) = tokio::join!(web_fut, kb_fut);
        let knowledge = knowledge?;

        let mut blocks = Vec::new();
        if let Some(text) = render_web_block(&web_sources) {
            blocks.push(ContextBlock {
                kind: ContextKind::WebSearch,
                text,
            });
        }
        if let Some(text) = knowledge.render() {
            blocks.push(ContextBlock {
                kind: ContextKind::KnowledgeBase,
                text,
            });
        }

        let context = if attach_context(&mut turns, &blocks) {
            blocks
        } else {
            Vec::new()
        };

        tracing::debug!(
            turns = turns.len(),
            web_sources = web_sources.len(),
            kb_sources = knowledge.sources.len(),
            blocks = context.len(),
            "prompt assembled"
        );

        Ok(AssembledPrompt {
            turns,
            context,
            web_sources,
            kb_sources: knowledge.sources,
        })
    }
}

/// Make `prompt` the only system turn, at position 0.
///
/// With `None` the turns are left exactly as they are.
pub fn apply_system_prompt(turns: &mut Vec<ConversationTurn>, prompt: Option<&str>) {
    let Some(prompt) = prompt else {
        return;
    };
    let before = turns.len();
    turns.retain(|t| t.role != Role::System);
    if turns.len() != before {
        tracing::warn!(
            dropped = before - turns.len(),
            "history carried system turns, replaced by project prompt"
        );
    }
    turns.insert(0, ConversationTurn::system(prompt));
}

/// Append each block, in order, to the content of the last turn.
///
/// Returns false and leaves `turns` untouched when there is nothing to attach
/// or the last turn is not from the user.
pub fn attach_context(turns: &mut [ConversationTurn], blocks: &[ContextBlock]) -> bool {
    if blocks.is_empty() {
        return false;
    }
    match turns.last_mut() {
        Some(last) if last.role == Role::User => {
            for block in blocks {
                last.content.push_str("\n\n");
                last.content.push_str(&block.text);
            }
            true
        }
        _ => {
            tracing::warn!(
                blocks = blocks.len(),
                "last turn is not a user turn, dropping retrieved context"
            );
            false
        }
    }
}
