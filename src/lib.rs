//! # ragchat
//!
//! A local-first chat relay for a self-hosted language model.
//!
//! ragchat stores conversations in SQLite, forwards them to an OpenAI-style
//! chat-completions backend, and can enrich each prompt with context from
//! the user's own documents (lexical FTS5 search) or from live web search.
//! It also serves an OpenAI-compatible endpoint gated by issued API keys.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────┐
//!  POST /api/chat │  ChatService   │ validate, session, persist
//!  ─────────────▶ └───────┬────────┘
//!                         ▼
//!                 ┌────────────────┐   ┌──────────────────┐
//!                 │PromptAssembler │──▶│ WebSearchGateway │ Tavily → Serper → DuckDuckGo
//!                 │                │   └──────────────────┘
//!                 │                │   ┌──────────────────┐
//!                 │                │──▶│ ContextRetriever │──▶ Store (SQLite FTS5)
//!                 └───────┬────────┘   └──────────────────┘
//!                         ▼
//!                 ┌────────────────┐
//!                 │InferenceClient │──▶ {backend_url}/chat/completions
//!                 └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init
//! ragchat project create "Handbook" --user alice --system-prompt "Answer from the handbook."
//! ragchat ingest --user alice --project <id> ./handbook.txt
//! ragchat chat --user alice --project <id> "How long is the refund window?"
//! ragchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Request-level error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Persistence trait with SQLite and in-memory backends |
//! | [`chunk`] | Fixed-window text chunking |
//! | [`ingest`] | Document upload into a project |
//! | [`retrieval`] | Knowledge-base context retrieval |
//! | [`websearch`] | Web search gateway and providers |
//! | [`assembler`] | Prompt assembly |
//! | [`inference`] | Model backend client |
//! | [`chat`] | Chat request flow |
//! | [`keys`] | API key lifecycle |
//! | [`server`] | HTTP server |
//! | [`cli`] | CLI command implementations |

pub mod assembler;
pub mod chat;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod keys;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod websearch;
