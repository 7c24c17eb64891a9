//! Web search gateway.
//!
//! Queries a fixed chain of [`SearchProvider`]s and returns the first
//! non-empty, normalized result list. The chain built from configuration is:
//!
//! 1. [`TavilyProvider`](tavily::TavilyProvider), when a Tavily key resolves.
//! 2. [`SerperProvider`](serper::SerperProvider), when a Serper key resolves.
//! 3. [`DuckDuckGoProvider`](duckduckgo::DuckDuckGoProvider), unless
//!    `search.scrape_fallback = false`.
//!
//! [`WebSearchGateway::search`] never fails: a provider error, timeout or
//! empty response is logged and the next provider is tried. When every
//! provider comes back empty the caller gets an empty list.

pub mod duckduckgo;
pub mod serper;
pub mod tavily;

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::config::{SearchConfig, MAX_WEB_RESULTS};
use crate::models::SearchResult;

pub const WEB_SEARCH_HEADER: &str = "Web search results:";

const MAX_TITLE_CHARS: usize = 200;
const MAX_SNIPPET_CHARS: usize = 500;

/// One external search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Raw results in the provider's own order. Errors are absorbed by the gateway.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

pub struct WebSearchGateway {
    providers: Vec<Box<dyn SearchProvider>>,
    max_results: usize,
}

impl WebSearchGateway {
    pub fn new(providers: Vec<Box<dyn SearchProvider>>, max_results: usize) -> Self {
        Self {
            providers,
            max_results: max_results.clamp(1, MAX_WEB_RESULTS),
        }
    }

    /// Build the provider chain from configuration.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut providers: Vec<Box<dyn SearchProvider>> = Vec::new();
        if let Some(key) = config.tavily_key() {
            providers.push(Box::new(tavily::TavilyProvider::new(
                client.clone(),
                &config.tavily_url,
                key,
            )));
        }
        if let Some(key) = config.serper_key() {
            providers.push(Box::new(serper::SerperProvider::new(
                client.clone(),
                &config.serper_url,
                key,
            )));
        }
        if config.scrape_fallback {
            providers.push(Box::new(duckduckgo::DuckDuckGoProvider::new(
                client,
                &config.duckduckgo_url,
            )));
        }

        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        tracing::info!(providers = ?names, "web search gateway ready");

        Ok(Self::new(providers, config.effective_max_results()))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        for provider in &self.providers {
            match provider.search(query, self.max_results).await {
                Ok(raw) => {
                    let results = normalize(raw, self.max_results);
                    if !results.is_empty() {
                        tracing::debug!(
                            provider = provider.name(),
                            count = results.len(),
                            "web search answered"
                        );
                        return results;
                    }
                    tracing::debug!(provider = provider.name(), "no web results, falling through");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "web search provider failed");
                }
            }
        }
        Vec::new()
    }
}

/// Sanitize every entry, drop those without a URL, keep provider order.
pub fn normalize(raw: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    raw.into_iter()
        .map(|r| SearchResult {
            title: truncate(&sanitize(&r.title), MAX_TITLE_CHARS),
            url: r.url.trim().to_string(),
            snippet: truncate(&sanitize(&r.snippet), MAX_SNIPPET_CHARS),
        })
        .filter(|r| !r.url.is_empty())
        .take(max_results)
        .collect()
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// Strip markup, decode common entities, collapse whitespace.
pub fn sanitize(text: &str) -> String {
    let stripped = tag_pattern().replace_all(text, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// Render results as numbered entries under the web search header.
pub fn render_web_block(results: &[SearchResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let entries = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}\nSource: {}", i + 1, r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(format!("{}\n{}", WEB_SEARCH_HEADER, entries))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider returning a canned answer and counting its calls.
    pub struct StubProvider {
        pub name: String,
        pub answer: std::result::Result<Vec<SearchResult>, String>,
        pub calls: Arc<AtomicUsize>,
    }

    impl StubProvider {
        pub fn ok(name: &str, results: Vec<SearchResult>) -> Self {
            Self {
                name: name.to_string(),
                answer: Ok(results),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                name: name.to_string(),
                answer: Err(format!("{} unreachable", name)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(anyhow::Error::msg)
        }
    }

    pub fn hit(n: usize) -> SearchResult {
        SearchResult {
            title: format!("Result {}", n),
            url: format!("https://example.com/{}", n),
            snippet: format!("Snippet {}", n),
        }
    }
}
