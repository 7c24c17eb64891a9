//! DuckDuckGo HTML results page scraper.
//!
//! Needs no credential. The results page markup drifts over time, so parsing
//! tries a primary pattern (title anchor followed by its snippet anchor) and,
//! when that finds nothing, an alternate one that collects titles and
//! snippets separately and pairs them by position.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;

use super::SearchProvider;
use crate::models::SearchResult;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let url = format!("{}/html/?q={}", self.base_url, urlencoding::encode(query));
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("duckduckgo returned {}", resp.status());
        }

        let html = resp.text().await?;
        let mut results = parse_results(&html);
        results.truncate(max_results);
        Ok(results)
    }
}

struct Patterns {
    primary: Regex,
    alt_title: Regex,
    alt_snippet: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        primary: Regex::new(
            r#"(?s)<a class="result__a" href="([^"]+)"[^>]*>(.*?)</a>.*?<a class="result__snippet"[^>]*>(.*?)</a>"#,
        )
        .expect("static regex"),
        alt_title: Regex::new(r#"(?s)<a rel="nofollow" class="result__a" href="([^"]+)">(.*?)</a>"#)
            .expect("static regex"),
        alt_snippet: Regex::new(r#"(?s)<a class="result__snippet"[^>]*>(.*?)</a>"#)
            .expect("static regex"),
    })
}

/// Extract results from a results page. Title and snippet keep their markup;
/// the gateway sanitizes them.
pub fn parse_results(html: &str) -> Vec<SearchResult> {
    let p = patterns();

    let primary: Vec<SearchResult> = p
        .primary
        .captures_iter(html)
        .filter_map(|c| result_from(&c[1], &c[2], &c[3]))
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    let snippets: Vec<&str> = p
        .alt_snippet
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    p.alt_title
        .captures_iter(html)
        .enumerate()
        .filter_map(|(i, c)| {
            let snippet = snippets.get(i).copied().unwrap_or("");
            result_from(&c[1], &c[2], snippet)
        })
        .collect()
}

fn result_from(href: &str, title: &str, snippet: &str) -> Option<SearchResult> {
    let url = resolve_href(href);
    if url.is_empty() || url.contains("duckduckgo.com") {
        return None;
    }
    Some(SearchResult {
        title: title.to_string(),
        url,
        snippet: snippet.to_string(),
    })
}

/// Unwrap `/l/?uddg=<encoded>` redirect links to the target URL.
pub fn resolve_href(href: &str) -> String {
    let href = href.replace("&amp;", "&");
    if let Some(start) = href.find("uddg=") {
        let encoded = &href[start + "uddg=".len()..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if href.starts_with("//") {
        return format!("https:{}", href);
    }
    href
}
