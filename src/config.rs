//! TOML configuration.
//!
//! Every tunable of the chat relay lives in one file. Search-provider
//! credentials may also come from the environment (`TAVILY_API_KEY`,
//! `SERPER_API_KEY`); a provider whose credential resolves to nothing is
//! disabled when the [`WebSearchGateway`](crate::websearch::WebSearchGateway)
//! is built, never checked ad hoc at call sites.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Connection and generation defaults for the model-serving backend.
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Base URL of the OpenAI-style API, e.g. `http://127.0.0.1:1234/v1`.
    pub backend_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout. `None` keeps the HTTP client's default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_model() -> String {
    "local-model".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub tavily_key: Option<String>,
    #[serde(default)]
    pub serper_key: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Enables the uncredentialed HTML-scraping fallback.
    #[serde(default = "default_true")]
    pub scrape_fallback: bool,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_tavily_url")]
    pub tavily_url: String,
    #[serde(default = "default_serper_url")]
    pub serper_url: String,
    #[serde(default = "default_duckduckgo_url")]
    pub duckduckgo_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_key: None,
            serper_key: None,
            max_results: default_max_results(),
            scrape_fallback: true,
            timeout_secs: default_search_timeout(),
            tavily_url: default_tavily_url(),
            serper_url: default_serper_url(),
            duckduckgo_url: default_duckduckgo_url(),
        }
    }
}

/// Hard ceiling on web results handed upstream.
pub const MAX_WEB_RESULTS: usize = 5;

fn default_max_results() -> usize {
    MAX_WEB_RESULTS
}
fn default_true() -> bool {
    true
}
fn default_search_timeout() -> u64 {
    10
}
fn default_tavily_url() -> String {
    "https://api.tavily.com".to_string()
}
fn default_serper_url() -> String {
    "https://google.serper.dev".to_string()
}
fn default_duckduckgo_url() -> String {
    "https://html.duckduckgo.com".to_string()
}

impl SearchConfig {
    /// Tavily credential from config, else `TAVILY_API_KEY`. Blank counts as absent.
    pub fn tavily_key(&self) -> Option<String> {
        resolve_credential(self.tavily_key.as_deref(), "TAVILY_API_KEY")
    }

    /// Serper credential from config, else `SERPER_API_KEY`. Blank counts as absent.
    pub fn serper_key(&self) -> Option<String> {
        resolve_credential(self.serper_key.as_deref(), "SERPER_API_KEY")
    }

    pub fn effective_max_results(&self) -> usize {
        self.max_results.clamp(1, MAX_WEB_RESULTS)
    }
}

fn resolve_credential(configured: Option<&str>, env_var: &str) -> Option<String> {
    let non_blank = |k: &str| Some(k.trim().to_string()).filter(|k| !k.is_empty());
    configured
        .and_then(non_blank)
        .or_else(|| std::env::var(env_var).ok().as_deref().and_then(non_blank))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_preview_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.inference.backend_url.trim().is_empty() {
        anyhow::bail!("inference.backend_url must not be empty");
    }
    if !(0.0..=2.0).contains(&config.inference.temperature) {
        anyhow::bail!("inference.temperature must be in [0.0, 2.0]");
    }
    if config.inference.max_tokens == 0 {
        anyhow::bail!("inference.max_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }

    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/ragchat.sqlite"

[server]
bind = "127.0.0.1:3000"

[inference]
backend_url = "http://127.0.0.1:1234/v1"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.inference.default_model, "local-model");
        assert!((config.inference.temperature - 0.7).abs() < 1e-6);
        assert_eq!(config.inference.max_tokens, 2000);
        assert!(config.inference.timeout_secs.is_none());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.preview_chars, 100);
        assert_eq!(config.chunking.chunk_chars, 500);
        assert_eq!(config.search.max_results, 5);
        assert!(config.search.scrape_fallback);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let content = MINIMAL.replace(
            "backend_url = \"http://127.0.0.1:1234/v1\"",
            "backend_url = \"http://127.0.0.1:1234/v1\"\nmax_tokens = 0",
        );
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let content = MINIMAL.replace(
            "backend_url = \"http://127.0.0.1:1234/v1\"",
            "backend_url = \"http://127.0.0.1:1234/v1\"\ntemperature = 3.5",
        );
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_rejects_missing_inference_section() {
        let content = "[db]\npath = \"x\"\n[server]\nbind = \"127.0.0.1:0\"\n";
        assert!(parse_config(content).is_err());
    }

    #[test]
    fn test_max_results_is_capped() {
        let search = SearchConfig {
            max_results: 50,
            ..SearchConfig::default()
        };
        assert_eq!(search.effective_max_results(), MAX_WEB_RESULTS);
    }

    #[test]
    fn test_blank_credential_counts_as_absent() {
        assert_eq!(
            resolve_credential(Some("   "), "RAGCHAT_TEST_UNSET_CREDENTIAL"),
            None
        );
        assert_eq!(
            resolve_credential(Some(" k-1 "), "RAGCHAT_TEST_UNSET_CREDENTIAL"),
            Some("k-1".to_string())
        );
    }

    #[test]
    fn test_blank_credential_falls_back_to_env() {
        std::env::set_var("RAGCHAT_TEST_BLANK_FALLBACK", " env-key ");
        assert_eq!(
            resolve_credential(Some(""), "RAGCHAT_TEST_BLANK_FALLBACK"),
            Some("env-key".to_string())
        );
        assert_eq!(
            resolve_credential(Some("cfg-key"), "RAGCHAT_TEST_BLANK_FALLBACK"),
            Some("cfg-key".to_string())
        );
        std::env::remove_var("RAGCHAT_TEST_BLANK_FALLBACK");
    }
}
