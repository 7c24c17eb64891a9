//! Client for the OpenAI-style chat-completions backend.
//!
//! Two entry points share one `reqwest::Client`:
//!
//! - [`InferenceClient::complete`] sends an assembled conversation with the
//!   configured model, temperature and token cap (each overridable) and
//!   returns the first choice's content.
//! - [`InferenceClient::forward`] posts an already-shaped JSON body and hands
//!   back the backend's JSON untouched; it backs `/v1/chat/completions`.
//!
//! A non-success status is a hard failure carrying the backend's status text
//! and body. Nothing is retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::InferenceConfig;
use crate::models::ConversationTurn;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference backend error: {status_text} - {body}")]
    Status {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("inference backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference backend returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Per-request generation settings. `None` falls back to configuration.
#[derive(Debug, Clone, Default)]
pub struct GenerationOverrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct InferenceClient {
    client: reqwest::Client,
    endpoint: String,
    default_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: format!(
                "{}/chat/completions",
                config.backend_url.trim_end_matches('/')
            ),
            default_model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub async fn complete(
        &self,
        turns: &[ConversationTurn],
        overrides: &GenerationOverrides,
    ) -> Result<Completion, InferenceError> {
        let body = CompletionRequest {
            model: overrides.model.as_deref().unwrap_or(&self.default_model),
            messages: turns,
            temperature: overrides.temperature.unwrap_or(self.temperature),
            max_tokens: overrides.max_tokens.unwrap_or(self.max_tokens),
            stream: false,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            model = body.model,
            turns = turns.len(),
            "sending completion request"
        );

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let resp = check_status(resp).await?;

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::MalformedResponse("no choices in response".into()))?
            .message
            .content
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage: parsed.usage,
            model: parsed.model,
        })
    }

    /// Post a prepared request body and return the backend's JSON as-is.
    pub async fn forward(&self, body: &Value) -> Result<Value, InferenceError> {
        let resp = self.client.post(&self.endpoint).json(body).send().await?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(InferenceError::Status {
        status: status.as_u16(),
        status_text: status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string()),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> InferenceConfig {
        InferenceConfig {
            backend_url: url.to_string(),
            default_model: "local-model".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: Some(5),
        }
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = InferenceClient::new(&config("http://127.0.0.1:1234/v1/")).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:1234/v1/chat/completions");
    }

    #[test]
    fn test_request_body_shape() {
        let turns = vec![
            ConversationTurn::system("Be terse."),
            ConversationTurn::user("hello"),
        ];
        let body = CompletionRequest {
            model: "m",
            messages: &turns,
            temperature: 0.5,
            max_tokens: 10,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 10);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#)
                .unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_status_error_mentions_text_and_body() {
        let err = InferenceError::Status {
            status: 500,
            status_text: "Internal Server Error".into(),
            body: "CUDA out of memory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Internal Server Error"));
        assert!(msg.contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Port 9 (discard) is essentially never served locally.
        let client = InferenceClient::new(&config("http://127.0.0.1:9/v1")).unwrap();
        let err = client
            .complete(&[ConversationTurn::user("hi")], &GenerationOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Transport(_)));
    }
}
