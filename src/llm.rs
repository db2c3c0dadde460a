//! Anthropic Messages API client used for generated notification text.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MonitorError;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("missing api key: ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,
}

impl LlmError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<LlmError> for MonitorError {
    fn from(value: LlmError) -> Self {
        MonitorError::GenerationFailure {
            retryable: value.should_retry(),
            reason: value.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn from_env(model: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        Self::new(api_key, model, timeout)
    }

    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("habit-decline-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single attempt; callers decide whether to retry.
    pub async fn ask(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 1024,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            system,
        };

        let res = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response = match res.status() {
            s if s.is_success() => res
                .json::<MessagesResponse>()
                .await
                .map_err(|e| LlmError::Malformed(e.to_string()))?,
            StatusCode::UNAUTHORIZED => return Err(LlmError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => return Err(LlmError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                return Err(LlmError::Http { status, body });
            }
        };

        response
            .text()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Malformed("no text content in response".to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

/// Strips a markdown code fence if the model wrapped its JSON in one.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        let content_start = text[content_start..]
            .find('\n')
            .map(|i| content_start + i + 1)
            .unwrap_or(content_start);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let reply = "Berikut hasilnya:\n```json\n{\"shouldNotify\": true}\n```";
        assert_eq!(extract_json(reply), "{\"shouldNotify\": true}");

        let generic = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(generic), "{\"a\": 1}");
    }

    #[test]
    fn extracts_bare_object_from_prose() {
        let reply = "Jawaban: {\"shouldNotify\": false} selesai";
        assert_eq!(extract_json(reply), "{\"shouldNotify\": false}");
    }

    #[test]
    fn transient_errors_retry() {
        assert!(LlmError::Timeout.should_retry());
        assert!(LlmError::RateLimited.should_retry());
        assert!(LlmError::Http {
            status: 503,
            body: String::new()
        }
        .should_retry());
        assert!(!LlmError::InvalidApiKey.should_retry());
        assert!(!LlmError::Malformed("x".to_string()).should_retry());
    }

    #[test]
    fn converts_into_generation_failure() {
        let err: MonitorError = LlmError::RateLimited.into();
        assert!(err.is_retryable());
        let err: MonitorError = LlmError::MissingApiKey.into();
        assert!(matches!(
            err,
            MonitorError::GenerationFailure {
                retryable: false,
                ..
            }
        ));
    }
}
