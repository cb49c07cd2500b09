use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("text completion is not configured")]
    Disabled,
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("invalid response format")]
    InvalidResponse,
}

impl From<CompletionError> for ApiError {
    fn from(e: CompletionError) -> Self {
        match e {
            CompletionError::Disabled => ApiError::Unavailable("COMPLETION_DISABLED", e.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no completion endpoint is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionClient for DisabledCompletion {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// OpenAI-compatible `chat/completions` client.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl HttpCompletionClient {
    /// Every request, body included, is bounded by `config.timeout`.
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CompletionError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        if self.config.base_url.ends_with('/') {
            format!("{}chat/completions", self.config.base_url)
        } else {
            format!("{}/chat/completions", self.config.base_url)
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;

        extract_content(&json)
    }
}

fn extract_content(json: &serde_json::Value) -> Result<String, CompletionError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(CompletionError::InvalidResponse)
}
