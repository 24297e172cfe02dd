//! Model invocation port and its OpenAI-compatible HTTP client.
//!
//! Every draft and judge call goes through [`ModelPort::generate`]. Failures
//! come back as a [`ModelError`] rather than an in-band error string, so the
//! draft generator filters on `Err` instead of sniffing text prefixes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::errors::ModelError;

/// One chat-completion call: a system prompt, a user prompt, one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature,
        }
    }
}

/// Anything that can turn a prompt into text.
///
/// Implementations must be safe to call concurrently; each call fails
/// independently of its siblings.
#[async_trait]
pub trait ModelPort: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<String, ModelError>;
}

/// Run `generate` under a deadline; an elapsed deadline becomes [`ModelError::Timeout`].
pub async fn generate_with_timeout(
    port: &dyn ModelPort,
    request: &ChatRequest,
    limit: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(limit, port.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(limit)),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Pull the first choice's text out of a chat-completion body.
fn completion_text(body: &str) -> Result<String, ModelError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Decode(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ModelError::EmptyCompletion);
    }
    Ok(content.trim().to_string())
}

/// Client for any server speaking the OpenAI `chat/completions` dialect.
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::Configuration(e.to_string()))?;
        Ok(Self {
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifiers the server advertises under `GET /models`.
    pub async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let list: ModelList =
            serde_json::from_str(&body).map_err(|e| ModelError::Decode(e.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl ModelPort for OpenAiCompatClient {
    async fn generate(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt}
            ],
            "temperature": request.temperature,
            "stream": false
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let content = completion_text(&text)?;
        debug!(
            model = %request.model,
            chars = content.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "completion received"
        );
        Ok(content)
    }
}

/// Check if an inference endpoint is reachable (`GET {base_url}/models`).
pub async fn check_endpoint(base_url: &str, api_key: &str) -> bool {
    let models_url = format!("{}/models", base_url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .bearer_auth(api_key)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
