//! OpenAI-compatible chat completions client.
//!
//! Exactly one request per call. Transient failures are reported, not
//! retried; the worker decides what a failed completion means for its task.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::LlmError;
use super::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, Role, TokenUsage};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Client for any backend speaking the `/chat/completions` dialect.
pub struct OpenAiCompatClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    default_max_tokens: Option<u64>,
}

impl OpenAiCompatClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        let mut api_url = api_url.into();
        while api_url.ends_with('/') {
            api_url.pop();
        }
        // Accept a full endpoint as well as a base URL.
        if let Some(base) = api_url.strip_suffix(CHAT_COMPLETIONS_PATH) {
            api_url = base.trim_end_matches('/').to_string();
        }
        Self {
            client: Client::new(),
            api_url,
            api_key,
            model: model.into(),
            default_max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.default_max_tokens = Some(max_tokens);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.api_url, CHAT_COMPLETIONS_PATH)
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionsRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ChatMessage::new(Role::System, request.system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        ChatCompletionsRequest {
            model: self.model.clone(),
            messages,
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens.or(self.default_max_tokens),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(request);

        tracing::debug!(
            "Sending completion request: model={} messages={}",
            body.model,
            body.messages.len()
        );

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(LlmError::network_error(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(LlmError::network_error(format!("Connection failed: {}", e)));
                } else {
                    return Err(LlmError::network_error(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::error!("Completion request failed with {}: {}", status, text);
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, text))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error("No choices in response"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            stop_reason: choice.finish_reason,
            model: parsed.model.or_else(|| Some(self.model.clone())),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Chat completions request format.
#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Usage data (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
