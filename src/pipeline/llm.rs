use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Blocking chat-completions client for the correction, translation, and
/// analysis passes.
pub struct LlmClient {
    endpoint: String,
    api_key: String,
    temperature: f32,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl LlmClient {
    /// Create a client from config. Fails fast when no API key is available.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let endpoint = config.llm_endpoint.trim_end_matches('/').to_string();

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            endpoint,
            api_key,
            temperature: config.temperature,
            client,
        })
    }

    /// Send one user prompt and return the response text.
    pub fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .unwrap_or_else(|_| "unable to read response body".to_string());
            anyhow::bail!("LLM returned HTTP {}: {}", status.as_u16(), error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .context("Failed to parse chat completion response")?;

        if let Some(usage) = &chat_response.usage {
            tracing::debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens
            );
        }

        let choice = chat_response
            .choices
            .first()
            .context("No choices in chat completion response")?;

        if let Some(reason) = &choice.finish_reason {
            if reason != "stop" {
                tracing::warn!("Chat completion finish_reason: {}", reason);
            }
        }

        Ok(choice.message.content.trim().to_string())
    }
}
