/*!
 * LLM client.
 *
 * One chat call per agent activation, OpenRouter-compatible wire shape.
 * The API key is never held in process state; it is resolved through the
 * secret manager for each call and scrubbed when the call returns.
 */

use async_trait::async_trait;
use rcrt_client::{SecretManager, SecretRef};
use rcrt_core::RcrtError;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String, RcrtError>;
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    secrets: SecretManager,
    api_key: SecretRef,
    referer: Option<String>,
    site_title: Option<String>,
}

impl OpenRouterClient {
    pub fn new(
        base_url: &str,
        secrets: SecretManager,
        api_key: SecretRef,
        referer: Option<String>,
        site_title: Option<String>,
    ) -> Result<Self, RcrtError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RcrtError::Transport(e.to_string()))?;
        Ok(OpenRouterClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secrets,
            api_key,
            referer,
            site_title,
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String, RcrtError> {
        let key = self
            .secrets
            .decrypt(&self.api_key, &format!("llm chat completion ({})", model))
            .await?;

        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = params.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(key.expose())
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.site_title {
            request = request.header("X-Title", title);
        }

        let response = request.json(&payload).send().await.map_err(|e| {
            if e.is_timeout() {
                RcrtError::Timeout(Duration::from_secs(120))
            } else {
                RcrtError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(RcrtError::Auth(format!("llm provider {}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RcrtError::Transport(format!("llm provider {}: {}", status, body)));
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RcrtError::Transport(format!("llm response malformed: {}", e)))?;

        reply
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RcrtError::Transport("llm response missing choices[0].message.content".into()))
    }
}
