//! Hosted-model collaborator — invokes the LLM via HTTP API.
//!
//! The core treats the model as opaque: given a system prompt, history, and
//! a user prompt it returns text plus a token-usage summary. The HTTP
//! variant speaks the Anthropic-compatible Messages API; the scripted
//! variant returns canned completions for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ServerError;
use crate::models::HistoryTurn;

/// One completed model call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
}

/// Closed set of model backends.
#[derive(Clone)]
pub enum ModelClient {
    Http(HttpModelClient),
    Scripted(ScriptedModel),
}

impl ModelClient {
    pub async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[HistoryTurn],
        user_prompt: &str,
    ) -> Result<Completion, ServerError> {
        match self {
            ModelClient::Http(client) => {
                client.complete(model, system_prompt, history, user_prompt).await
            }
            ModelClient::Scripted(script) => script.complete(model, user_prompt),
        }
    }

    /// Release any underlying model-session resources. Idempotent.
    pub async fn release(&self) {
        if let ModelClient::Scripted(script) = self {
            script.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend (Anthropic-compatible Messages API)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpModelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from `ANTHROPIC_BASE_URL` / `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ServerError> {
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ServerError::Internal("ANTHROPIC_API_KEY is not set".to_string()))?;
        Ok(Self::new(base_url, api_key))
    }

    /// POST {base_url}/v1/messages
    /// Headers:
    ///   x-api-key: {api_key}
    ///   anthropic-version: 2023-06-01
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[HistoryTurn],
        user_prompt: &str,
    ) -> Result<Completion, ServerError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let mut messages: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| serde_json::json!({ "role": turn.role, "content": turn.content }))
            .collect();
        messages.push(serde_json::json!({ "role": "user", "content": user_prompt }));

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": 8192,
            "messages": messages,
        });
        if !system_prompt.is_empty() {
            body["system"] = serde_json::Value::String(system_prompt.to_string());
        }

        tracing::info!("Calling model API: {} (model: {})", url, model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServerError::Model(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| ServerError::Model(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(ServerError::Model(format!(
                "API returned {}: {}",
                status, response_text
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| ServerError::Model(format!("Failed to parse response JSON: {}", e)))?;

        let text = json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| {
                arr.iter()
                    .filter_map(|block| {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            block.get("text").and_then(|t| t.as_str()).map(str::to_string)
                        } else {
                            None
                        }
                    })
                    .reduce(|a, b| format!("{}\n{}", a, b))
            })
            .unwrap_or_default();

        let usage = json.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let model = json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(Completion {
            text,
            model,
            prompt_tokens,
            output_tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted backend (tests, dry runs)
// ---------------------------------------------------------------------------

/// Canned completions with synthetic token usage. Replies are consumed in
/// order; once the script is exhausted every call echoes the prompt.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn complete(&self, model: &str, user_prompt: &str) -> Result<Completion, ServerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(message)) => return Err(ServerError::Model(message)),
            None => format!("[scripted] {}", user_prompt),
        };
        // Rough 4-chars-per-token estimate, good enough for spend tests.
        Ok(Completion {
            prompt_tokens: (user_prompt.len() / 4) as u64,
            output_tokens: (text.len() / 4) as u64,
            model: model.to_string(),
            text,
        })
    }
}
