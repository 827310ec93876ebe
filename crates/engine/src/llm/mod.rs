//! LLM provider interface and the OpenAI-compatible HTTP client.
//!
//! Every LLM touchpoint in the pipeline (refinery, triple extraction,
//! classification, domain resolution, decision fallback) goes through the
//! `LlmProvider` trait. Unsupported generation options are dropped
//! silently, and provider-specific failures never cross the interface.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::LlmPolicy;
use crate::types::LlmError;

/// Generation options. Providers apply what they support and ignore the rest.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text-generation provider contract.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// OpenAI-compatible chat completions client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    /// Build a client from policy, reading the API key from the configured
    /// environment variable. Returns `None` when no key is set, which
    /// callers treat as "LLM disabled".
    pub fn from_policy(policy: &LlmPolicy) -> Option<Self> {
        let api_key = std::env::var(&policy.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .build()
            .ok()?;
        tracing::info!(
            "LLM client initialized: model={} base_url={}",
            policy.model,
            policy.base_url
        );
        Some(Self {
            client,
            api_key,
            base_url: policy.base_url.trim_end_matches('/').to_string(),
            model: policy.model.clone(),
            max_retries: policy.max_retries.max(1),
        })
    }

    async fn completion_once(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });
        if let Some(t) = options.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if let Some(p) = options.top_p {
            body["top_p"] = serde_json::json!(p);
        }

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Unparseable(e.to_string()))?;

        if let Some(usage) = resp_json.get("usage") {
            tracing::debug!(
                "LLM usage: model={} prompt_tokens={} completion_tokens={} latency={:?}",
                self.model,
                usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                start.elapsed(),
            );
        }

        resp_json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Unparseable("no content in response choices".to_string()))
    }

    /// Whether a failure is worth retrying: transport errors and 5xx/429.
    fn is_transient(error: &LlmError) -> bool {
        match error {
            LlmError::RequestFailed(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LlmError> {
        let mut last_error = None;
        for attempt in 0..self.max_retries {
            match self.completion_once(prompt, options).await {
                Ok(text) => return Ok(text),
                Err(e) if Self::is_transient(&e) => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt))
                        + Duration::from_millis(rand::random::<u64>() % 250);
                    tracing::warn!(
                        "LLM call failed (attempt {}/{}), retrying in {:?}: {e}",
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Deterministic scripted provider for tests.
///
/// Routes by prompt substring first; otherwise pops queued responses in
/// order. An empty script produces `LlmError::NotConfigured`.
pub struct ScriptedLlm {
    routes: parking_lot::Mutex<Vec<(String, String)>>,
    queued: parking_lot::Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            routes: parking_lot::Mutex::new(Vec::new()),
            queued: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Any prompt containing `needle` yields `response`.
    pub fn route(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.routes.lock().push((needle.into(), response.into()));
        self
    }

    /// Queue a one-shot response for the next unrouted prompt.
    pub fn push(&self, response: impl Into<String>) {
        self.queued.lock().push_back(response.into());
    }

    pub fn enqueue(self, response: impl Into<String>) -> Self {
        self.push(response);
        self
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, LlmError> {
        for (needle, response) in self.routes.lock().iter() {
            if prompt.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        self.queued
            .lock()
            .pop_front()
            .ok_or(LlmError::NotConfigured)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_routes_by_substring() {
        let llm = ScriptedLlm::new()
            .route("classify", "CONVERSATIONAL")
            .enqueue("fallback response");
        let opts = GenerateOptions::default();
        assert_eq!(llm.generate("please classify this", &opts).await.unwrap(), "CONVERSATIONAL");
        assert_eq!(llm.generate("anything else", &opts).await.unwrap(), "fallback response");
        assert!(llm.generate("anything else", &opts).await.is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(HttpLlmClient::is_transient(&LlmError::RequestFailed("timeout".into())));
        assert!(HttpLlmClient::is_transient(&LlmError::Api { status: 429, body: String::new() }));
        assert!(HttpLlmClient::is_transient(&LlmError::Api { status: 503, body: String::new() }));
        assert!(!HttpLlmClient::is_transient(&LlmError::Api { status: 401, body: String::new() }));
        assert!(!HttpLlmClient::is_transient(&LlmError::Unparseable("x".into())));
    }
}
