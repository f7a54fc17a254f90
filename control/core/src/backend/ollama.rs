//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions; used here in batch mode, with
//!   `format: "json"` when the caller wants structured output
//! - `/api/tags` - List available models

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;

use super::traits::{LlmBackend, LlmRequest, LlmResponse, ModelInfo};
use crate::config::AdvisorSettings;

/// Default temperature the server applies when none is sent
const SERVER_DEFAULT_TEMPERATURE: f32 = 0.7;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `request_timeout` bounds every HTTP exchange; callers that need a
    /// tighter bound per call wrap the call in their own timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, port: u16, request_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            host: host.into(),
            port,
            http_client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .context("Failed to create HTTP client")?,
        })
    }

    /// Create from advisor settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &AdvisorSettings, request_timeout: Duration) -> anyhow::Result<Self> {
        Self::new(settings.host.clone(), settings.port, request_timeout)
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the full prompt including the system prompt
    fn build_prompt(request: &LlmRequest) -> String {
        match request.system {
            Some(ref system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        }
    }

    /// JSON body for `/api/generate`
    fn request_body(request: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": Self::build_prompt(request),
            "stream": false,
        });

        if request.json_output {
            body["format"] = serde_json::json!("json");
        }

        let mut options = serde_json::Map::new();
        if (request.temperature - SERVER_DEFAULT_TEMPERATURE).abs() > f32::EPSILON {
            options.insert("temperature".into(), serde_json::json!(request.temperature));
        }
        if request.max_tokens > 0 {
            options.insert("num_predict".into(), serde_json::json!(request.max_tokens));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }
        body
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&Self::request_body(request))
            .send()
            .await
            .context("Ollama request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: serde_json::Value = response
            .json()
            .await
            .context("Ollama returned a non-JSON envelope")?;

        let content = data
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: u64::try_from(start.elapsed().as_millis()).ok(),
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: serde_json::Value = response.json().await?;
        Ok(parse_models(&data))
    }
}

/// Extract models from a `/api/tags` payload
fn parse_models(data: &serde_json::Value) -> Vec<ModelInfo> {
    data.get("models")
        .and_then(|m| m.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| {
                    let name = m.get("name")?.as_str()?.to_string();
                    let size = m.get("size").and_then(serde_json::Value::as_u64);
                    let parameters = m
                        .get("details")
                        .and_then(|d| d.get("parameter_size"))
                        .and_then(|p| p.as_str())
                        .map(String::from);

                    Some(ModelInfo {
                        name,
                        size,
                        parameters,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
