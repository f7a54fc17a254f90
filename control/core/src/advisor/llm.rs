//! Advisor backed by a language model
//!
//! Renders the prompt, sends it in JSON mode, validates the answer. Transport
//! failures are `Unavailable`; answers that fail validation are `Invalid`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{prompts, schema, RecommendationClient};
use crate::backend::{LlmBackend, LlmRequest};
use crate::config::AdvisorSettings;
use crate::error::RecommendationError;
use crate::session::{FanRecommendation, LightRecommendation, SensorReading};

/// Recommendation client over an [`LlmBackend`]
pub struct LlmAdvisor<B: LlmBackend> {
    backend: Arc<B>,
    model: String,
    temperature: f32,
}

impl<B: LlmBackend> LlmAdvisor<B> {
    /// Create an advisor using `model` on `backend`
    pub fn new(backend: Arc<B>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature: AdvisorSettings::default().temperature,
        }
    }

    /// Create an advisor from settings
    pub fn from_settings(backend: Arc<B>, settings: &AdvisorSettings) -> Self {
        Self::new(backend, settings.model.clone()).with_temperature(settings.temperature)
    }

    /// Set sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Model used for every prompt
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<String, RecommendationError> {
        let request = LlmRequest::new(prompt, self.model.clone())
            .with_system(system)
            .with_temperature(self.temperature)
            .with_json_output(true);

        let response = self.backend.send(&request).await.map_err(|e| {
            tracing::debug!(backend = self.backend.name(), error = %e, "Advisory request failed");
            RecommendationError::Unavailable(format!("{e:#}"))
        })?;

        tracing::trace!(
            model = %response.model,
            tokens = ?response.tokens_used,
            duration_ms = ?response.duration_ms,
            "Advisory response received"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl<B: LlmBackend + 'static> RecommendationClient for LlmAdvisor<B> {
    async fn recommend_fan_speed(&self, reading: &SensorReading) -> Result<FanRecommendation, RecommendationError> {
        let text = self.ask(prompts::FAN_SYSTEM, prompts::fan_prompt(reading)).await?;
        schema::parse_fan_recommendation(&text)
    }

    async fn recommend_light_status(&self, lux: f64) -> Result<LightRecommendation, RecommendationError> {
        let text = self.ask(prompts::LIGHT_SYSTEM, prompts::light_prompt(lux)).await?;
        schema::parse_light_recommendation(&text)
    }

    async fn answer_question(&self, question: &str) -> Result<String, RecommendationError> {
        let text = self
            .ask(prompts::QUESTION_SYSTEM, prompts::question_prompt(question))
            .await?;
        schema::parse_answer(&text)
    }
}
