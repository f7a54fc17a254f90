//! Recommendation Client
//!
//! Advisory calls to a language model: fan speed from temperature, humidity and
//! oxygen; light status from light intensity; and free-form questions that sit
//! outside the reconciliation path.
//!
//! # Design Philosophy
//!
//! Advice is slow and occasionally malformed. The client contract therefore
//! returns either a validated value or one of two recoverable errors, and the
//! [`ResilientAdvisor`] decorator owns the timeout and retry policy.
//! [`ControlLoop::start`](crate::ControlLoop::start) wraps whatever client it
//! is given, so clients themselves need no timeouts.
//!
//! ```text
//! ControlLoop ──► ResilientAdvisor ──► LlmAdvisor ──► LlmBackend (Ollama)
//!                 timeout + retry      prompt +       transport
//!                                      validation
//! ```

mod llm;
pub mod prompts;
mod resilient;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;

pub use llm::LlmAdvisor;
pub use resilient::ResilientAdvisor;

use crate::error::RecommendationError;
use crate::session::{
    ActuatorKind, FanRecommendation, LightRecommendation, Recommendation, SensorReading,
};

/// Advisory service contract
#[async_trait]
pub trait RecommendationClient: Send + Sync {
    /// Advise a fan speed for the reading
    async fn recommend_fan_speed(&self, reading: &SensorReading) -> Result<FanRecommendation, RecommendationError>;

    /// Advise whether the lights should be on at this light level
    async fn recommend_light_status(&self, lux: f64) -> Result<LightRecommendation, RecommendationError>;

    /// Answer a free-form question
    async fn answer_question(&self, question: &str) -> Result<String, RecommendationError>;
}

#[async_trait]
impl<T: RecommendationClient + ?Sized> RecommendationClient for Arc<T> {
    async fn recommend_fan_speed(&self, reading: &SensorReading) -> Result<FanRecommendation, RecommendationError> {
        (**self).recommend_fan_speed(reading).await
    }

    async fn recommend_light_status(&self, lux: f64) -> Result<LightRecommendation, RecommendationError> {
        (**self).recommend_light_status(lux).await
    }

    async fn answer_question(&self, question: &str) -> Result<String, RecommendationError> {
        (**self).answer_question(question).await
    }
}

/// Request advice for one actuator kind
///
/// # Errors
///
/// Propagates the client's [`RecommendationError`].
pub async fn recommend(
    client: &dyn RecommendationClient,
    kind: ActuatorKind,
    reading: &SensorReading,
) -> Result<Recommendation, RecommendationError> {
    match kind {
        ActuatorKind::Fan => client.recommend_fan_speed(reading).await.map(Recommendation::Fan),
        ActuatorKind::Light => client
            .recommend_light_status(reading.light_lux)
            .await
            .map(Recommendation::Light),
    }
}
