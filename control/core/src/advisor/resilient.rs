//! Timeout and retry policy for advisory calls
//!
//! ```text
//! attempt 0 ──timeout──► Ok ─────────────────────► Ok
//!                     └► Invalid ────────────────► Invalid (never retried)
//!                     └► Unavailable / timed out ─► backoff ─► attempt 1 ─► result
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::RecommendationClient;
use crate::config::ControlConfig;
use crate::error::RecommendationError;
use crate::retry;
use crate::session::{FanRecommendation, LightRecommendation, SensorReading};

/// Wraps a client so every call is bounded and transient failures are retried
pub struct ResilientAdvisor<C> {
    inner: C,
    timeout: Duration,
    retries: u32,
    retry_backoff: Duration,
}

impl<C: RecommendationClient> ResilientAdvisor<C> {
    /// Wrap `inner` with an explicit policy
    pub fn new(inner: C, timeout: Duration, retries: u32, retry_backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            retries,
            retry_backoff,
        }
    }

    /// Wrap `inner` with the policy from the loop configuration
    pub fn from_config(inner: C, config: &ControlConfig) -> Self {
        Self::new(
            inner,
            config.recommendation_timeout,
            config.recommendation_retries,
            config.recommendation_retry_backoff,
        )
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, RecommendationError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RecommendationError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(RecommendationError::Unavailable(format!(
                    "{operation} timed out after {:?}",
                    self.timeout
                ))),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %e,
                        "Advisor unavailable, retrying"
                    );
                    retry::backoff(self.retry_backoff, attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<C: RecommendationClient> RecommendationClient for ResilientAdvisor<C> {
    async fn recommend_fan_speed(&self, reading: &SensorReading) -> Result<FanRecommendation, RecommendationError> {
        self.call("fan recommendation", || self.inner.recommend_fan_speed(reading))
            .await
    }

    async fn recommend_light_status(&self, lux: f64) -> Result<LightRecommendation, RecommendationError> {
        self.call("light recommendation", || self.inner.recommend_light_status(lux))
            .await
    }

    async fn answer_question(&self, question: &str) -> Result<String, RecommendationError> {
        self.call("question", || self.inner.answer_question(question))
            .await
    }
}
