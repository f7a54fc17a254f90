//! Response validation
//!
//! Model output is untrusted text. Validation happens in two steps: locate and
//! deserialize the JSON object into the expected shape, then check the values
//! against their domain. Anything that fails either step is
//! [`RecommendationError::Invalid`]; nothing is clamped or guessed.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::RecommendationError;
use crate::session::{FanRecommendation, FanSpeed, LightRecommendation};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FanPayload {
    recommended_fan_speed: f64,
    explanation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightPayload {
    recommended_light_status: bool,
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    answer: String,
}

/// The outermost `{...}` span of `text`, tolerating prose or code fences
/// around it
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse<T: DeserializeOwned>(text: &str, what: &str) -> Result<T, RecommendationError> {
    let json = extract_json_object(text).ok_or_else(|| {
        RecommendationError::Invalid(format!("{what} response contains no JSON object"))
    })?;
    serde_json::from_str(json)
        .map_err(|e| RecommendationError::Invalid(format!("{what} response does not match schema: {e}")))
}

fn non_empty(value: String, field: &str) -> Result<String, RecommendationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RecommendationError::Invalid(format!("{field} is empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Validate a fan recommendation
///
/// # Errors
///
/// Returns [`RecommendationError::Invalid`] if the shape is wrong, the speed is
/// not a finite number within 0..=100, or the explanation is empty.
pub fn parse_fan_recommendation(text: &str) -> Result<FanRecommendation, RecommendationError> {
    let payload: FanPayload = parse(text, "fan")?;

    let raw = payload.recommended_fan_speed;
    if !raw.is_finite() || !(0.0..=100.0).contains(&raw) {
        return Err(RecommendationError::Invalid(format!(
            "recommendedFanSpeed {raw} is outside 0..=100"
        )));
    }
    // In range, so the rounded value fits
    #[allow(clippy::cast_possible_truncation)]
    let speed = FanSpeed::try_from(raw.round() as i64)
        .map_err(|e| RecommendationError::Invalid(e.to_string()))?;

    Ok(FanRecommendation {
        speed,
        explanation: non_empty(payload.explanation, "explanation")?,
    })
}

/// Validate a light recommendation
///
/// # Errors
///
/// Returns [`RecommendationError::Invalid`] if the shape is wrong or the
/// explanation is empty.
pub fn parse_light_recommendation(text: &str) -> Result<LightRecommendation, RecommendationError> {
    let payload: LightPayload = parse(text, "light")?;
    Ok(LightRecommendation {
        on: payload.recommended_light_status,
        explanation: non_empty(payload.explanation, "explanation")?,
    })
}

/// Validate a free-form answer
///
/// # Errors
///
/// Returns [`RecommendationError::Invalid`] if the shape is wrong or the
/// answer is empty.
pub fn parse_answer(text: &str) -> Result<String, RecommendationError> {
    let payload: AnswerPayload = parse(text, "answer")?;
    non_empty(payload.answer, "answer")
}
