//! Error Types
//!
//! Every failure the control core can observe is a typed, recoverable value.
//! None of these errors stops the loop: sensing failures degrade the session,
//! actuator failures fault a single actuator kind, and advisory failures only
//! mean "no recommendation this time".
//!
//! ```text
//! SensorGateway ──► SensorError::Unavailable          retried next tick, degrades after N
//! ActuatorGateway ─► ActuatorError::WriteFailed       retried with backoff, then FAULTED
//!                 └► ActuatorError::ReadFailed        confirmation postponed
//! Advisor ────────► RecommendationError::Unavailable  retried, then surfaced
//!                 └► RecommendationError::Invalid     surfaced immediately
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The sensor provider could not produce a reading
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SensorError {
    /// Provider unreachable, timed out, or returned an unusable payload
    #[error("sensor provider unavailable: {0}")]
    Unavailable(String),
}

/// The actuator provider rejected or could not serve a request
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActuatorError {
    /// A write was not committed; the device state is unknown
    #[error("actuator write failed: {0}")]
    WriteFailed(String),

    /// A read-back could not be performed
    #[error("actuator read failed: {0}")]
    ReadFailed(String),
}

/// Failure of an advisory (language model) call
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecommendationError {
    /// The model service could not be reached or did not answer in time
    #[error("recommendation unavailable: {0}")]
    Unavailable(String),

    /// The model answered, but the payload failed schema validation
    #[error("recommendation invalid: {0}")]
    Invalid(String),
}

impl RecommendationError {
    /// Whether another attempt could plausibly succeed
    ///
    /// Malformed output is a logic error in the model response, so only
    /// unavailability is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Classification carried in observer messages
    #[must_use]
    pub fn failure(&self) -> AdvisoryFailure {
        match self {
            Self::Unavailable(_) => AdvisoryFailure::Unavailable,
            Self::Invalid(_) => AdvisoryFailure::Invalid,
        }
    }
}

/// Distinguishes "model down" from "model answered badly" for operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryFailure {
    /// Provider unreachable or timed out
    Unavailable,
    /// Provider answered with a payload that failed validation
    Invalid,
}

/// A command value that cannot be expressed on the device
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Fan speed must be a percentage
    #[error("fan speed {0} is outside 0..=100")]
    FanSpeedOutOfRange(i64),
}

/// Errors returned by [`crate::ControlHandle`] operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control loop has been stopped (or never started)
    #[error("control loop is not running")]
    LoopStopped,

    /// The requested command was rejected before reaching the queue
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A forwarded advisory question failed
    #[error(transparent)]
    Advisory(#[from] RecommendationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(RecommendationError::Unavailable("timeout".into()).is_retryable());
        assert!(!RecommendationError::Invalid("missing field".into()).is_retryable());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            RecommendationError::Unavailable("down".into()).failure(),
            AdvisoryFailure::Unavailable
        );
        assert_eq!(
            RecommendationError::Invalid("bad".into()).failure(),
            AdvisoryFailure::Invalid
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CommandError::FanSpeedOutOfRange(140).to_string(),
            "fan speed 140 is outside 0..=100"
        );
        assert_eq!(
            ActuatorError::WriteFailed("503".into()).to_string(),
            "actuator write failed: 503"
        );
        let err: ControlError = CommandError::FanSpeedOutOfRange(-1).into();
        assert_eq!(err.to_string(), "fan speed -1 is outside 0..=100");
    }
}
