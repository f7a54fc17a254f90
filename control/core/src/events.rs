//! Control Intents
//!
//! Requests that enter the control loop from outside: operator commands from a
//! dashboard or console, and queries. Intents are queued and processed one at a
//! time on the loop's sequential queue, interleaved with sensor ticks and
//! recommendation completions.
//!
//! User commands carry the instant they were *requested*, taken when the
//! operator acted rather than when the queue got to them. The loop uses it to
//! decide races with recommendations that were in flight.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::RecommendationError;
use crate::session::{ActuatorKind, ActuatorTarget, SessionSnapshot};

/// Intents from surfaces to the control loop
#[derive(Debug)]
pub enum ControlIntent {
    // ============================================
    // Manual control
    // ============================================
    /// Operator sets an actuator; wins over advice until cleared
    SetUserCommand {
        /// Requested target
        target: ActuatorTarget,
        /// When the operator asked
        requested_at: DateTime<Utc>,
    },

    /// Operator hands an actuator back to the advisor
    ClearOverride {
        /// Actuator kind
        kind: ActuatorKind,
    },

    /// The device reported a value out of band
    Acknowledge {
        /// Value the device reported
        observed: ActuatorTarget,
    },

    // ============================================
    // Loop control
    // ============================================
    /// Ask for fresh advice regardless of hysteresis
    RefreshRecommendation {
        /// Actuator kind
        kind: ActuatorKind,
    },

    /// Poll sensors now instead of waiting for the next interval
    TickNow,

    /// Suspend polling and advisory application
    Pause,

    /// Resume polling
    Resume,

    // ============================================
    // Queries
    // ============================================
    /// Forward a free-form question to the advisor
    Ask {
        /// The question
        question: String,
        /// Where the answer goes
        reply: oneshot::Sender<Result<String, RecommendationError>>,
    },

    /// Request a copy of the session
    Snapshot {
        /// Where the snapshot goes
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

impl ControlIntent {
    /// A user command stamped with the current time
    #[must_use]
    pub fn user_command(target: ActuatorTarget) -> Self {
        Self::SetUserCommand {
            target,
            requested_at: Utc::now(),
        }
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetUserCommand { .. } => "set_user_command",
            Self::ClearOverride { .. } => "clear_override",
            Self::Acknowledge { .. } => "acknowledge",
            Self::RefreshRecommendation { .. } => "refresh_recommendation",
            Self::TickNow => "tick_now",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Ask { .. } => "ask",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}
