//! Control Messages
//!
//! Messages published by the control loop to its observers. They describe every
//! state transition of the session: new readings, sensing failures, degradation,
//! recommendation outcomes, actuator writes and their confirmation.
//!
//! # Design Philosophy
//!
//! The loop is the only component that decides anything. Observers (a dashboard,
//! the daemon console, logs, tests) are pure sinks that render or record what
//! they are told. The only way back into the loop is an explicit
//! [`ControlIntent`](crate::events::ControlIntent).
//!
//! Messages are delivered in the order the loop produced them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdvisoryFailure;
use crate::session::{
    ActuatorKind, ActuatorTarget, CommandSource, Phase, Recommendation, SensorReading,
    SessionSnapshot,
};

/// Messages from the control loop to observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    // ============================================
    // Lifecycle
    // ============================================
    /// Loop started; actuator state has been seeded from the devices
    Started {
        /// Session snapshot after seeding
        snapshot: SessionSnapshot,
    },

    /// Loop state changed (running, paused, stopping)
    LoopState {
        /// The new state
        state: LoopState,
    },

    /// Loop stopped; no further messages follow
    Stopped {
        /// Final session snapshot
        snapshot: SessionSnapshot,
    },

    // ============================================
    // Sensing
    // ============================================
    /// A new reading replaced the previous one
    ReadingUpdated {
        /// The new reading
        reading: SensorReading,
    },

    /// A sensor read failed; the previous reading is kept
    SensorReadFailed {
        /// Failures since the last successful read
        consecutive_failures: u32,
        /// Provider error
        error: String,
    },

    /// The degraded flag changed
    DegradedChanged {
        /// Whether recommendations are now suspended
        degraded: bool,
    },

    /// An actuator kind moved to another phase
    PhaseChanged {
        /// Actuator kind
        kind: ActuatorKind,
        /// New phase
        phase: Phase,
    },

    // ============================================
    // Recommendations
    // ============================================
    /// A recommendation was requested from the advisor
    RecommendationRequested {
        /// Actuator kind
        kind: ActuatorKind,
        /// Reading the request was built from
        based_on: SensorReading,
        /// Request generation for this kind
        generation: u64,
    },

    /// A recommendation arrived and was stored
    RecommendationReceived {
        /// The advice
        recommendation: Recommendation,
        /// Whether the loop is applying it
        applied: bool,
    },

    /// A recommendation arrived but was dropped without being stored
    RecommendationDiscarded {
        /// Actuator kind
        kind: ActuatorKind,
        /// Why it was dropped
        reason: DiscardReason,
    },

    /// The advisor could not produce a recommendation
    RecommendationFailed {
        /// Actuator kind
        kind: ActuatorKind,
        /// Unavailable or invalid
        failure: AdvisoryFailure,
        /// Error detail
        error: String,
    },

    // ============================================
    // Actuators
    // ============================================
    /// Who owns an actuator kind changed
    SourceChanged {
        /// Actuator kind
        kind: ActuatorKind,
        /// New authoritative source
        source: CommandSource,
    },

    /// A write is being issued
    CommandIssued {
        /// Target being written
        target: ActuatorTarget,
        /// Source on whose behalf it is written
        source: CommandSource,
    },

    /// The device corroborated the target
    ActuatorConfirmed {
        /// Confirmed target
        target: ActuatorTarget,
    },

    /// Writes failed after retries; the kind is faulted
    ActuatorFaulted {
        /// Target that could not be written
        target: ActuatorTarget,
        /// Last write error
        error: String,
    },

    /// A previously faulted kind accepted a write again
    FaultCleared {
        /// Actuator kind
        kind: ActuatorKind,
    },

    // ============================================
    // Operator notifications
    // ============================================
    /// Short operator-facing notification
    Notify {
        /// Severity
        level: NotifyLevel,
        /// Title
        title: String,
        /// Message content
        message: String,
    },
}

impl ControlMessage {
    /// Convenience constructor for [`ControlMessage::Notify`]
    pub fn notify(level: NotifyLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Why a recommendation was dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// A newer request for the same kind superseded it
    Stale,
    /// The loop was paused while it was in flight
    Paused,
    /// The advice was for the other actuator kind
    WrongKind,
}

/// Unique identifier for a control session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification severity levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// Control loop operational states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Seeding actuator state
    Initializing,
    /// Polling and reconciling
    Running,
    /// Polling and advisory application suspended; manual control still works
    Paused,
    /// Shutting down
    Stopping,
}

impl LoopState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Initializing => "Starting up...",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopping => "Shutting down...",
        }
    }
}
