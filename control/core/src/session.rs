//! Control Session
//!
//! The authoritative in-memory state of a running control instance: the latest
//! sensor reading, the actuator targets and their confirmation state, the latest
//! recommendation per actuator kind, and who currently owns each actuator.
//!
//! # Design Philosophy
//!
//! The session is plain data. It is owned by exactly one task (the control loop)
//! and is mutated only from that task's sequential queue, so it needs no locks.
//! Everything outside the loop sees it through [`SessionSnapshot`] copies.
//!
//! Fan and light are reconciled independently: a fan write can fault while the
//! light is confirmed. Every per-kind field therefore lives in a [`PerKind`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::messages::SessionId;

// ============================================================================
// Actuator Kinds
// ============================================================================

/// The two actuators the core reconciles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Ventilation fan, driven by temperature, humidity and oxygen
    Fan,
    /// Grow lights, driven by light intensity
    Light,
}

impl ActuatorKind {
    /// Every kind, in a stable order
    pub const ALL: [ActuatorKind; 2] = [ActuatorKind::Fan, ActuatorKind::Light];
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fan => write!(f, "fan"),
            Self::Light => write!(f, "light"),
        }
    }
}

/// One value per actuator kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerKind<T> {
    /// Fan slot
    pub fan: T,
    /// Light slot
    pub light: T,
}

impl<T> PerKind<T> {
    /// Build from a function of the kind
    pub fn from_fn(mut f: impl FnMut(ActuatorKind) -> T) -> Self {
        Self {
            fan: f(ActuatorKind::Fan),
            light: f(ActuatorKind::Light),
        }
    }

    /// Borrow the slot for `kind`
    #[must_use]
    pub fn get(&self, kind: ActuatorKind) -> &T {
        match kind {
            ActuatorKind::Fan => &self.fan,
            ActuatorKind::Light => &self.light,
        }
    }

    /// Mutably borrow the slot for `kind`
    pub fn get_mut(&mut self, kind: ActuatorKind) -> &mut T {
        match kind {
            ActuatorKind::Fan => &mut self.fan,
            ActuatorKind::Light => &mut self.light,
        }
    }
}

// ============================================================================
// Sensor Readings
// ============================================================================

/// One environmental observation
///
/// Immutable once constructed; a new reading replaces the previous one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Air temperature in degrees Celsius
    pub temperature_celsius: f64,
    /// Relative humidity in percent
    pub humidity_pct: f64,
    /// Oxygen level in percent
    pub oxygen_pct: f64,
    /// Light intensity in lux
    pub light_lux: f64,
    /// When the provider produced the reading
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    /// Create a reading observed now
    #[must_use]
    pub fn new(temperature_celsius: f64, humidity_pct: f64, oxygen_pct: f64, light_lux: f64) -> Self {
        Self {
            temperature_celsius,
            humidity_pct,
            oxygen_pct,
            light_lux,
            observed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Actuator Commands
// ============================================================================

/// Fan speed as a validated percentage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct FanSpeed(u8);

impl FanSpeed {
    /// Fan stopped
    pub const OFF: FanSpeed = FanSpeed(0);
    /// Fan at full speed
    pub const MAX: FanSpeed = FanSpeed(100);

    /// Validate a percentage
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::FanSpeedOutOfRange`] above 100.
    pub fn new(pct: u8) -> Result<Self, CommandError> {
        Self::try_from(i64::from(pct))
    }

    /// The percentage value
    #[must_use]
    pub fn pct(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for FanSpeed {
    type Error = CommandError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(pct) if pct <= 100 => Ok(Self(pct)),
            _ => Err(CommandError::FanSpeedOutOfRange(value)),
        }
    }
}

impl From<FanSpeed> for u8 {
    fn from(speed: FanSpeed) -> Self {
        speed.0
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// The value one actuator is asked to take
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActuatorTarget {
    /// Fan speed target
    Fan(FanSpeed),
    /// Light on/off target
    Light(bool),
}

impl ActuatorTarget {
    /// Which actuator this target addresses
    #[must_use]
    pub fn kind(&self) -> ActuatorKind {
        match self {
            Self::Fan(_) => ActuatorKind::Fan,
            Self::Light(_) => ActuatorKind::Light,
        }
    }
}

impl fmt::Display for ActuatorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fan(speed) => write!(f, "fan {speed}"),
            Self::Light(true) => write!(f, "light on"),
            Self::Light(false) => write!(f, "light off"),
        }
    }
}

/// Desired actuator targets, not necessarily applied yet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Fan speed target
    pub fan_speed: FanSpeed,
    /// Light target
    pub light_on: bool,
}

impl ActuatorCommand {
    /// The target for one kind
    #[must_use]
    pub fn target(&self, kind: ActuatorKind) -> ActuatorTarget {
        match kind {
            ActuatorKind::Fan => ActuatorTarget::Fan(self.fan_speed),
            ActuatorKind::Light => ActuatorTarget::Light(self.light_on),
        }
    }

    /// Replace the value for the target's kind
    pub fn set(&mut self, target: ActuatorTarget) {
        match target {
            ActuatorTarget::Fan(speed) => self.fan_speed = speed,
            ActuatorTarget::Light(on) => self.light_on = on,
        }
    }
}

/// Actuator targets plus their application and confirmation state
///
/// `confirmed` is tracked per kind: a write is confirmed only once a read-back
/// (or an explicit acknowledgment) matches the written value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    /// Last attempted (or seeded) targets
    pub command: ActuatorCommand,
    /// When each kind was last written or seeded
    pub applied_at: PerKind<Option<DateTime<Utc>>>,
    /// Whether the device has corroborated the target
    pub confirmed: PerKind<bool>,
}

impl ActuatorState {
    /// Whether `kind` has been corroborated
    #[must_use]
    pub fn is_confirmed(&self, kind: ActuatorKind) -> bool {
        *self.confirmed.get(kind)
    }

    /// Whether every kind has been corroborated
    #[must_use]
    pub fn fully_confirmed(&self) -> bool {
        self.confirmed.fan && self.confirmed.light
    }
}

/// Who last set the active target of an actuator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    /// An operator; wins until explicitly cleared
    User,
    /// An applied recommendation
    Ai,
    /// Nobody yet; the target mirrors the last known device state
    #[default]
    None,
}

/// Where one actuator kind is in its reconciliation cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing in progress
    #[default]
    Idle,
    /// Reading sensors
    Polling,
    /// Waiting for a recommendation
    Recommending,
    /// Writing to the actuator
    Applying,
}

impl Phase {
    /// Short description for logs and status output
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling sensors",
            Self::Recommending => "awaiting recommendation",
            Self::Applying => "applying command",
        }
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// Advised fan speed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanRecommendation {
    /// Recommended speed
    pub speed: FanSpeed,
    /// Model's reasoning
    pub explanation: String,
}

/// Advised light state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightRecommendation {
    /// Whether the lights should be on
    pub on: bool,
    /// Model's reasoning
    pub explanation: String,
}

/// A recommendation for either actuator kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Fan advice
    Fan(FanRecommendation),
    /// Light advice
    Light(LightRecommendation),
}

impl Recommendation {
    /// Which actuator the advice is for
    #[must_use]
    pub fn kind(&self) -> ActuatorKind {
        match self {
            Self::Fan(_) => ActuatorKind::Fan,
            Self::Light(_) => ActuatorKind::Light,
        }
    }

    /// The actuator target the advice asks for
    #[must_use]
    pub fn target(&self) -> ActuatorTarget {
        match self {
            Self::Fan(rec) => ActuatorTarget::Fan(rec.speed),
            Self::Light(rec) => ActuatorTarget::Light(rec.on),
        }
    }

    /// The model's reasoning
    #[must_use]
    pub fn explanation(&self) -> &str {
        match self {
            Self::Fan(rec) => &rec.explanation,
            Self::Light(rec) => &rec.explanation,
        }
    }
}

/// A stored recommendation with its provenance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    /// The advice itself
    pub recommendation: Recommendation,
    /// Reading the advice was computed from
    pub based_on: SensorReading,
    /// When the loop asked for it
    pub requested_at: DateTime<Utc>,
    /// When the answer arrived
    pub produced_at: DateTime<Utc>,
}

// ============================================================================
// Session
// ============================================================================

/// The aggregate root owned by the control loop
///
/// Invariant: for each kind exactly one [`CommandSource`] is authoritative, and
/// `actuators.command` holds the value that source set last.
#[derive(Clone, Debug)]
pub struct ControlSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    reading: Option<SensorReading>,
    actuators: ActuatorState,
    sources: PerKind<CommandSource>,
    recommendations: PerKind<Option<RecommendationRecord>>,
    phases: PerKind<Phase>,
    faulted: PerKind<bool>,
    degraded: bool,
    consecutive_sensor_failures: u32,
}

impl Default for ControlSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSession {
    /// Create an empty session
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            started_at: Utc::now(),
            reading: None,
            actuators: ActuatorState::default(),
            sources: PerKind::default(),
            recommendations: PerKind::default(),
            phases: PerKind::default(),
            faulted: PerKind::default(),
            degraded: false,
            consecutive_sensor_failures: 0,
        }
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Latest successful reading
    #[must_use]
    pub fn reading(&self) -> Option<&SensorReading> {
        self.reading.as_ref()
    }

    /// Actuator targets and confirmation state
    #[must_use]
    pub fn actuators(&self) -> &ActuatorState {
        &self.actuators
    }

    /// Authoritative source for `kind`
    #[must_use]
    pub fn source(&self, kind: ActuatorKind) -> CommandSource {
        *self.sources.get(kind)
    }

    /// Latest recommendation for `kind`
    #[must_use]
    pub fn recommendation(&self, kind: ActuatorKind) -> Option<&RecommendationRecord> {
        self.recommendations.get(kind).as_ref()
    }

    /// Current phase of `kind`
    #[must_use]
    pub fn phase(&self, kind: ActuatorKind) -> Phase {
        *self.phases.get(kind)
    }

    /// Whether the last write to `kind` failed after retries
    #[must_use]
    pub fn is_faulted(&self, kind: ActuatorKind) -> bool {
        *self.faulted.get(kind)
    }

    /// Whether sensing has failed often enough to suspend recommendations
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Sensor failures since the last successful read
    #[must_use]
    pub fn consecutive_sensor_failures(&self) -> u32 {
        self.consecutive_sensor_failures
    }

    /// Serializable copy of the whole session
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            started_at: self.started_at,
            reading: self.reading.clone(),
            actuators: self.actuators.clone(),
            sources: self.sources.clone(),
            recommendations: self.recommendations.clone(),
            phases: self.phases.clone(),
            faulted: self.faulted.clone(),
            degraded: self.degraded,
            consecutive_sensor_failures: self.consecutive_sensor_failures,
        }
    }

    // ------------------------------------------------------------------------
    // Mutation (control loop only)
    // ------------------------------------------------------------------------

    pub(crate) fn set_reading(&mut self, reading: SensorReading) {
        self.reading = Some(reading);
        self.consecutive_sensor_failures = 0;
    }

    /// Returns the new failure count
    pub(crate) fn record_sensor_failure(&mut self) -> u32 {
        self.consecutive_sensor_failures = self.consecutive_sensor_failures.saturating_add(1);
        self.consecutive_sensor_failures
    }

    pub(crate) fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }

    pub(crate) fn set_source(&mut self, kind: ActuatorKind, source: CommandSource) {
        *self.sources.get_mut(kind) = source;
    }

    pub(crate) fn set_phase(&mut self, kind: ActuatorKind, phase: Phase) {
        *self.phases.get_mut(kind) = phase;
    }

    pub(crate) fn set_faulted(&mut self, kind: ActuatorKind, faulted: bool) {
        *self.faulted.get_mut(kind) = faulted;
    }

    pub(crate) fn store_recommendation(&mut self, record: RecommendationRecord) {
        let kind = record.recommendation.kind();
        *self.recommendations.get_mut(kind) = Some(record);
    }

    /// Record the device-reported state at startup
    pub(crate) fn seed_actuator(&mut self, target: ActuatorTarget) {
        let kind = target.kind();
        self.actuators.command.set(target);
        *self.actuators.applied_at.get_mut(kind) = Some(Utc::now());
        *self.actuators.confirmed.get_mut(kind) = true;
    }

    /// Record a write about to be issued: the target becomes the attempted
    /// value and stays unconfirmed until corroborated
    pub(crate) fn record_attempt(&mut self, target: ActuatorTarget, source: CommandSource) {
        let kind = target.kind();
        self.actuators.command.set(target);
        *self.actuators.applied_at.get_mut(kind) = Some(Utc::now());
        *self.actuators.confirmed.get_mut(kind) = false;
        *self.sources.get_mut(kind) = source;
    }

    pub(crate) fn set_confirmed(&mut self, kind: ActuatorKind, confirmed: bool) {
        *self.actuators.confirmed.get_mut(kind) = confirmed;
    }
}

/// Read-only copy of a [`ControlSession`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier
    pub session_id: SessionId,
    /// When the session was created
    pub started_at: DateTime<Utc>,
    /// Latest successful reading
    pub reading: Option<SensorReading>,
    /// Actuator targets and confirmation
    pub actuators: ActuatorState,
    /// Authoritative source per kind
    pub sources: PerKind<CommandSource>,
    /// Latest recommendation per kind
    pub recommendations: PerKind<Option<RecommendationRecord>>,
    /// Current phase per kind
    pub phases: PerKind<Phase>,
    /// Fault flag per kind
    pub faulted: PerKind<bool>,
    /// Whether recommendations are suspended by sensor failures
    pub degraded: bool,
    /// Sensor failures since the last successful read
    pub consecutive_sensor_failures: u32,
}
