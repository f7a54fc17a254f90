//! Reconciler
//!
//! The control state machine. Owns the [`ControlSession`] and implements every
//! reconciliation step: sensor ticks, recommendation requests and completions,
//! user commands, override clearing, actuator writes with retry and read-back
//! confirmation.
//!
//! # Design Philosophy
//!
//! The reconciler never spawns and never waits on the advisor. A recommendation
//! is split in two: [`Reconciler::request_recommendation`] hands back an
//! [`AdvisoryTicket`], the caller performs the slow call wherever it likes, and
//! [`Reconciler::complete_recommendation`] applies the outcome. Everything in
//! between stays serializable on one queue, and tests can interleave user
//! commands with in-flight advice deterministically.
//!
//! ```text
//!            ┌──────────── USER_OVERRIDE (from any phase) ────────────┐
//!            ▼                                                        │
//!  IDLE ──► POLLING ──► RECOMMENDING ──► APPLYING ──► IDLE            │
//!   │          │ read failed: keep reading, count, maybe DEGRADED     │
//!   │          └ no meaningful change: back to IDLE                   │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Precedence
//!
//! - A user command always writes, immediately, and makes the kind `User`.
//! - Advice is applied only while the kind is `Ai` or `None`, and never when a
//!   user command was requested after the advice was requested.
//! - The source is re-checked right before every AI write.
//! - Only the latest request per kind may complete; older ones are stale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::ControlConfig;
use crate::error::{ActuatorError, RecommendationError, SensorError};
use crate::gateway::{ActuatorGateway, SensorGateway};
use crate::messages::{ControlMessage, DiscardReason, LoopState, NotifyLevel};
use crate::observer::ObserverSet;
use crate::retry;
use crate::session::{
    ActuatorKind, ActuatorTarget, CommandSource, ControlSession, PerKind, Phase, Recommendation,
    RecommendationRecord, SensorReading, SessionSnapshot,
};

/// An advisory request the caller must perform and hand back
#[derive(Clone, Debug, PartialEq)]
pub struct AdvisoryTicket {
    /// Actuator kind to advise
    pub kind: ActuatorKind,
    /// Request generation; only the latest per kind may complete
    pub generation: u64,
    /// Reading to advise on
    pub reading: SensorReading,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
}

/// Advisory bookkeeping for one kind
#[derive(Clone, Debug, Default)]
struct AdvisoryTrack {
    generation: u64,
    in_flight: bool,
    /// Reading of the latest request; hysteresis is measured from here
    reference: Option<SensorReading>,
    /// Set after a failed request; an unchanged reading may ask again after it
    retry_after: Option<Instant>,
}

/// The control state machine
pub struct Reconciler {
    config: ControlConfig,
    session: ControlSession,
    sensors: Arc<dyn SensorGateway>,
    actuators: Arc<dyn ActuatorGateway>,
    observers: ObserverSet,
    advisory: PerKind<AdvisoryTrack>,
    override_requested_at: PerKind<Option<DateTime<Utc>>>,
    paused: bool,
}

impl Reconciler {
    /// Create a reconciler with an empty session
    pub fn new(
        config: ControlConfig,
        sensors: Arc<dyn SensorGateway>,
        actuators: Arc<dyn ActuatorGateway>,
        observers: ObserverSet,
    ) -> Self {
        Self {
            config,
            session: ControlSession::new(),
            sensors,
            actuators,
            observers,
            advisory: PerKind::default(),
            override_requested_at: PerKind::default(),
            paused: false,
        }
    }

    /// The authoritative session
    #[must_use]
    pub fn session(&self) -> &ControlSession {
        &self.session
    }

    /// Copy of the session
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Whether polling and advisory application are suspended
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Seed actuator state from the devices and announce the session
    pub async fn initialize(&mut self) {
        self.emit(ControlMessage::LoopState {
            state: LoopState::Initializing,
        })
        .await;

        for kind in ActuatorKind::ALL {
            match self.read_back(kind).await {
                Ok(target) => {
                    tracing::debug!(%target, "Seeded actuator state from device");
                    self.session.seed_actuator(target);
                }
                Err(e) => {
                    tracing::warn!(%kind, error = %e, "Could not read initial actuator state");
                }
            }
        }

        self.emit(ControlMessage::Started {
            snapshot: self.session.snapshot(),
        })
        .await;
        self.emit(ControlMessage::LoopState {
            state: LoopState::Running,
        })
        .await;
    }

    /// Announce teardown
    pub async fn shutdown(&mut self) {
        self.emit(ControlMessage::LoopState {
            state: LoopState::Stopping,
        })
        .await;
        self.emit(ControlMessage::Stopped {
            snapshot: self.session.snapshot(),
        })
        .await;
    }

    /// Suspend polling; in-flight advice will be discarded, manual control
    /// keeps working
    pub async fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        for kind in ActuatorKind::ALL {
            let track = self.advisory.get_mut(kind);
            track.generation += 1;
            track.in_flight = false;
            if self.session.phase(kind) == Phase::Recommending {
                self.set_phase(kind, Phase::Idle).await;
            }
        }
        self.emit(ControlMessage::LoopState {
            state: LoopState::Paused,
        })
        .await;
    }

    /// Resume polling; the next successful tick asks for fresh advice
    pub async fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        for kind in ActuatorKind::ALL {
            self.advisory.get_mut(kind).reference = None;
        }
        self.emit(ControlMessage::LoopState {
            state: LoopState::Running,
        })
        .await;
    }

    // ========================================================================
    // Sensing
    // ========================================================================

    /// Poll the sensors once
    ///
    /// Returns the advisory requests the new reading calls for.
    pub async fn on_sensor_tick(&mut self) -> Vec<AdvisoryTicket> {
        if self.paused {
            tracing::trace!("Tick skipped while paused");
            return Vec::new();
        }

        for kind in ActuatorKind::ALL {
            if self.session.phase(kind) == Phase::Idle {
                self.set_phase(kind, Phase::Polling).await;
            }
        }

        let result = match tokio::time::timeout(self.config.sensor_timeout, self.sensors.read()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Unavailable(format!(
                "{} read timed out after {:?}",
                self.sensors.name(),
                self.config.sensor_timeout
            ))),
        };

        let tickets = match result {
            Ok(reading) => self.accept_reading(reading).await,
            Err(e) => {
                self.record_sensor_failure(&e).await;
                Vec::new()
            }
        };

        for kind in ActuatorKind::ALL {
            if self.session.phase(kind) == Phase::Polling {
                self.set_phase(kind, Phase::Idle).await;
            }
        }
        tickets
    }

    async fn accept_reading(&mut self, reading: SensorReading) -> Vec<AdvisoryTicket> {
        self.session.set_reading(reading.clone());
        self.emit(ControlMessage::ReadingUpdated {
            reading: reading.clone(),
        })
        .await;

        if self.session.is_degraded() {
            self.session.set_degraded(false);
            // Advice held back while degraded is re-requested on this reading
            for kind in ActuatorKind::ALL {
                self.advisory.get_mut(kind).reference = None;
            }
            self.emit(ControlMessage::DegradedChanged { degraded: false }).await;
            self.emit(ControlMessage::notify(
                NotifyLevel::Info,
                "Sensors recovered",
                "Fresh readings are available; recommendations resumed.",
            ))
            .await;
        }

        for kind in ActuatorKind::ALL {
            if !self.session.actuators().is_confirmed(kind) && !self.session.is_faulted(kind) {
                self.corroborate(kind).await;
            }
        }

        let mut tickets = Vec::new();
        for kind in ActuatorKind::ALL {
            if self.needs_refresh(kind, &reading) {
                if let Some(ticket) = self.request_recommendation(kind).await {
                    tickets.push(ticket);
                }
            }
        }
        tickets
    }

    async fn record_sensor_failure(&mut self, error: &SensorError) {
        let failures = self.session.record_sensor_failure();
        self.emit(ControlMessage::SensorReadFailed {
            consecutive_failures: failures,
            error: error.to_string(),
        })
        .await;

        if failures >= self.config.degraded_after_failures && !self.session.is_degraded() {
            self.session.set_degraded(true);
            self.emit(ControlMessage::DegradedChanged { degraded: true }).await;
            self.emit(ControlMessage::notify(
                NotifyLevel::Warning,
                "Sensors unavailable",
                format!(
                    "{failures} consecutive sensor reads failed; recommendations are suspended. \
                     Manual fan and light control remain available."
                ),
            ))
            .await;
        }
    }

    /// Whether `reading` warrants new advice for `kind`
    fn needs_refresh(&self, kind: ActuatorKind, reading: &SensorReading) -> bool {
        let track = self.advisory.get(kind);
        match track.reference {
            None => true,
            Some(ref reference) => {
                self.config.hysteresis.exceeded(kind, reference, reading)
                    || (!track.in_flight && track.retry_after.is_some_and(|at| Instant::now() >= at))
            }
        }
    }

    // ========================================================================
    // Recommendations
    // ========================================================================

    /// Start an advisory request for `kind` from the latest reading
    ///
    /// Returns `None` while paused or degraded, or before the first reading.
    /// A newer request supersedes any request still in flight.
    pub async fn request_recommendation(&mut self, kind: ActuatorKind) -> Option<AdvisoryTicket> {
        if self.paused || self.session.is_degraded() {
            tracing::debug!(%kind, paused = self.paused, "Recommendation suspended");
            return None;
        }
        let reading = self.session.reading()?.clone();

        let track = self.advisory.get_mut(kind);
        track.generation += 1;
        track.in_flight = true;
        track.reference = Some(reading.clone());
        track.retry_after = None;

        let ticket = AdvisoryTicket {
            kind,
            generation: track.generation,
            reading: reading.clone(),
            requested_at: Utc::now(),
        };

        self.set_phase(kind, Phase::Recommending).await;
        self.emit(ControlMessage::RecommendationRequested {
            kind,
            based_on: reading,
            generation: ticket.generation,
        })
        .await;
        Some(ticket)
    }

    /// Apply the outcome of an advisory request
    pub async fn complete_recommendation(
        &mut self,
        ticket: AdvisoryTicket,
        result: Result<Recommendation, RecommendationError>,
    ) {
        let kind = ticket.kind;
        if self.paused {
            self.discard(kind, DiscardReason::Paused).await;
            return;
        }
        if ticket.generation != self.advisory.get(kind).generation {
            tracing::debug!(
                %kind,
                generation = ticket.generation,
                latest = self.advisory.get(kind).generation,
                "Stale recommendation"
            );
            self.discard(kind, DiscardReason::Stale).await;
            return;
        }

        self.advisory.get_mut(kind).in_flight = false;
        if self.session.phase(kind) == Phase::Recommending {
            self.set_phase(kind, Phase::Idle).await;
        }

        let recommendation = match result {
            Ok(recommendation) if recommendation.kind() == kind => recommendation,
            Ok(_) => {
                self.arm_cooldown(kind);
                self.discard(kind, DiscardReason::WrongKind).await;
                return;
            }
            Err(e) => {
                self.arm_cooldown(kind);
                self.report_advisory_failure(kind, &e).await;
                return;
            }
        };

        self.session.store_recommendation(RecommendationRecord {
            recommendation: recommendation.clone(),
            based_on: ticket.reading,
            requested_at: ticket.requested_at,
            produced_at: Utc::now(),
        });

        let apply = self.may_apply(kind, ticket.requested_at);
        self.emit(ControlMessage::RecommendationReceived {
            recommendation: recommendation.clone(),
            applied: apply,
        })
        .await;

        if apply {
            self.apply_command(recommendation.target(), CommandSource::Ai).await;
        }
    }

    fn may_apply(&self, kind: ActuatorKind, requested_at: DateTime<Utc>) -> bool {
        if self.session.is_degraded() || self.session.source(kind) == CommandSource::User {
            return false;
        }
        // A user command issued after this advice was requested wins even if
        // the override has since been cleared
        !self
            .override_requested_at
            .get(kind)
            .is_some_and(|at| at > requested_at)
    }

    fn arm_cooldown(&mut self, kind: ActuatorKind) {
        self.advisory.get_mut(kind).retry_after =
            Some(Instant::now() + self.config.recommendation_failure_cooldown);
    }

    async fn discard(&mut self, kind: ActuatorKind, reason: DiscardReason) {
        self.emit(ControlMessage::RecommendationDiscarded { kind, reason }).await;
    }

    async fn report_advisory_failure(&mut self, kind: ActuatorKind, error: &RecommendationError) {
        self.emit(ControlMessage::RecommendationFailed {
            kind,
            failure: error.failure(),
            error: error.to_string(),
        })
        .await;

        let (title, detail) = match error {
            RecommendationError::Unavailable(_) => (
                "No recommendation available",
                "The advisor could not be reached.",
            ),
            RecommendationError::Invalid(_) => (
                "Recommendation rejected",
                "The advisor answered with an unusable recommendation.",
            ),
        };
        self.emit(ControlMessage::notify(
            NotifyLevel::Warning,
            title,
            format!("{detail} {kind} control is unchanged."),
        ))
        .await;
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Apply an operator command; it takes ownership of the kind
    ///
    /// Returns whether the write was accepted.
    pub async fn set_user_command(&mut self, target: ActuatorTarget, requested_at: DateTime<Utc>) -> bool {
        let kind = target.kind();
        let slot = self.override_requested_at.get_mut(kind);
        *slot = Some(slot.map_or(requested_at, |at| at.max(requested_at)));

        let applied = self.apply_command(target, CommandSource::User).await;

        let (title, message) = match target {
            ActuatorTarget::Fan(speed) => ("Fan speed updated.", format!("Fan speed set to {}%.", speed.pct())),
            ActuatorTarget::Light(on) => (
                "Light status updated.",
                format!("Lights turned {}.", if on { "on" } else { "off" }),
            ),
        };
        if applied {
            self.emit(ControlMessage::notify(NotifyLevel::Success, title, message)).await;
        } else {
            self.emit(ControlMessage::notify(
                NotifyLevel::Error,
                format!("Could not update {kind}"),
                format!("The {kind} did not accept the command ({target})."),
            ))
            .await;
        }
        applied
    }

    /// Hand a user-owned kind back to the advisor
    ///
    /// Reuses the stored recommendation when it still matches the current
    /// reading; otherwise returns a request for fresh advice.
    pub async fn clear_override(&mut self, kind: ActuatorKind) -> Option<AdvisoryTicket> {
        if self.session.source(kind) != CommandSource::User {
            tracing::debug!(%kind, "No user override to clear");
            return None;
        }
        self.session.set_source(kind, CommandSource::None);
        self.emit(ControlMessage::SourceChanged {
            kind,
            source: CommandSource::None,
        })
        .await;

        let reusable = match (self.session.recommendation(kind), self.session.reading()) {
            (Some(record), Some(reading))
                if !self.paused
                    && !self.session.is_degraded()
                    && !self.config.hysteresis.exceeded(kind, &record.based_on, reading) =>
            {
                Some(record.recommendation.target())
            }
            _ => None,
        };

        match reusable {
            Some(target) => {
                self.apply_command(target, CommandSource::Ai).await;
                None
            }
            None => self.request_recommendation(kind).await,
        }
    }

    /// The device reported `observed` out of band
    pub async fn acknowledge(&mut self, observed: ActuatorTarget) {
        let kind = observed.kind();
        let expected = self.session.actuators().command.target(kind);
        if observed == expected && !self.session.actuators().is_confirmed(kind) {
            self.session.set_confirmed(kind, true);
            self.emit(ControlMessage::ActuatorConfirmed { target: expected }).await;
        }
    }

    /// Write `target` on behalf of `source`, retrying with backoff
    ///
    /// The command becomes the attempted value and stays unconfirmed until a
    /// read-back matches. If every attempt fails the kind is faulted.
    /// Returns whether the write was accepted.
    pub async fn apply_command(&mut self, target: ActuatorTarget, source: CommandSource) -> bool {
        let kind = target.kind();
        if source == CommandSource::Ai && self.session.source(kind) == CommandSource::User {
            tracing::debug!(%target, "AI write dropped, user override active");
            return false;
        }

        let previous = self.session.source(kind);
        self.session.record_attempt(target, source);
        if previous != source {
            self.emit(ControlMessage::SourceChanged { kind, source }).await;
        }
        self.set_phase(kind, Phase::Applying).await;
        self.emit(ControlMessage::CommandIssued { target, source }).await;

        let mut failure = None;
        for attempt in 0..=self.config.actuator_write_retries {
            if attempt > 0 {
                tracing::warn!(%target, attempt, "Retrying actuator write");
                retry::backoff(self.config.actuator_retry_backoff, attempt - 1).await;
            }
            match self.write(target).await {
                Ok(()) => {
                    failure = None;
                    break;
                }
                Err(e) => failure = Some(e),
            }
        }

        let accepted = match failure {
            None => {
                if self.session.is_faulted(kind) {
                    self.session.set_faulted(kind, false);
                    self.emit(ControlMessage::FaultCleared { kind }).await;
                }
                self.corroborate(kind).await;
                true
            }
            Some(e) => {
                self.session.set_faulted(kind, true);
                self.emit(ControlMessage::ActuatorFaulted {
                    target,
                    error: e.to_string(),
                })
                .await;
                false
            }
        };

        self.set_phase(kind, Phase::Idle).await;
        accepted
    }

    async fn write(&self, target: ActuatorTarget) -> Result<(), ActuatorError> {
        let timeout = self.config.actuator_write_timeout;
        tokio::time::timeout(timeout, self.actuators.write_target(target))
            .await
            .unwrap_or_else(|_| Err(ActuatorError::WriteFailed(format!("write timed out after {timeout:?}"))))
    }

    async fn read_back(&self, kind: ActuatorKind) -> Result<ActuatorTarget, ActuatorError> {
        let timeout = self.config.actuator_write_timeout;
        tokio::time::timeout(timeout, self.actuators.read_target(kind))
            .await
            .unwrap_or_else(|_| Err(ActuatorError::ReadFailed(format!("read timed out after {timeout:?}"))))
    }

    /// Confirm `kind` if the device reports the commanded value
    async fn corroborate(&mut self, kind: ActuatorKind) -> bool {
        let expected = self.session.actuators().command.target(kind);
        match self.read_back(kind).await {
            Ok(observed) if observed == expected => {
                self.session.set_confirmed(kind, true);
                self.emit(ControlMessage::ActuatorConfirmed { target: expected }).await;
                true
            }
            Ok(observed) => {
                tracing::debug!(%expected, %observed, "Device has not reached the target yet");
                false
            }
            Err(e) => {
                tracing::debug!(%kind, error = %e, "Read-back failed");
                false
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn set_phase(&mut self, kind: ActuatorKind, phase: Phase) {
        if self.session.phase(kind) != phase {
            self.session.set_phase(kind, phase);
            self.emit(ControlMessage::PhaseChanged { kind, phase }).await;
        }
    }

    async fn emit(&self, message: ControlMessage) {
        self.observers.notify(&message).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
