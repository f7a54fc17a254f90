//! Session Observers
//!
//! Sinks for [`ControlMessage`]s. The loop publishes every state transition to
//! an [`ObserverSet`]; observers render, log or record, and never feed back into
//! the loop except through a [`ControlHandle`](crate::ControlHandle).
//!
//! # Available Observers
//!
//! - [`ChannelObserver`]: forwards messages to a tokio channel (UIs, tests)
//! - [`TracingObserver`]: structured log line per message
//! - [`HistoryObserver`]: bounded ring buffer of readings with averages, the
//!   data a dashboard chart is drawn from

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::messages::{ControlMessage, NotifyLevel};
use crate::session::SensorReading;

/// Receives state transitions from the control loop
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// Called once per message, in production order
    async fn notify(&self, message: &ControlMessage);
}

/// Fan-out to several observers
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl ObserverSet {
    /// An empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer (builder style)
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add an observer
    pub fn push(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    /// Number of observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether there are no observers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `message` to every observer in registration order
    pub async fn notify(&self, message: &ControlMessage) {
        for observer in &self.observers {
            observer.notify(message).await;
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Forwards every message into an mpsc channel
///
/// Delivery never waits: the loop keeps serving commands however slow the
/// consumer is. When the channel is full the message is dropped and logged,
/// so size `capacity` for the consumer's worst burst. A dropped receiver is
/// logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ControlMessage>,
}

impl ChannelObserver {
    /// Create an observer and the receiver it feeds
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SessionObserver for ChannelObserver {
    async fn notify(&self, message: &ControlMessage) {
        match self.tx.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    capacity = self.tx.max_capacity(),
                    "Observer channel full, control message dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Failed to forward control message: receiver closed");
            }
        }
    }
}

// ============================================================================
// Tracing
// ============================================================================

/// Logs every message with structured fields
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

#[async_trait]
impl SessionObserver for TracingObserver {
    async fn notify(&self, message: &ControlMessage) {
        match message {
            ControlMessage::Started { snapshot } => {
                tracing::info!(session = %snapshot.session_id, "Control loop started");
            }
            ControlMessage::Stopped { snapshot } => {
                tracing::info!(session = %snapshot.session_id, "Control loop stopped");
            }
            ControlMessage::LoopState { state } => {
                tracing::info!(state = state.description(), "Loop state changed");
            }
            ControlMessage::ReadingUpdated { reading } => tracing::debug!(
                temperature = reading.temperature_celsius,
                humidity = reading.humidity_pct,
                oxygen = reading.oxygen_pct,
                lux = reading.light_lux,
                "Reading updated"
            ),
            ControlMessage::SensorReadFailed {
                consecutive_failures,
                error,
            } => tracing::warn!(consecutive_failures, error = %error, "Sensor read failed"),
            ControlMessage::DegradedChanged { degraded: true } => {
                tracing::warn!("Sensing degraded, recommendations suspended");
            }
            ControlMessage::DegradedChanged { degraded: false } => {
                tracing::info!("Sensing recovered, recommendations resumed");
            }
            ControlMessage::PhaseChanged { kind, phase } => {
                tracing::trace!(%kind, phase = phase.description(), "Phase changed");
            }
            ControlMessage::RecommendationRequested {
                kind, generation, ..
            } => tracing::debug!(%kind, generation, "Recommendation requested"),
            ControlMessage::RecommendationReceived {
                recommendation,
                applied,
            } => tracing::info!(
                kind = %recommendation.kind(),
                target = %recommendation.target(),
                applied,
                explanation = recommendation.explanation(),
                "Recommendation received"
            ),
            ControlMessage::RecommendationDiscarded { kind, reason } => {
                tracing::debug!(%kind, ?reason, "Recommendation discarded");
            }
            ControlMessage::RecommendationFailed {
                kind,
                failure,
                error,
            } => tracing::warn!(%kind, ?failure, error = %error, "Recommendation failed"),
            ControlMessage::SourceChanged { kind, source } => {
                tracing::info!(%kind, ?source, "Command source changed");
            }
            ControlMessage::CommandIssued { target, source } => {
                tracing::info!(%target, ?source, "Command issued");
            }
            ControlMessage::ActuatorConfirmed { target } => {
                tracing::debug!(%target, "Actuator confirmed");
            }
            ControlMessage::ActuatorFaulted { target, error } => {
                tracing::error!(%target, error = %error, "Actuator faulted");
            }
            ControlMessage::FaultCleared { kind } => tracing::info!(%kind, "Actuator fault cleared"),
            ControlMessage::Notify {
                level,
                title,
                message,
            } => match level {
                NotifyLevel::Error => tracing::error!(title = %title, "{}", message),
                NotifyLevel::Warning => tracing::warn!(title = %title, "{}", message),
                NotifyLevel::Info | NotifyLevel::Success => {
                    tracing::info!(title = %title, "{}", message);
                }
            },
        }
    }
}

// ============================================================================
// Reading History
// ============================================================================

/// Mean of each sensor channel over a window
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ReadingAverages {
    /// Mean temperature
    pub temperature_celsius: f64,
    /// Mean humidity
    pub humidity_pct: f64,
    /// Mean oxygen
    pub oxygen_pct: f64,
    /// Mean light intensity
    pub light_lux: f64,
    /// Number of readings averaged
    pub samples: usize,
}

/// Bounded ring buffer of readings, oldest evicted first
#[derive(Clone, Debug)]
pub struct ReadingHistory {
    capacity: usize,
    readings: VecDeque<SensorReading>,
}

impl ReadingHistory {
    /// A history holding at most `capacity` readings (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, evicting the oldest when full
    pub fn push(&mut self, reading: SensorReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    /// Readings oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    /// Number of readings held
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether no readings are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Channel means, or `None` when empty
    #[must_use]
    pub fn averages(&self) -> Option<ReadingAverages> {
        if self.readings.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.readings.len() as f64;
        let sum = |f: fn(&SensorReading) -> f64| self.readings.iter().map(f).sum::<f64>() / n;
        Some(ReadingAverages {
            temperature_celsius: sum(|r| r.temperature_celsius),
            humidity_pct: sum(|r| r.humidity_pct),
            oxygen_pct: sum(|r| r.oxygen_pct),
            light_lux: sum(|r| r.light_lux),
            samples: self.readings.len(),
        })
    }
}

/// Records every reading the loop publishes into a [`ReadingHistory`]
#[derive(Debug)]
pub struct HistoryObserver {
    history: Mutex<ReadingHistory>,
}

impl HistoryObserver {
    /// Keep the last `capacity` readings
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(ReadingHistory::new(capacity)),
        }
    }

    /// Copy of the buffered readings, oldest first
    #[must_use]
    pub fn readings(&self) -> Vec<SensorReading> {
        self.history.lock().iter().cloned().collect()
    }

    /// Channel means over the buffer
    #[must_use]
    pub fn averages(&self) -> Option<ReadingAverages> {
        self.history.lock().averages()
    }
}

#[async_trait]
impl SessionObserver for HistoryObserver {
    async fn notify(&self, message: &ControlMessage) {
        if let ControlMessage::ReadingUpdated { reading } = message {
            self.history.lock().push(reading.clone());
        }
    }
}
