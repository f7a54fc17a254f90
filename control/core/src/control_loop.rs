//! Control Loop
//!
//! Runs a [`Reconciler`] on a single task. Sensor ticks, operator intents and
//! recommendation completions all arrive on that task and are handled one at a
//! time, so the session never needs a lock.
//!
//! # Design Philosophy
//!
//! The loop owns the state; surfaces own a [`ControlHandle`]. A handle is a
//! cheap clone around a bounded intent queue, so a slow advisor can never block
//! an operator: advisory calls run on spawned tasks and report back through the
//! completion channel.
//!
//! ```text
//!  ControlHandle ──intents──┐
//!                           ▼
//!  interval tick ────► [ loop task ] ──► Reconciler ──► ObserverSet
//!                           ▲                │
//!  advisory tasks ──done────┘◄──spawn────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let control = ControlLoop::start(config, deps, observers)?;
//! let handle = control.handle();
//! handle.set_fan_speed(40).await?;
//! let snapshot = handle.snapshot().await?;
//! control.stop().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::advisor::{self, RecommendationClient, ResilientAdvisor};
use crate::config::{ConfigError, ControlConfig};
use crate::error::{ControlError, RecommendationError};
use crate::events::ControlIntent;
use crate::gateway::{ActuatorGateway, SensorGateway};
use crate::observer::ObserverSet;
use crate::reconcile::{AdvisoryTicket, Reconciler};
use crate::session::{ActuatorKind, ActuatorTarget, FanSpeed, Recommendation, SessionSnapshot};

type Completion = (AdvisoryTicket, Result<Recommendation, RecommendationError>);

/// External collaborators of the loop
#[derive(Clone)]
pub struct ControlDeps {
    /// Sensor provider
    pub sensors: Arc<dyn SensorGateway>,
    /// Actuator provider
    pub actuators: Arc<dyn ActuatorGateway>,
    /// Advisory service; the loop bounds and retries its calls
    pub advisor: Arc<dyn RecommendationClient>,
}

impl ControlDeps {
    /// Bundle the three collaborators
    pub fn new(
        sensors: Arc<dyn SensorGateway>,
        actuators: Arc<dyn ActuatorGateway>,
        advisor: Arc<dyn RecommendationClient>,
    ) -> Self {
        Self {
            sensors,
            actuators,
            advisor,
        }
    }
}

/// A running control loop
pub struct ControlLoop {
    handle: ControlHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ControlLoop {
    /// Validate `config` and spawn the loop
    ///
    /// Must be called from within a Tokio runtime. The first sensor tick runs
    /// immediately after the actuators are seeded.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` is out of range.
    pub fn start(config: ControlConfig, deps: ControlDeps, observers: ObserverSet) -> Result<Self, ConfigError> {
        config.validate()?;

        // Every advisory call gets the configured timeout and retry policy
        let advisor: Arc<dyn RecommendationClient> = Arc::new(ResilientAdvisor::from_config(deps.advisor, &config));

        let (tx, rx) = mpsc::channel(config.intent_queue_capacity);
        let cancel = CancellationToken::new();
        let poll_interval = config.poll_interval;
        let reconciler = Reconciler::new(config, deps.sensors, deps.actuators, observers);

        tracing::info!(?poll_interval, "Starting control loop");
        let task = tokio::spawn(run(reconciler, advisor, rx, cancel.clone(), poll_interval));

        Ok(Self {
            handle: ControlHandle { tx },
            cancel,
            task: Some(task),
        })
    }

    /// A handle for issuing intents
    #[must_use]
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Whether the loop task is still alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for it to wind down
    ///
    /// Handles fail with [`ControlError::LoopStopped`] afterwards.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Control loop task ended abnormally");
            }
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Loop task
// ============================================================================

async fn run(
    mut reconciler: Reconciler,
    advisor: Arc<dyn RecommendationClient>,
    mut intents: mpsc::Receiver<ControlIntent>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    reconciler.initialize().await;

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!("Control loop cancelled");
                break;
            }

            Some(intent) = intents.recv() => {
                tracing::trace!(intent = intent.name(), "Handling intent");
                match intent {
                    ControlIntent::SetUserCommand { target, requested_at } => {
                        reconciler.set_user_command(target, requested_at).await;
                    }
                    ControlIntent::ClearOverride { kind } => {
                        let ticket = reconciler.clear_override(kind).await;
                        dispatch(&advisor, ticket, &done_tx);
                    }
                    ControlIntent::Acknowledge { observed } => reconciler.acknowledge(observed).await,
                    ControlIntent::RefreshRecommendation { kind } => {
                        let ticket = reconciler.request_recommendation(kind).await;
                        dispatch(&advisor, ticket, &done_tx);
                    }
                    ControlIntent::TickNow => {
                        let tickets = reconciler.on_sensor_tick().await;
                        dispatch(&advisor, tickets, &done_tx);
                    }
                    ControlIntent::Pause => reconciler.pause().await,
                    ControlIntent::Resume => {
                        reconciler.resume().await;
                        let tickets = reconciler.on_sensor_tick().await;
                        dispatch(&advisor, tickets, &done_tx);
                        ticker.reset();
                    }
                    ControlIntent::Ask { question, reply } => {
                        let advisor = Arc::clone(&advisor);
                        tokio::spawn(async move {
                            let answer = advisor.answer_question(&question).await;
                            if reply.send(answer).is_err() {
                                tracing::debug!("Asker went away before the answer arrived");
                            }
                        });
                    }
                    ControlIntent::Snapshot { reply } => {
                        if reply.send(reconciler.snapshot()).is_err() {
                            tracing::debug!("Snapshot requester went away");
                        }
                    }
                }
            }

            Some((ticket, result)) = done_rx.recv() => {
                reconciler.complete_recommendation(ticket, result).await;
            }

            _ = ticker.tick() => {
                let tickets = reconciler.on_sensor_tick().await;
                dispatch(&advisor, tickets, &done_tx);
            }
        }
    }

    reconciler.shutdown().await;
    tracing::info!("Control loop stopped");
}

/// Run advisory requests off the loop task
fn dispatch(
    advisor: &Arc<dyn RecommendationClient>,
    tickets: impl IntoIterator<Item = AdvisoryTicket>,
    done: &mpsc::UnboundedSender<Completion>,
) {
    for ticket in tickets {
        let advisor = Arc::clone(advisor);
        let done = done.clone();
        tokio::spawn(async move {
            let result = advisor::recommend(advisor.as_ref(), ticket.kind, &ticket.reading).await;
            if done.send((ticket, result)).is_err() {
                tracing::debug!("Control loop gone, recommendation dropped");
            }
        });
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front door to a running [`ControlLoop`]
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlIntent>,
}

impl ControlHandle {
    async fn send(&self, intent: ControlIntent) -> Result<(), ControlError> {
        self.tx.send(intent).await.map_err(|_| ControlError::LoopStopped)
    }

    /// Apply an operator command, stamped now
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn set_user_command(&self, target: ActuatorTarget) -> Result<(), ControlError> {
        self.send(ControlIntent::user_command(target)).await
    }

    /// Set the fan speed in percent
    ///
    /// # Errors
    ///
    /// [`ControlError::Command`] if `pct` is outside 0..=100, otherwise as
    /// [`ControlHandle::set_user_command`].
    pub async fn set_fan_speed(&self, pct: i64) -> Result<(), ControlError> {
        let speed = FanSpeed::try_from(pct)?;
        self.set_user_command(ActuatorTarget::Fan(speed)).await
    }

    /// Switch the lights
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn set_light(&self, on: bool) -> Result<(), ControlError> {
        self.set_user_command(ActuatorTarget::Light(on)).await
    }

    /// Hand `kind` back to the advisor
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn clear_override(&self, kind: ActuatorKind) -> Result<(), ControlError> {
        self.send(ControlIntent::ClearOverride { kind }).await
    }

    /// Ask for fresh advice for `kind` now
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn refresh_recommendation(&self, kind: ActuatorKind) -> Result<(), ControlError> {
        self.send(ControlIntent::RefreshRecommendation { kind }).await
    }

    /// Report a value the device published on its own
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn acknowledge(&self, observed: ActuatorTarget) -> Result<(), ControlError> {
        self.send(ControlIntent::Acknowledge { observed }).await
    }

    /// Poll the sensors now
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn tick_now(&self) -> Result<(), ControlError> {
        self.send(ControlIntent::TickNow).await
    }

    /// Suspend polling
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn pause(&self) -> Result<(), ControlError> {
        self.send(ControlIntent::Pause).await
    }

    /// Resume polling with an immediate tick
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn resume(&self) -> Result<(), ControlError> {
        self.send(ControlIntent::Resume).await
    }

    /// Copy of the session once every earlier intent has been handled
    ///
    /// # Errors
    ///
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlIntent::Snapshot { reply }).await?;
        rx.await.map_err(|_| ControlError::LoopStopped)
    }

    /// Forward a free-form question to the advisor
    ///
    /// # Errors
    ///
    /// [`ControlError::Advisory`] if the advisor fails, or
    /// [`ControlError::LoopStopped`] if the loop is gone.
    pub async fn ask(&self, question: impl Into<String>) -> Result<String, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlIntent::Ask {
            question: question.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| ControlError::LoopStopped)??)
    }

    /// Whether the loop has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
