//! Shared harness for control loop integration tests
//!
//! - [`ScriptedAdvisor`]: advice computed from the reading by a replaceable
//!   policy, with a per-kind gate that holds responses until released
//! - [`Harness`]: a running loop over a [`SimulatedFarm`] plus a log of every
//!   message it has emitted

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use farm_control_core::{
    ActuatorKind, ChannelObserver, ControlConfig, ControlDeps, ControlHandle, ControlLoop, ControlMessage,
    FanRecommendation, FanSpeed, LightRecommendation, ObserverSet, PerKind, RecommendationClient,
    RecommendationError, SensorReading, SessionSnapshot, SimulatedFarm,
};

/// How long a test waits for an expected message
pub const WAIT: Duration = Duration::from_secs(5);

type FanPolicy = dyn Fn(&SensorReading) -> Result<FanRecommendation, RecommendationError> + Send + Sync;
type LightPolicy = dyn Fn(f64) -> Result<LightRecommendation, RecommendationError> + Send + Sync;

// =============================================================================
// Scripted advisor
// =============================================================================

pub struct ScriptedAdvisor {
    fan_policy: Mutex<Arc<FanPolicy>>,
    light_policy: Mutex<Arc<LightPolicy>>,
    answer: Mutex<Result<String, RecommendationError>>,
    held: PerKind<AtomicBool>,
    gates: PerKind<Semaphore>,
    calls: PerKind<AtomicUsize>,
}

impl ScriptedAdvisor {
    /// Fan 90 % when it is hot, 40 % otherwise; lights on below 2,000 lux
    pub fn new() -> Arc<Self> {
        let fan_policy: Arc<FanPolicy> = Arc::new(|reading: &SensorReading| {
            Ok(fan(if reading.temperature_celsius >= 28.0 { 90 } else { 40 }))
        });
        let light_policy: Arc<LightPolicy> = Arc::new(|lux: f64| {
            Ok(LightRecommendation {
                on: lux < 2_000.0,
                explanation: "scripted".into(),
            })
        });
        Arc::new(Self {
            fan_policy: Mutex::new(fan_policy),
            light_policy: Mutex::new(light_policy),
            answer: Mutex::new(Ok("scripted answer".into())),
            held: PerKind::default(),
            gates: PerKind::from_fn(|_| Semaphore::new(0)),
            calls: PerKind::default(),
        })
    }

    pub fn set_fan_policy(
        &self,
        policy: impl Fn(&SensorReading) -> Result<FanRecommendation, RecommendationError> + Send + Sync + 'static,
    ) {
        *self.fan_policy.lock() = Arc::new(policy);
    }

    pub fn set_answer(&self, answer: Result<String, RecommendationError>) {
        *self.answer.lock() = answer;
    }

    /// Hold responses for `kind` until [`ScriptedAdvisor::release`]
    pub fn hold(&self, kind: ActuatorKind) {
        self.held.get(kind).store(true, Ordering::SeqCst);
    }

    pub fn hold_all(&self) {
        for kind in ActuatorKind::ALL {
            self.hold(kind);
        }
    }

    /// Let `n` held responses for `kind` through
    pub fn release(&self, kind: ActuatorKind, n: usize) {
        self.gates.get(kind).add_permits(n);
    }

    pub fn calls(&self, kind: ActuatorKind) -> usize {
        self.calls.get(kind).load(Ordering::SeqCst)
    }

    async fn gate(&self, kind: ActuatorKind) {
        self.calls.get(kind).fetch_add(1, Ordering::SeqCst);
        if self.held.get(kind).load(Ordering::SeqCst) {
            if let Ok(permit) = self.gates.get(kind).acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl RecommendationClient for ScriptedAdvisor {
    async fn recommend_fan_speed(&self, reading: &SensorReading) -> Result<FanRecommendation, RecommendationError> {
        self.gate(ActuatorKind::Fan).await;
        let policy = self.fan_policy.lock().clone();
        policy(reading)
    }

    async fn recommend_light_status(&self, lux: f64) -> Result<LightRecommendation, RecommendationError> {
        self.gate(ActuatorKind::Light).await;
        let policy = self.light_policy.lock().clone();
        policy(lux)
    }

    async fn answer_question(&self, _question: &str) -> Result<String, RecommendationError> {
        self.answer.lock().clone()
    }
}

pub fn fan(pct: u8) -> FanRecommendation {
    FanRecommendation {
        speed: FanSpeed::new(pct).unwrap(),
        explanation: "scripted".into(),
    }
}

pub fn speed(pct: u8) -> FanSpeed {
    FanSpeed::new(pct).unwrap()
}

/// Long poll interval so tests drive ticks explicitly
pub fn test_config() -> ControlConfig {
    ControlConfig {
        poll_interval: Duration::from_secs(3_600),
        recommendation_retry_backoff: Duration::from_millis(1),
        actuator_retry_backoff: Duration::from_millis(1),
        ..ControlConfig::default()
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub control: ControlLoop,
    pub handle: ControlHandle,
    pub farm: SimulatedFarm,
    pub advisor: Arc<ScriptedAdvisor>,
    messages: mpsc::Receiver<ControlMessage>,
    log: Vec<ControlMessage>,
}

impl Harness {
    pub fn start(farm: SimulatedFarm, advisor: Arc<ScriptedAdvisor>) -> Self {
        Self::start_with(farm, advisor, test_config())
    }

    pub fn start_with(farm: SimulatedFarm, advisor: Arc<ScriptedAdvisor>, config: ControlConfig) -> Self {
        let (observer, messages) = ChannelObserver::new(1_024);
        let devices = Arc::new(farm.clone());
        let deps = ControlDeps::new(devices.clone(), devices, advisor.clone());
        let control = ControlLoop::start(config, deps, ObserverSet::new().with(Arc::new(observer)))
            .expect("valid test config");
        let handle = control.handle();
        Self {
            control,
            handle,
            farm,
            advisor,
            messages,
            log: Vec::new(),
        }
    }

    async fn next(&mut self, what: &str) -> ControlMessage {
        let message = tokio::time::timeout(WAIT, self.messages.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}; saw {:#?}", self.log))
            .unwrap_or_else(|| panic!("message stream closed waiting for {what}"));
        self.log.push(message.clone());
        message
    }

    /// Next not-yet-seen message matching `pred`
    pub async fn wait_for(&mut self, what: &str, pred: impl Fn(&ControlMessage) -> bool) -> ControlMessage {
        loop {
            let message = self.next(what).await;
            if pred(&message) {
                return message;
            }
        }
    }

    /// Wait until the whole message log satisfies `done`
    pub async fn wait_until(&mut self, what: &str, done: impl Fn(&[ControlMessage]) -> bool) {
        while !done(&self.log) {
            self.next(what).await;
        }
    }

    /// Snapshot after every earlier intent, then absorb what it produced
    pub async fn settle(&mut self) -> SessionSnapshot {
        let snapshot = self.handle.snapshot().await.expect("loop running");
        while let Ok(message) = self.messages.try_recv() {
            self.log.push(message);
        }
        snapshot
    }

    pub fn count(&self, pred: impl Fn(&ControlMessage) -> bool) -> usize {
        self.log.iter().filter(|m| pred(m)).count()
    }

    pub async fn stop(mut self) {
        self.control.stop().await;
    }
}
