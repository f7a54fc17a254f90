//! Farm Control Core - Headless Sensor/Actuator Reconciliation
//!
//! This crate keeps a farm's fan and lights in line with what the sensors
//! report, what a language-model advisor recommends, and what the operator
//! commands. It has no UI: a dashboard, a console, or a test drives it through
//! a [`ControlHandle`] and watches it through [`SessionObserver`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Surfaces                              │
//! │   ┌───────────┐   ┌───────────┐   ┌───────────────────────┐     │
//! │   │  Console  │   │ Dashboard │   │   Tests / Headless    │     │
//! │   └─────┬─────┘   └─────┬─────┘   └───────────┬───────────┘     │
//! │         └───────────────┴─────────────────────┘                 │
//! │                         │                                       │
//! │          ControlIntent (up)    ControlMessage (down)            │
//! └─────────────────────────┼───────────────────────────────────────┘
//!                           │
//! ┌─────────────────────────┼───────────────────────────────────────┐
//! │                   CONTROL CORE                                  │
//! │  ┌──────────────────────┴────────────────────────────────────┐  │
//! │  │                     ControlLoop                           │  │
//! │  │  ┌────────────┐  ┌─────────────┐  ┌─────────────────────┐ │  │
//! │  │  │ Reconciler │  │  Session    │  │  Observers          │ │  │
//! │  │  └─────┬──────┘  └─────────────┘  └─────────────────────┘ │  │
//! │  └────────┼──────────────────────────────────────────────────┘  │
//! │     ┌─────┴─────────────┬────────────────────────┐              │
//! │  ┌──┴────────────┐ ┌────┴───────────┐ ┌──────────┴───────────┐  │
//! │  │ SensorGateway │ │ActuatorGateway │ │ RecommendationClient │  │
//! │  └───────────────┘ └────────────────┘ └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ControlLoop`]: Runs the reconciliation on its own task
//! - [`ControlHandle`]: Issues operator commands and queries
//! - [`ControlMessage`]: Everything the loop reports to observers
//! - [`ControlSession`]: Readings, actuator state, sources and recommendations
//! - [`Reconciler`]: The state machine, usable without the loop in tests
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use farm_control_core::{
//!     ControlConfig, ControlDeps, ControlLoop, ObserverSet, TracingObserver,
//!     advisor::LlmAdvisor,
//!     backend::OllamaBackend,
//!     gateway::SimulatedFarm,
//! };
//!
//! let farm = Arc::new(SimulatedFarm::new());
//! let backend = OllamaBackend::new("localhost", 11434, Duration::from_secs(20))?;
//! // The loop adds the configured timeout and retry around the advisor
//! let advisor = LlmAdvisor::new(Arc::new(backend), "llama3.2");
//! let deps = ControlDeps::new(farm.clone(), farm, Arc::new(advisor));
//!
//! let mut control = ControlLoop::start(config, deps, ObserverSet::new().with(Arc::new(TracingObserver)))?;
//! control.handle().set_fan_speed(40).await?;
//! control.stop().await;
//! ```
//!
//! # Module Overview
//!
//! - [`advisor`]: Recommendation client contract, LLM advisor, timeout/retry
//! - [`backend`]: LLM backend abstraction (Ollama)
//! - [`config`]: Layered configuration (defaults, TOML, environment, CLI)
//! - [`control_loop`]: The loop task and its handle
//! - [`error`]: Error taxonomy
//! - [`events`]: Intents from surfaces to the loop
//! - [`gateway`]: Sensor and actuator providers (HTTP, simulated)
//! - [`messages`]: Messages from the loop to observers
//! - [`observer`]: Observer fan-out and stock observers
//! - [`reconcile`]: The reconciliation state machine
//! - [`session`]: Session aggregate and domain values

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod advisor;
pub mod backend;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod events;
pub mod gateway;
pub mod messages;
pub mod observer;
pub mod reconcile;
mod retry;
pub mod session;

// Re-exports for convenience
pub use advisor::{LlmAdvisor, RecommendationClient, ResilientAdvisor};
pub use backend::{LlmBackend, LlmRequest, LlmResponse, ModelInfo, OllamaBackend};
pub use config::{
    load_config, load_config_from_path, AdvisorSettings, ConfigError, ConfigOverrides, ConfigSource, ControlConfig,
    FarmConfig, GatewaySettings, HysteresisThresholds,
};
pub use control_loop::{ControlDeps, ControlHandle, ControlLoop};
pub use error::{ActuatorError, AdvisoryFailure, CommandError, ControlError, RecommendationError, SensorError};
pub use events::ControlIntent;
pub use gateway::{ActuatorGateway, HttpActuatorGateway, HttpSensorGateway, SensorGateway, SimulatedFarm};
pub use messages::{ControlMessage, DiscardReason, LoopState, NotifyLevel, SessionId};
pub use observer::{
    ChannelObserver, HistoryObserver, ObserverSet, ReadingAverages, ReadingHistory, SessionObserver, TracingObserver,
};
pub use reconcile::{AdvisoryTicket, Reconciler};
pub use session::{
    ActuatorCommand, ActuatorKind, ActuatorState, ActuatorTarget, CommandSource, ControlSession, FanRecommendation,
    FanSpeed, LightRecommendation, PerKind, Phase, Recommendation, RecommendationRecord, SensorReading,
    SessionSnapshot,
};
