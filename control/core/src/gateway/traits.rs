//! Gateway Traits
//!
//! Contracts for the external sensor and actuator providers. The control loop
//! only ever talks to these traits, so HTTP devices, the simulated farm and test
//! doubles are interchangeable.
//!
//! # Design Philosophy
//!
//! Gateways are thin. They translate one call into one provider request and
//! report failures as typed errors. Timeouts, retries, confirmation and
//! degradation belong to the loop, not to the gateway.
//!
//! - `SensorGateway::read` must be idempotent and safe to call concurrently.
//! - `ActuatorGateway` writes are non-committed until a read-back matches.

use async_trait::async_trait;

use crate::error::{ActuatorError, SensorError};
use crate::session::{ActuatorKind, ActuatorTarget, FanSpeed, SensorReading};

/// Source of environmental readings
#[async_trait]
pub trait SensorGateway: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Read the current environment
    async fn read(&self) -> Result<SensorReading, SensorError>;
}

/// Fan and light device access
#[async_trait]
pub trait ActuatorGateway: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Current fan speed reported by the device
    async fn read_fan(&self) -> Result<FanSpeed, ActuatorError>;

    /// Current light state reported by the device
    async fn read_light(&self) -> Result<bool, ActuatorError>;

    /// Ask the device to run the fan at `speed`
    async fn write_fan(&self, speed: FanSpeed) -> Result<(), ActuatorError>;

    /// Ask the device to switch the lights
    async fn write_light(&self, on: bool) -> Result<(), ActuatorError>;

    /// Read the current value of one kind
    async fn read_target(&self, kind: ActuatorKind) -> Result<ActuatorTarget, ActuatorError> {
        match kind {
            ActuatorKind::Fan => self.read_fan().await.map(ActuatorTarget::Fan),
            ActuatorKind::Light => self.read_light().await.map(ActuatorTarget::Light),
        }
    }

    /// Write a target to the matching device
    async fn write_target(&self, target: ActuatorTarget) -> Result<(), ActuatorError> {
        match target {
            ActuatorTarget::Fan(speed) => self.write_fan(speed).await,
            ActuatorTarget::Light(on) => self.write_light(on).await,
        }
    }
}
