//! Sensor and Actuator Gateways
//!
//! The control loop's view of the physical farm.
//!
//! # Available Gateways
//!
//! - **HTTP**: JSON providers for sensors and actuators
//! - **Simulated**: in-memory farm with fault injection
//!
//! # Usage
//!
//! ```ignore
//! use farm_control_core::gateway::{SensorGateway, SimulatedFarm};
//!
//! let farm = SimulatedFarm::new();
//! let reading = farm.read().await?;
//! ```

mod http;
mod simulated;
mod traits;

pub use http::{HttpActuatorGateway, HttpSensorGateway};
pub use simulated::SimulatedFarm;
pub use traits::{ActuatorGateway, SensorGateway};
