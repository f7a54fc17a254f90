//! Simulated Farm
//!
//! An in-memory sensor and actuator provider. The daemon runs against it when
//! no provider URLs are configured, and tests use it to script failures.
//!
//! Out of the box it reports 25 °C, 60 % humidity, 95 % oxygen and 5,000 lux,
//! with the fan at 50 % and the lights on.
//!
//! Fault injection:
//!
//! - [`SimulatedFarm::fail_sensor_reads`]: the next `n` sensor reads fail
//! - [`SimulatedFarm::fail_writes`]: the next `n` writes to a kind fail
//! - [`SimulatedFarm::fail_reads`]: the next `n` read-backs of a kind fail
//! - [`SimulatedFarm::ignore_writes`]: writes succeed but the device keeps its
//!   old value (a read-back will not corroborate)
//! - [`SimulatedFarm::hang_sensor_reads`], [`SimulatedFarm::hang_writes`],
//!   [`SimulatedFarm::hang_reads`]: the next `n` calls never answer, leaving
//!   the caller's timeout to end them
//!
//! Every write call, failed or not, is appended to the write log.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{ActuatorGateway, SensorGateway};
use crate::error::{ActuatorError, SensorError};
use crate::session::{ActuatorKind, ActuatorTarget, FanSpeed, PerKind, SensorReading};

#[derive(Debug)]
struct FarmState {
    conditions: SensorReading,
    fan: FanSpeed,
    light_on: bool,
    failing_sensor_reads: u32,
    failing_writes: PerKind<u32>,
    failing_reads: PerKind<u32>,
    ignoring_writes: PerKind<bool>,
    hanging_sensor_reads: u32,
    hanging_writes: PerKind<u32>,
    hanging_reads: PerKind<u32>,
    sensor_reads: usize,
    write_log: Vec<ActuatorTarget>,
}

impl Default for FarmState {
    fn default() -> Self {
        Self {
            conditions: SensorReading::new(25.0, 60.0, 95.0, 5_000.0),
            fan: FanSpeed::new(50).unwrap_or_default(),
            light_on: true,
            failing_sensor_reads: 0,
            failing_writes: PerKind::default(),
            failing_reads: PerKind::default(),
            ignoring_writes: PerKind::default(),
            hanging_sensor_reads: 0,
            hanging_writes: PerKind::default(),
            hanging_reads: PerKind::default(),
            sensor_reads: 0,
            write_log: Vec::new(),
        }
    }
}

/// Shared handle to an in-memory farm; clones observe the same state
#[derive(Clone, Debug, Default)]
pub struct SimulatedFarm {
    state: Arc<Mutex<FarmState>>,
}

/// Consume one pending injected failure
fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// A provider call that never answers
async fn hang(call: &str) {
    tracing::debug!(call, "Simulated hang");
    std::future::pending::<()>().await;
}

impl SimulatedFarm {
    /// A farm with the default conditions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the environmental conditions reported by the next reads
    pub fn set_conditions(&self, temperature_celsius: f64, humidity_pct: f64, oxygen_pct: f64, light_lux: f64) {
        self.state.lock().conditions =
            SensorReading::new(temperature_celsius, humidity_pct, oxygen_pct, light_lux);
    }

    /// Set the device-side actuator values without logging a write
    pub fn set_devices(&self, fan: FanSpeed, light_on: bool) {
        let mut state = self.state.lock();
        state.fan = fan;
        state.light_on = light_on;
    }

    /// Fail the next `n` sensor reads
    pub fn fail_sensor_reads(&self, n: u32) {
        self.state.lock().failing_sensor_reads = n;
    }

    /// Fail the next `n` writes to `kind`
    pub fn fail_writes(&self, kind: ActuatorKind, n: u32) {
        *self.state.lock().failing_writes.get_mut(kind) = n;
    }

    /// Fail the next `n` read-backs of `kind`
    pub fn fail_reads(&self, kind: ActuatorKind, n: u32) {
        *self.state.lock().failing_reads.get_mut(kind) = n;
    }

    /// Accept writes to `kind` without changing the device value
    pub fn ignore_writes(&self, kind: ActuatorKind, ignore: bool) {
        *self.state.lock().ignoring_writes.get_mut(kind) = ignore;
    }

    /// Never answer the next `n` sensor reads
    pub fn hang_sensor_reads(&self, n: u32) {
        self.state.lock().hanging_sensor_reads = n;
    }

    /// Never answer the next `n` writes to `kind`; each still lands in the
    /// write log
    pub fn hang_writes(&self, kind: ActuatorKind, n: u32) {
        *self.state.lock().hanging_writes.get_mut(kind) = n;
    }

    /// Never answer the next `n` read-backs of `kind`
    pub fn hang_reads(&self, kind: ActuatorKind, n: u32) {
        *self.state.lock().hanging_reads.get_mut(kind) = n;
    }

    /// Current device fan speed
    #[must_use]
    pub fn fan(&self) -> FanSpeed {
        self.state.lock().fan
    }

    /// Current device light state
    #[must_use]
    pub fn light_on(&self) -> bool {
        self.state.lock().light_on
    }

    /// Number of sensor reads served or failed so far
    #[must_use]
    pub fn sensor_reads(&self) -> usize {
        self.state.lock().sensor_reads
    }

    /// Every write call so far, in order
    #[must_use]
    pub fn write_log(&self) -> Vec<ActuatorTarget> {
        self.state.lock().write_log.clone()
    }

    /// Write calls for one kind, in order
    #[must_use]
    pub fn writes_for(&self, kind: ActuatorKind) -> Vec<ActuatorTarget> {
        self.state
            .lock()
            .write_log
            .iter()
            .filter(|target| target.kind() == kind)
            .copied()
            .collect()
    }

    fn write(&self, target: ActuatorTarget) -> Result<(), ActuatorError> {
        let kind = target.kind();
        let mut state = self.state.lock();
        state.write_log.push(target);

        if take(state.failing_writes.get_mut(kind)) {
            tracing::debug!(%target, "Simulated write failure");
            return Err(ActuatorError::WriteFailed(format!("simulated {kind} write failure")));
        }
        if *state.ignoring_writes.get(kind) {
            return Ok(());
        }
        match target {
            ActuatorTarget::Fan(speed) => state.fan = speed,
            ActuatorTarget::Light(on) => state.light_on = on,
        }
        Ok(())
    }

    async fn write_or_hang(&self, target: ActuatorTarget) -> Result<(), ActuatorError> {
        let hung = {
            let mut state = self.state.lock();
            let hung = take(state.hanging_writes.get_mut(target.kind()));
            if hung {
                state.write_log.push(target);
            }
            hung
        };
        if hung {
            hang("write").await;
        }
        self.write(target)
    }

    async fn read_back_or_hang(&self, kind: ActuatorKind) -> Result<ActuatorTarget, ActuatorError> {
        let hung = {
            let mut state = self.state.lock();
            take(state.hanging_reads.get_mut(kind))
        };
        if hung {
            hang("read-back").await;
        }
        self.read_back(kind)
    }

    fn read_back(&self, kind: ActuatorKind) -> Result<ActuatorTarget, ActuatorError> {
        let mut state = self.state.lock();
        if take(state.failing_reads.get_mut(kind)) {
            return Err(ActuatorError::ReadFailed(format!("simulated {kind} read failure")));
        }
        Ok(match kind {
            ActuatorKind::Fan => ActuatorTarget::Fan(state.fan),
            ActuatorKind::Light => ActuatorTarget::Light(state.light_on),
        })
    }
}

#[async_trait]
impl SensorGateway for SimulatedFarm {
    fn name(&self) -> &str {
        "simulated-sensors"
    }

    async fn read(&self) -> Result<SensorReading, SensorError> {
        let hung = {
            let mut state = self.state.lock();
            state.sensor_reads += 1;
            take(&mut state.hanging_sensor_reads)
        };
        if hung {
            hang("sensor read").await;
        }

        let mut state = self.state.lock();
        if take(&mut state.failing_sensor_reads) {
            return Err(SensorError::Unavailable("simulated sensor outage".into()));
        }
        let mut reading = state.conditions.clone();
        reading.observed_at = chrono::Utc::now();
        Ok(reading)
    }
}

#[async_trait]
impl ActuatorGateway for SimulatedFarm {
    fn name(&self) -> &str {
        "simulated-actuators"
    }

    async fn read_fan(&self) -> Result<FanSpeed, ActuatorError> {
        match self.read_back_or_hang(ActuatorKind::Fan).await? {
            ActuatorTarget::Fan(speed) => Ok(speed),
            ActuatorTarget::Light(_) => Err(ActuatorError::ReadFailed("fan read returned light".into())),
        }
    }

    async fn read_light(&self) -> Result<bool, ActuatorError> {
        match self.read_back_or_hang(ActuatorKind::Light).await? {
            ActuatorTarget::Light(on) => Ok(on),
            ActuatorTarget::Fan(_) => Err(ActuatorError::ReadFailed("light read returned fan".into())),
        }
    }

    async fn write_fan(&self, speed: FanSpeed) -> Result<(), ActuatorError> {
        self.write_or_hang(ActuatorTarget::Fan(speed)).await
    }

    async fn write_light(&self, on: bool) -> Result<(), ActuatorError> {
        self.write_or_hang(ActuatorTarget::Light(on)).await
    }
}
