//! HTTP Gateways
//!
//! Adapters for sensor and actuator providers that speak JSON over HTTP.
//!
//! | Call | Request | Body |
//! |------|---------|------|
//! | sensor read | `GET {base}/sensors` | `{"temperatureCelsius", "humidity", "oxygen", "lux"?}` |
//! | fan read/write | `GET`/`PUT {base}/fan` | `{"speed": 0..100}` |
//! | light read/write | `GET`/`PUT {base}/light` | `{"isOn": bool}` |

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::traits::{ActuatorGateway, SensorGateway};
use crate::error::{ActuatorError, SensorError};
use crate::session::{ActuatorCommand, ActuatorTarget, FanSpeed, SensorReading};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SensorPayload {
    temperature_celsius: f64,
    humidity: f64,
    oxygen: f64,
    #[serde(default)]
    lux: f64,
}

impl From<SensorPayload> for SensorReading {
    fn from(payload: SensorPayload) -> Self {
        SensorReading::new(
            payload.temperature_celsius,
            payload.humidity,
            payload.oxygen,
            payload.lux,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FanPayload {
    speed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightPayload {
    is_on: bool,
}

fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

// ============================================================================
// Sensor Gateway
// ============================================================================

/// Sensor provider reached over HTTP
#[derive(Debug)]
pub struct HttpSensorGateway {
    client: reqwest::Client,
    base_url: String,
    last_reading: Mutex<Option<SensorReading>>,
}

impl HttpSensorGateway {
    /// Create a gateway for the provider at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            last_reading: Mutex::new(None),
        })
    }

    /// Base URL of the provider
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The last reading this gateway returned
    #[must_use]
    pub fn last_reading(&self) -> Option<SensorReading> {
        self.last_reading.lock().clone()
    }
}

#[async_trait]
impl SensorGateway for HttpSensorGateway {
    fn name(&self) -> &str {
        "http-sensors"
    }

    async fn read(&self) -> Result<SensorReading, SensorError> {
        let url = join(&self.base_url, "sensors");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SensorError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SensorError::Unavailable(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        let payload: SensorPayload = response
            .json()
            .await
            .map_err(|e| SensorError::Unavailable(format!("malformed sensor payload: {e}")))?;

        let reading = SensorReading::from(payload);
        *self.last_reading.lock() = Some(reading.clone());
        Ok(reading)
    }
}

// ============================================================================
// Actuator Gateway
// ============================================================================

/// Actuator provider reached over HTTP
#[derive(Debug)]
pub struct HttpActuatorGateway {
    client: reqwest::Client,
    base_url: String,
    last_applied: Mutex<ActuatorCommand>,
}

impl HttpActuatorGateway {
    /// Create a gateway for the provider at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            last_applied: Mutex::new(ActuatorCommand::default()),
        })
    }

    /// Base URL of the provider
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Targets of the last writes the provider accepted
    #[must_use]
    pub fn last_applied(&self) -> ActuatorCommand {
        *self.last_applied.lock()
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ActuatorError> {
        let url = join(&self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ActuatorError::ReadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ActuatorError::ReadFailed(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ActuatorError::ReadFailed(format!("malformed {path} payload: {e}")))
    }

    async fn put<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), ActuatorError> {
        let url = join(&self.base_url, path);
        let response = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ActuatorError::WriteFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ActuatorError::WriteFailed(format!(
                "PUT {url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ActuatorGateway for HttpActuatorGateway {
    fn name(&self) -> &str {
        "http-actuators"
    }

    async fn read_fan(&self) -> Result<FanSpeed, ActuatorError> {
        let payload: FanPayload = self.get("fan").await?;
        FanSpeed::try_from(payload.speed).map_err(|e| ActuatorError::ReadFailed(e.to_string()))
    }

    async fn read_light(&self) -> Result<bool, ActuatorError> {
        let payload: LightPayload = self.get("light").await?;
        Ok(payload.is_on)
    }

    async fn write_fan(&self, speed: FanSpeed) -> Result<(), ActuatorError> {
        let body = FanPayload {
            speed: i64::from(speed.pct()),
        };
        self.put("fan", &body).await?;
        self.last_applied.lock().set(ActuatorTarget::Fan(speed));
        Ok(())
    }

    async fn write_light(&self, on: bool) -> Result<(), ActuatorError> {
        self.put("light", &LightPayload { is_on: on }).await?;
        self.last_applied.lock().set(ActuatorTarget::Light(on));
        Ok(())
    }
}
