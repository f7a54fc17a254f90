//! TOML Configuration File Support
//!
//! Centralized configuration for the control core and the daemon, read from
//! `~/.config/farm-control/control.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [control]
//! poll_interval_secs = 30
//! sensor_timeout_secs = 5
//! degraded_after_failures = 3
//! recommendation_timeout_secs = 20
//! recommendation_retries = 1
//! actuator_write_timeout_secs = 5
//! actuator_write_retries = 1
//! actuator_retry_backoff_ms = 500
//!
//! [hysteresis]
//! temperature_celsius = 0.5
//! humidity_pct = 2.0
//! oxygen_pct = 2.0
//! light_lux = 200.0
//!
//! [advisor]
//! host = "localhost"
//! port = 11434
//! model = "llama3.2"
//!
//! [gateways]
//! sensor_url = "http://farm.local:8080"
//! actuator_url = "http://farm.local:8080"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{ActuatorKind, SensorReading};

/// Upper bound on advisory retries: one retry after the first attempt
pub const MAX_RECOMMENDATION_RETRIES: u32 = 1;

/// Upper bound on actuator write retries
pub const MAX_ACTUATOR_WRITE_RETRIES: u32 = 3;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Per-channel thresholds below which a reading change is treated as noise
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HysteresisThresholds {
    /// Degrees Celsius
    pub temperature_celsius: f64,
    /// Percentage points of relative humidity
    pub humidity_pct: f64,
    /// Percentage points of oxygen
    pub oxygen_pct: f64,
    /// Lux
    pub light_lux: f64,
}

impl Default for HysteresisThresholds {
    fn default() -> Self {
        Self {
            temperature_celsius: 0.5,
            humidity_pct: 2.0,
            oxygen_pct: 2.0,
            light_lux: 200.0,
        }
    }
}

impl HysteresisThresholds {
    /// Whether `current` moved away from `reference` by more than a threshold
    /// on any channel that feeds `kind`
    ///
    /// The fan is advised from temperature, humidity and oxygen; the lights
    /// from light intensity only.
    #[must_use]
    pub fn exceeded(&self, kind: ActuatorKind, reference: &SensorReading, current: &SensorReading) -> bool {
        let moved = |a: f64, b: f64, threshold: f64| (a - b).abs() > threshold;
        match kind {
            ActuatorKind::Fan => {
                moved(reference.temperature_celsius, current.temperature_celsius, self.temperature_celsius)
                    || moved(reference.humidity_pct, current.humidity_pct, self.humidity_pct)
                    || moved(reference.oxygen_pct, current.oxygen_pct, self.oxygen_pct)
            }
            ActuatorKind::Light => moved(reference.light_lux, current.light_lux, self.light_lux),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("temperature_celsius", self.temperature_celsius),
            ("humidity_pct", self.humidity_pct),
            ("oxygen_pct", self.oxygen_pct),
            ("light_lux", self.light_lux),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "hysteresis.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Control loop tuning
#[derive(Clone, Debug, PartialEq)]
pub struct ControlConfig {
    /// Interval between sensor ticks
    pub poll_interval: Duration,
    /// Bound on a single sensor read
    pub sensor_timeout: Duration,
    /// Consecutive sensor failures before the session is degraded
    pub degraded_after_failures: u32,
    /// Reading changes treated as noise
    pub hysteresis: HysteresisThresholds,
    /// Bound on a single advisory attempt
    pub recommendation_timeout: Duration,
    /// Retries after an unavailable advisor (at most one)
    pub recommendation_retries: u32,
    /// Base delay before an advisory retry
    pub recommendation_retry_backoff: Duration,
    /// After a failed recommendation, how long before an unchanged reading
    /// may ask again
    pub recommendation_failure_cooldown: Duration,
    /// Bound on a single actuator write or read-back
    pub actuator_write_timeout: Duration,
    /// Retries after a failed actuator write
    pub actuator_write_retries: u32,
    /// Base delay before a write retry, doubled per attempt
    pub actuator_retry_backoff: Duration,
    /// Capacity of the intent queue
    pub intent_queue_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            sensor_timeout: Duration::from_secs(5),
            degraded_after_failures: 3,
            hysteresis: HysteresisThresholds::default(),
            recommendation_timeout: Duration::from_secs(20),
            recommendation_retries: 1,
            recommendation_retry_backoff: Duration::from_millis(500),
            recommendation_failure_cooldown: Duration::from_secs(300),
            actuator_write_timeout: Duration::from_secs(5),
            actuator_write_retries: 1,
            actuator_retry_backoff: Duration::from_millis(500),
            intent_queue_capacity: 64,
        }
    }
}

impl ControlConfig {
    /// Check that the values can drive a loop
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.poll_interval.is_zero() {
            return invalid("control.poll_interval must be greater than zero".into());
        }
        if self.sensor_timeout.is_zero() {
            return invalid("control.sensor_timeout must be greater than zero".into());
        }
        if self.degraded_after_failures == 0 {
            return invalid("control.degraded_after_failures must be at least 1".into());
        }
        if self.recommendation_timeout.is_zero() {
            return invalid("control.recommendation_timeout must be greater than zero".into());
        }
        if self.recommendation_retries > MAX_RECOMMENDATION_RETRIES {
            return invalid(format!(
                "control.recommendation_retries must be at most {MAX_RECOMMENDATION_RETRIES}, got {}",
                self.recommendation_retries
            ));
        }
        if self.actuator_write_timeout.is_zero() {
            return invalid("control.actuator_write_timeout must be greater than zero".into());
        }
        if self.actuator_write_retries > MAX_ACTUATOR_WRITE_RETRIES {
            return invalid(format!(
                "control.actuator_write_retries must be at most {MAX_ACTUATOR_WRITE_RETRIES}, got {}",
                self.actuator_write_retries
            ));
        }
        if self.intent_queue_capacity == 0 {
            return invalid("control.intent_queue_capacity must be at least 1".into());
        }
        self.hysteresis.validate()
    }
}

/// Language model connection settings
#[derive(Clone, Debug, PartialEq)]
pub struct AdvisorSettings {
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// Model used for every prompt
    pub model: String,
    /// Sampling temperature; low values keep advice stable
    pub temperature: f32,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
            temperature: 0.2,
        }
    }
}

/// Sensor and actuator provider endpoints
///
/// With no URLs the daemon runs against the simulated farm.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewaySettings {
    /// Base URL of the sensor provider
    pub sensor_url: Option<String>,
    /// Base URL of the actuator provider
    pub actuator_url: Option<String>,
    /// HTTP client timeout
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            sensor_url: None,
            actuator_url: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Control section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlToml {
    /// Interval between sensor ticks in seconds
    pub poll_interval_secs: Option<u64>,
    /// Sensor read timeout in seconds
    pub sensor_timeout_secs: Option<u64>,
    /// Consecutive failures before degrading
    pub degraded_after_failures: Option<u32>,
    /// Advisory timeout in seconds
    pub recommendation_timeout_secs: Option<u64>,
    /// Advisory retries
    pub recommendation_retries: Option<u32>,
    /// Advisory retry backoff in milliseconds
    pub recommendation_retry_backoff_ms: Option<u64>,
    /// Cooldown after a failed recommendation in seconds
    pub recommendation_failure_cooldown_secs: Option<u64>,
    /// Actuator write timeout in seconds
    pub actuator_write_timeout_secs: Option<u64>,
    /// Actuator write retries
    pub actuator_write_retries: Option<u32>,
    /// Actuator retry backoff in milliseconds
    pub actuator_retry_backoff_ms: Option<u64>,
    /// Intent queue capacity
    pub intent_queue_capacity: Option<usize>,
}

/// Hysteresis section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisToml {
    /// Degrees Celsius
    pub temperature_celsius: Option<f64>,
    /// Humidity percentage points
    pub humidity_pct: Option<f64>,
    /// Oxygen percentage points
    pub oxygen_pct: Option<f64>,
    /// Lux
    pub light_lux: Option<f64>,
}

/// Advisor section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorToml {
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// Model name
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Gateways section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaysToml {
    /// Sensor provider base URL
    pub sensor_url: Option<String>,
    /// Actuator provider base URL
    pub actuator_url: Option<String>,
    /// HTTP timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmToml {
    /// Control loop section
    pub control: ControlToml,
    /// Hysteresis section
    pub hysteresis: HysteresisToml,
    /// Advisor section
    pub advisor: AdvisorToml,
    /// Gateways section
    pub gateways: GatewaysToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective configuration from every source
#[derive(Clone, Debug)]
pub struct FarmConfig {
    /// Control loop tuning
    pub control: ControlConfig,
    /// Language model settings
    pub advisor: AdvisorSettings,
    /// Provider endpoints
    pub gateways: GatewaySettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            advisor: AdvisorSettings::default(),
            gateways: GatewaySettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl FarmConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control.validate()?;
        if self.advisor.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "advisor.model must not be empty".into(),
            ));
        }
        if self.gateways.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "gateways.request_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/farm-control/control.toml` or
/// `~/.config/farm-control/control.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("farm-control").join("control.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<FarmConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FarmConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<FarmConfig, ConfigError> {
    let mut config = FarmConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FarmToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut FarmConfig, toml: &FarmToml) {
    let control = &mut config.control;
    if let Some(secs) = toml.control.poll_interval_secs {
        control.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.control.sensor_timeout_secs {
        control.sensor_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = toml.control.degraded_after_failures {
        control.degraded_after_failures = n;
    }
    if let Some(secs) = toml.control.recommendation_timeout_secs {
        control.recommendation_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = toml.control.recommendation_retries {
        control.recommendation_retries = n;
    }
    if let Some(ms) = toml.control.recommendation_retry_backoff_ms {
        control.recommendation_retry_backoff = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.control.recommendation_failure_cooldown_secs {
        control.recommendation_failure_cooldown = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.control.actuator_write_timeout_secs {
        control.actuator_write_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = toml.control.actuator_write_retries {
        control.actuator_write_retries = n;
    }
    if let Some(ms) = toml.control.actuator_retry_backoff_ms {
        control.actuator_retry_backoff = Duration::from_millis(ms);
    }
    if let Some(n) = toml.control.intent_queue_capacity {
        control.intent_queue_capacity = n;
    }

    // Hysteresis
    let hysteresis = &mut control.hysteresis;
    if let Some(v) = toml.hysteresis.temperature_celsius {
        hysteresis.temperature_celsius = v;
    }
    if let Some(v) = toml.hysteresis.humidity_pct {
        hysteresis.humidity_pct = v;
    }
    if let Some(v) = toml.hysteresis.oxygen_pct {
        hysteresis.oxygen_pct = v;
    }
    if let Some(v) = toml.hysteresis.light_lux {
        hysteresis.light_lux = v;
    }

    // Advisor
    if let Some(ref host) = toml.advisor.host {
        config.advisor.host.clone_from(host);
    }
    if let Some(port) = toml.advisor.port {
        config.advisor.port = port;
    }
    if let Some(ref model) = toml.advisor.model {
        config.advisor.model.clone_from(model);
    }
    if let Some(temperature) = toml.advisor.temperature {
        config.advisor.temperature = temperature;
    }

    // Gateways
    if toml.gateways.sensor_url.is_some() {
        config.gateways.sensor_url.clone_from(&toml.gateways.sensor_url);
    }
    if toml.gateways.actuator_url.is_some() {
        config.gateways.actuator_url.clone_from(&toml.gateways.actuator_url);
    }
    if let Some(secs) = toml.gateways.request_timeout_secs {
        config.gateways.request_timeout = Duration::from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut FarmConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(secs) = env("FARM_POLL_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.control.poll_interval = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env("FARM_DEGRADED_AFTER").and_then(|v| v.parse::<u32>().ok()) {
        config.control.degraded_after_failures = n;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("FARM_RECOMMENDATION_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.control.recommendation_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }

    // Gateways
    if let Some(url) = env("FARM_SENSOR_URL") {
        config.gateways.sensor_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("FARM_ACTUATOR_URL") {
        config.gateways.actuator_url = Some(url);
        config.source = ConfigSource::Env;
    }

    // Advisor (OLLAMA_* shared with the Ollama tooling)
    if let Some(model) = env("FARM_ADVISOR_MODEL") {
        config.advisor.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(host) = env("OLLAMA_HOST") {
        config.advisor.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.advisor.port = port;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Poll interval override (seconds)
    pub poll_interval_secs: Option<u64>,

    /// Sensor provider URL override
    pub sensor_url: Option<String>,

    /// Actuator provider URL override
    pub actuator_url: Option<String>,

    /// Model override
    pub model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Set sensor URL override
    #[must_use]
    pub fn with_sensor_url(mut self, url: String) -> Self {
        self.sensor_url = Some(url);
        self
    }

    /// Set actuator URL override
    #[must_use]
    pub fn with_actuator_url(mut self, url: String) -> Self {
        self.actuator_url = Some(url);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut FarmConfig) {
        if self.poll_interval_secs.is_some()
            || self.sensor_url.is_some()
            || self.actuator_url.is_some()
            || self.model.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(secs) = self.poll_interval_secs {
            config.control.poll_interval = Duration::from_secs(secs);
        }
        if self.sensor_url.is_some() {
            config.gateways.sensor_url.clone_from(&self.sensor_url);
        }
        if self.actuator_url.is_some() {
            config.gateways.actuator_url.clone_from(&self.actuator_url);
        }
        if let Some(ref model) = self.model {
            config.advisor.model.clone_from(model);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
