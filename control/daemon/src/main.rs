//! Farm Control Daemon
//!
//! Runs the control loop against real providers or the simulated farm, with an
//! operator console on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Simulated farm, local Ollama
//! farm-control-daemon
//!
//! # Real providers
//! farm-control-daemon --sensor-url http://farm.local:8080 --actuator-url http://farm.local:8080
//!
//! # With config file
//! farm-control-daemon --config /etc/farm-control/control.toml
//!
//! # Verbose logging
//! RUST_LOG=debug farm-control-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod console;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use farm_control_core::{
    config::default_config_path, load_config_from_path, ActuatorGateway, ConfigOverrides, ControlDeps, ControlLoop,
    FarmConfig, HistoryObserver, HttpActuatorGateway, HttpSensorGateway, LlmAdvisor, LlmBackend, ObserverSet,
    OllamaBackend, SensorGateway, SimulatedFarm, TracingObserver,
};

use console::ConsoleExit;
use output::ConsoleObserver;

/// Readings kept for the `history` command
const HISTORY_CAPACITY: usize = 120;

/// Farm Control Daemon - keeps fan and lights in line with sensors, advice and operator commands
#[derive(Parser, Debug)]
#[command(name = "farm-control-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "FARM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Sensor provider base URL
    #[arg(long, value_name = "URL")]
    sensor_url: Option<String>,

    /// Actuator provider base URL
    #[arg(long, value_name = "URL")]
    actuator_url: Option<String>,

    /// Advisor model name
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Seconds between sensor polls
    #[arg(long, value_name = "SECS")]
    poll_interval_secs: Option<u64>,

    /// Use the simulated farm even if provider URLs are configured
    #[arg(long)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FARM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(secs) = self.poll_interval_secs {
            overrides = overrides.with_poll_interval_secs(secs);
        }
        if let Some(ref url) = self.sensor_url {
            overrides = overrides.with_sensor_url(url.clone());
        }
        if let Some(ref url) = self.actuator_url {
            overrides = overrides.with_actuator_url(url.clone());
        }
        if let Some(ref model) = self.model {
            overrides = overrides.with_model(model.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout stays with the console.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("farm_control_daemon={level},farm_control_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Sensor and actuator providers for the effective configuration
fn build_gateways(config: &FarmConfig, simulate: bool) -> Result<(Arc<dyn SensorGateway>, Arc<dyn ActuatorGateway>)> {
    let gateways = &config.gateways;
    if simulate || (gateways.sensor_url.is_none() && gateways.actuator_url.is_none()) {
        info!("Using the simulated farm");
        let farm = Arc::new(SimulatedFarm::new());
        let sensors: Arc<dyn SensorGateway> = farm.clone();
        return Ok((sensors, farm));
    }

    let (Some(sensor_url), Some(actuator_url)) = (&gateways.sensor_url, &gateways.actuator_url) else {
        anyhow::bail!("Both a sensor URL and an actuator URL are required for HTTP providers (or use --simulate)");
    };
    info!(sensor_url = %sensor_url, actuator_url = %actuator_url, "Using HTTP providers");
    let sensors =
        HttpSensorGateway::new(sensor_url.clone(), gateways.request_timeout).context("Failed to build sensor gateway")?;
    let actuators = HttpActuatorGateway::new(actuator_url.clone(), gateways.request_timeout)
        .context("Failed to build actuator gateway")?;
    let sensors: Arc<dyn SensorGateway> = Arc::new(sensors);
    Ok((sensors, Arc::new(actuators)))
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Farm control daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Configuration: defaults < file < environment < CLI
    let mut config =
        load_config_from_path(args.config.clone().or_else(default_config_path)).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(
        source = ?config.source(),
        file = ?config.config_file_path,
        poll_interval = ?config.control.poll_interval,
        model = %config.advisor.model,
        "Configuration loaded"
    );

    let (sensors, actuators) = build_gateways(&config, args.simulate)?;

    // Advisor: Ollama transport, prompt/validation; the loop adds timeout/retry
    let backend = Arc::new(
        OllamaBackend::from_settings(&config.advisor, config.control.recommendation_timeout)
            .context("Failed to build Ollama client")?,
    );
    if backend.health_check().await {
        match backend.has_model(&config.advisor.model).await {
            Ok(true) => info!(model = %config.advisor.model, "Advisor model available"),
            Ok(false) => warn!(
                model = %config.advisor.model,
                "Advisor model not found; recommendations will fail until it is pulled"
            ),
            Err(e) => warn!(error = %e, "Could not list advisor models"),
        }
    } else {
        warn!(
            url = %backend.base_url(),
            "Ollama is not reachable; running with manual control only until it is"
        );
    }
    let advisor = LlmAdvisor::from_settings(backend, &config.advisor);

    let history = Arc::new(HistoryObserver::new(HISTORY_CAPACITY));
    let observers = ObserverSet::new()
        .with(Arc::new(TracingObserver))
        .with(history.clone())
        .with(Arc::new(ConsoleObserver));

    let deps = ControlDeps::new(sensors, actuators, Arc::new(advisor));
    let mut control = ControlLoop::start(config.control.clone(), deps, observers).context("Failed to start control loop")?;

    let console = tokio::spawn(console::run(control.handle(), history));

    // Run until a signal, `quit`, or the loop dies
    let result = tokio::select! {
        signal = shutdown_signal() => signal,
        exit = console => match exit {
            Ok(Ok(ConsoleExit::Quit)) => {
                info!("Quit requested from console");
                Ok(())
            }
            Ok(Ok(ConsoleExit::LoopStopped)) => Err(anyhow::anyhow!("Control loop stopped unexpectedly")),
            Ok(Ok(ConsoleExit::Eof)) => {
                info!("Console input closed; running until signalled");
                shutdown_signal().await
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Console failed; running until signalled");
                shutdown_signal().await
            }
            Err(e) => {
                warn!(error = %e, "Console task ended abnormally; running until signalled");
                shutdown_signal().await
            }
        },
    };

    // Cleanup
    info!("Shutting down...");
    control.stop().await;

    match result {
        Ok(()) => {
            info!("Farm control daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
