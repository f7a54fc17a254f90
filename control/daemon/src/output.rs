//! Console output for control messages
//!
//! Operator-facing lines only: toasts, advice and actuator faults. Everything
//! else goes to the log through `TracingObserver`.

use async_trait::async_trait;
use farm_control_core::{ControlMessage, NotifyLevel, SessionObserver};
use tokio::io::AsyncWriteExt;

/// Prints operator-facing messages to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver;

/// The console line for `message`, if it has one
pub fn render(message: &ControlMessage) -> Option<String> {
    match message {
        ControlMessage::Notify { level, title, message } => {
            let tag = match level {
                NotifyLevel::Info => "info",
                NotifyLevel::Success => "ok",
                NotifyLevel::Warning => "warn",
                NotifyLevel::Error => "error",
            };
            Some(format!("[{tag}] {title} {message}"))
        }
        ControlMessage::RecommendationReceived { recommendation, applied } => {
            let note = if *applied { "" } else { " (not applied)" };
            Some(format!(
                "[advisor] {}{note}: {}",
                recommendation.target(),
                recommendation.explanation()
            ))
        }
        ControlMessage::ActuatorFaulted { target, error } => Some(format!("[fault] {target}: {error}")),
        _ => None,
    }
}

#[async_trait]
impl SessionObserver for ConsoleObserver {
    async fn notify(&self, message: &ControlMessage) {
        let Some(line) = render(message) else {
            return;
        };
        let mut out = tokio::io::stdout();
        let written = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(error = %e, "Failed to write console output");
        }
    }
}
