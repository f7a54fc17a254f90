//! Operator Console
//!
//! Line-oriented commands read from stdin:
//!
//! ```text
//! fan <0-100>          set the fan speed (takes manual control)
//! light on|off         switch the lights (takes manual control)
//! auto fan|light       hand an actuator back to the advisor
//! refresh fan|light    ask the advisor again now
//! ask <question>       free-form question to the advisor
//! status               session snapshot as JSON
//! history              averages of recent readings
//! pause | resume       suspend or resume polling
//! help | quit
//! ```

use std::sync::Arc;

use farm_control_core::{ActuatorKind, ControlError, ControlHandle, HistoryObserver, ReadingAverages};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Help text for the `help` command
pub const HELP: &str = "\
Commands:
  fan <0-100>          set the fan speed (takes manual control)
  light on|off         switch the lights (takes manual control)
  auto fan|light       hand an actuator back to the advisor
  refresh fan|light    ask the advisor again now
  ask <question>       free-form question to the advisor
  status               session snapshot as JSON
  history              averages of recent readings
  pause | resume       suspend or resume polling
  help                 this text
  quit                 stop the daemon";

/// A parsed console line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `fan <pct>`; range is checked by the control loop
    Fan(i64),
    /// `light on|off`
    Light(bool),
    /// `auto <kind>`
    Auto(ActuatorKind),
    /// `refresh <kind>`
    Refresh(ActuatorKind),
    /// `ask <question>`
    Ask(String),
    /// `status`
    Status,
    /// `history`
    History,
    /// `pause`
    Pause,
    /// `resume`
    Resume,
    /// `help`
    Help,
    /// `quit`
    Quit,
}

/// Why a line could not be parsed
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Blank line
    #[error("empty command")]
    Empty,

    /// Unrecognized verb
    #[error("unknown command `{0}`; type `help` for a list")]
    Unknown(String),

    /// Known verb, bad arguments
    #[error("usage: {0}")]
    Usage(&'static str),
}

fn parse_kind(word: &str) -> Option<ActuatorKind> {
    match word {
        "fan" => Some(ActuatorKind::Fan),
        "light" | "lights" => Some(ActuatorKind::Light),
        _ => None,
    }
}

impl ConsoleCommand {
    /// Parse one console line
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let arg = rest.to_ascii_lowercase();

        match verb.to_ascii_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "fan" => arg
                .parse::<i64>()
                .map(Self::Fan)
                .map_err(|_| ParseError::Usage("fan <0-100>")),
            "light" | "lights" => match arg.as_str() {
                "on" => Ok(Self::Light(true)),
                "off" => Ok(Self::Light(false)),
                _ => Err(ParseError::Usage("light on|off")),
            },
            "auto" => parse_kind(&arg)
                .map(Self::Auto)
                .ok_or(ParseError::Usage("auto fan|light")),
            "refresh" => parse_kind(&arg)
                .map(Self::Refresh)
                .ok_or(ParseError::Usage("refresh fan|light")),
            "ask" if rest.is_empty() => Err(ParseError::Usage("ask <question>")),
            "ask" => Ok(Self::Ask(rest.to_string())),
            "status" => Ok(Self::Status),
            "history" => Ok(Self::History),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// How the console ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked to stop the daemon
    Quit,
    /// Stdin closed; the daemon keeps running
    Eof,
    /// The control loop went away
    LoopStopped,
}

/// Run one command; returns the text to print, if any
///
/// Command outcomes are reported by the observers as toasts, so manual
/// commands print nothing here.
pub async fn execute(
    command: ConsoleCommand,
    handle: &ControlHandle,
    history: &HistoryObserver,
) -> Result<Option<String>, ControlError> {
    let reply = match command {
        ConsoleCommand::Fan(pct) => {
            handle.set_fan_speed(pct).await?;
            None
        }
        ConsoleCommand::Light(on) => {
            handle.set_light(on).await?;
            None
        }
        ConsoleCommand::Auto(kind) => {
            handle.clear_override(kind).await?;
            Some(format!("{kind} handed back to the advisor."))
        }
        ConsoleCommand::Refresh(kind) => {
            handle.refresh_recommendation(kind).await?;
            Some(format!("Asked the advisor for fresh {kind} advice."))
        }
        ConsoleCommand::Ask(question) => Some(handle.ask(question).await?),
        ConsoleCommand::Status => {
            let snapshot = handle.snapshot().await?;
            Some(serde_json::to_string_pretty(&snapshot).unwrap_or_else(|e| format!("status unavailable: {e}")))
        }
        ConsoleCommand::History => Some(render_history(history.averages())),
        ConsoleCommand::Pause => {
            handle.pause().await?;
            Some("Polling paused; manual control remains available.".to_string())
        }
        ConsoleCommand::Resume => {
            handle.resume().await?;
            Some("Polling resumed.".to_string())
        }
        ConsoleCommand::Help => Some(HELP.to_string()),
        ConsoleCommand::Quit => None,
    };
    Ok(reply)
}

/// Summary line for the `history` command
pub fn render_history(averages: Option<ReadingAverages>) -> String {
    match averages {
        None => "No readings yet.".to_string(),
        Some(avg) => format!(
            "Last {} readings: {:.1} °C, {:.1} % humidity, {:.1} % oxygen, {:.0} lux",
            avg.samples,
            avg.temperature_celsius, avg.humidity_pct, avg.oxygen_pct, avg.light_lux
        ),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

/// Read commands from stdin until `quit`, end of input, or the loop stops
pub async fn run(handle: ControlHandle, history: Arc<HistoryObserver>) -> anyhow::Result<ConsoleExit> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();
    write_line(&mut out, "Console ready. Type `help` for commands.").await?;

    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Quit) => return Ok(ConsoleExit::Quit),
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                write_line(&mut out, &e.to_string()).await?;
                continue;
            }
        };

        tracing::debug!(?command, "Console command");
        match execute(command, &handle, &history).await {
            Ok(Some(text)) => write_line(&mut out, &text).await?,
            Ok(None) => {}
            Err(ControlError::LoopStopped) => return Ok(ConsoleExit::LoopStopped),
            Err(e) => write_line(&mut out, &format!("error: {e}")).await?,
        }
    }
    Ok(ConsoleExit::Eof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_manual_commands() {
        assert_eq!(ConsoleCommand::parse("fan 40"), Ok(ConsoleCommand::Fan(40)));
        assert_eq!(ConsoleCommand::parse("  FAN   100 "), Ok(ConsoleCommand::Fan(100)));
        assert_eq!(ConsoleCommand::parse("fan 140"), Ok(ConsoleCommand::Fan(140)));
        assert_eq!(ConsoleCommand::parse("light on"), Ok(ConsoleCommand::Light(true)));
        assert_eq!(ConsoleCommand::parse("lights OFF"), Ok(ConsoleCommand::Light(false)));
    }

    #[test]
    fn test_parse_kind_commands() {
        assert_eq!(
            ConsoleCommand::parse("auto fan"),
            Ok(ConsoleCommand::Auto(ActuatorKind::Fan))
        );
        assert_eq!(
            ConsoleCommand::parse("refresh light"),
            Ok(ConsoleCommand::Refresh(ActuatorKind::Light))
        );
        assert_eq!(
            ConsoleCommand::parse("auto heater"),
            Err(ParseError::Usage("auto fan|light"))
        );
    }

    #[test]
    fn test_parse_ask_keeps_question_case() {
        assert_eq!(
            ConsoleCommand::parse("ask Why is Oxygen low?"),
            Ok(ConsoleCommand::Ask("Why is Oxygen low?".into()))
        );
        assert_eq!(ConsoleCommand::parse("ask"), Err(ParseError::Usage("ask <question>")));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ConsoleCommand::parse("   "), Err(ParseError::Empty));
        assert_eq!(ConsoleCommand::parse("fan fast"), Err(ParseError::Usage("fan <0-100>")));
        assert_eq!(ConsoleCommand::parse("light dim"), Err(ParseError::Usage("light on|off")));
        assert_eq!(
            ConsoleCommand::parse("water 10"),
            Err(ParseError::Unknown("water".into()))
        );
    }

    #[test]
    fn test_parse_simple_verbs() {
        for (line, expected) in [
            ("status", ConsoleCommand::Status),
            ("history", ConsoleCommand::History),
            ("pause", ConsoleCommand::Pause),
            ("resume", ConsoleCommand::Resume),
            ("?", ConsoleCommand::Help),
            ("exit", ConsoleCommand::Quit),
        ] {
            assert_eq!(ConsoleCommand::parse(line), Ok(expected));
        }
    }

    #[test]
    fn test_render_history() {
        assert_eq!(render_history(None), "No readings yet.");
        let line = render_history(Some(ReadingAverages {
                temperature_celsius: 24.26,
                humidity_pct: 61.0,
                oxygen_pct: 95.0,
                light_lux: 4_800.4,
                samples: 4,
        }));
        assert_eq!(
            line,
            "Last 4 readings: 24.3 °C, 61.0 % humidity, 95.0 % oxygen, 4800 lux"
        );
    }
}
