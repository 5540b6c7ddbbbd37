//! Inbound/outbound event text exchanged between processes.
//!
//! Two wire forms are accepted:
//! - legacy text: `P;<COMMAND>[;arg]` for process control, `I;<trigger>` for
//!   input gestures,
//! - JSON: `{"Type": "Processing" | "Simulation", "Event": "..."}`.
use crate::logging::LogSink;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("message {0:?} has no event field")]
    MissingEvent(String),
    #[error("invalid JSON message: {0}")]
    Json(String),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("unknown process command {0:?}")]
    UnknownCommand(String),
    #[error("invalid SET_LOG_LEVEL arguments {0:?}")]
    InvalidLogLevel(String),
}

/// Process control keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCommand {
    /// Finish the current dispatch and leave the loop.
    Stop,
    SetLogLevel(Level),
    /// `ENABLE_<SINK>_LOGGING` / `DISABLE_<SINK>_LOGGING`.
    Logging { sink: LogSink, enabled: bool },
    /// Log a dump of the process state.
    PrintStatus,
    /// Re-read configuration and rebuild derived state.
    RefreshAttributes,
}

impl ProcessCommand {
    /// Parse `<COMMAND>[;arg]`.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let mut fields = text.split(';');
        let command = fields.next().unwrap_or_default();
        let args: Vec<&str> = fields.collect();
        match command {
            "STOP" => Ok(Self::Stop),
            "PRINT_PROCESS_STATUS" => Ok(Self::PrintStatus),
            "REFRESH_PROCESS_ATTRIBUTES" => Ok(Self::RefreshAttributes),
            "SET_LOG_LEVEL" => {
                let level = match args.as_slice() {
                    ["DEBUG"] => Level::DEBUG,
                    ["INFO"] => Level::INFO,
                    ["WARNING"] => Level::WARN,
                    ["ERROR"] | ["CRITICAL"] => Level::ERROR,
                    _ => return Err(MessageError::InvalidLogLevel(args.join(";"))),
                };
                Ok(Self::SetLogLevel(level))
            }
            other => Self::parse_logging(other)
                .ok_or_else(|| MessageError::UnknownCommand(other.to_string())),
        }
    }

    fn parse_logging(command: &str) -> Option<Self> {
        let (enabled, rest) = match command.split_once('_')? {
            ("ENABLE", rest) => (true, rest),
            ("DISABLE", rest) => (false, rest),
            _ => return None,
        };
        let sink = match rest {
            "CONSOLE_LOGGING" => LogSink::Console,
            "LOGFILE_LOGGING" => LogSink::Logfile,
            "SYSLOG_LOGGING" => LogSink::Syslog,
            _ => return None,
        };
        Some(Self::Logging { sink, enabled })
    }

    /// Command text as carried after `P;`.
    pub fn to_text(self) -> String {
        match self {
            Self::Stop => "STOP".to_string(),
            Self::SetLogLevel(level) => {
                let name = match level {
                    Level::TRACE | Level::DEBUG => "DEBUG",
                    Level::INFO => "INFO",
                    Level::WARN => "WARNING",
                    Level::ERROR => "ERROR",
                };
                format!("SET_LOG_LEVEL;{}", name)
            }
            Self::Logging { sink, enabled } => {
                let action = if enabled { "ENABLE" } else { "DISABLE" };
                format!("{}_{}_LOGGING", action, sink.keyword())
            }
            Self::PrintStatus => "PRINT_PROCESS_STATUS".to_string(),
            Self::RefreshAttributes => "REFRESH_PROCESS_ATTRIBUTES".to_string(),
        }
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Process(ProcessCommand),
    /// Gesture originated event; carries the trigger identifier.
    Input(String),
    /// Scenario originated event text.
    Simulation(String),
}

#[derive(Serialize, Deserialize, Debug)]
struct Envelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Event")]
    event: String,
}

const TYPE_PROCESSING: &str = "Processing";
const TYPE_SIMULATION: &str = "Simulation";

impl Message {
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }
        if raw.starts_with('{') {
            return Self::parse_json(raw);
        }

        let (tag, rest) = match raw.split_once(';') {
            Some((tag, rest)) => (tag, rest),
            None => (raw, ""),
        };
        match tag {
            "P" => Ok(Message::Process(ProcessCommand::parse(rest)?)),
            "I" => {
                if rest.is_empty() {
                    return Err(MessageError::MissingEvent(raw.to_string()));
                }
                Ok(Message::Input(rest.to_string()))
            }
            other => Err(MessageError::UnknownTag(other.to_string())),
        }
    }

    fn parse_json(raw: &str) -> Result<Self, MessageError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| MessageError::Json(e.to_string()))?;
        match envelope.kind.as_str() {
            TYPE_PROCESSING => Ok(Message::Process(ProcessCommand::parse(&envelope.event)?)),
            TYPE_SIMULATION => Ok(Message::Simulation(envelope.event)),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// `I;<trigger>` as sent by the input process.
    pub fn input_event(trigger: &str) -> String {
        format!("I;{}", trigger)
    }

    /// `{"Type":"Simulation","Event":...}` as sent by scenario jobs.
    pub fn simulation_event(event: &str) -> Result<String, MessageError> {
        let envelope = Envelope {
            kind: TYPE_SIMULATION.to_string(),
            event: event.to_string(),
        };
        serde_json::to_string(&envelope).map_err(|e| MessageError::Json(e.to_string()))
    }
}

/// `ACTION|scenario` payload of a simulation message aimed at the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationCommand {
    Activate(String),
    Deactivate(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error("simulation event {0:?} is not in ACTION|scenario form")]
    Malformed(String),
    #[error("unknown simulation action {0:?}")]
    UnknownAction(String),
}

impl SimulationCommand {
    pub fn parse(event: &str) -> Result<Self, SimulationError> {
        let fields: Vec<&str> = event.split('|').collect();
        let [action, scenario] = fields.as_slice() else {
            return Err(SimulationError::Malformed(event.to_string()));
        };
        match *action {
            "ACTIVATE" => Ok(Self::Activate(scenario.to_string())),
            "DEACTIVATE" => Ok(Self::Deactivate(scenario.to_string())),
            other => Err(SimulationError::UnknownAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_process_messages() {
        assert_eq!(
            Message::parse("P;STOP"),
            Ok(Message::Process(ProcessCommand::Stop))
        );
        assert_eq!(
            Message::parse("P;SET_LOG_LEVEL;WARNING"),
            Ok(Message::Process(ProcessCommand::SetLogLevel(Level::WARN)))
        );
        assert_eq!(
            Message::parse("P;REFRESH_PROCESS_ATTRIBUTES\n"),
            Ok(Message::Process(ProcessCommand::RefreshAttributes))
        );
    }

    #[test]
    fn logging_sink_switches() {
        assert_eq!(
            Message::parse("P;DISABLE_CONSOLE_LOGGING"),
            Ok(Message::Process(ProcessCommand::Logging {
                sink: LogSink::Console,
                enabled: false
            }))
        );
        assert_eq!(
            Message::parse("P;ENABLE_LOGFILE_LOGGING"),
            Ok(Message::Process(ProcessCommand::Logging {
                sink: LogSink::Logfile,
                enabled: true
            }))
        );
        assert_eq!(
            ProcessCommand::parse("ENABLE_SYSLOG_LOGGING"),
            Ok(ProcessCommand::Logging {
                sink: LogSink::Syslog,
                enabled: true
            })
        );
        assert!(matches!(
            ProcessCommand::parse("ENABLE_PAPER_LOGGING"),
            Err(MessageError::UnknownCommand(_))
        ));
        assert!(matches!(
            ProcessCommand::parse("TOGGLE_CONSOLE_LOGGING"),
            Err(MessageError::UnknownCommand(_))
        ));
    }

    #[test]
    fn command_text_is_accepted_back() {
        let commands = [
            ProcessCommand::Stop,
            ProcessCommand::SetLogLevel(Level::WARN),
            ProcessCommand::Logging {
                sink: LogSink::Logfile,
                enabled: false,
            },
            ProcessCommand::PrintStatus,
            ProcessCommand::RefreshAttributes,
        ];
        for command in commands {
            assert_eq!(ProcessCommand::parse(&command.to_text()), Ok(command));
        }
        assert_eq!(
            ProcessCommand::SetLogLevel(Level::INFO).to_text(),
            "SET_LOG_LEVEL;INFO"
        );
    }

    #[test]
    fn malformed_log_level_is_rejected() {
        assert!(matches!(
            Message::parse("P;SET_LOG_LEVEL"),
            Err(MessageError::InvalidLogLevel(_))
        ));
        assert!(matches!(
            Message::parse("P;SET_LOG_LEVEL;LOUD"),
            Err(MessageError::InvalidLogLevel(_))
        ));
        assert!(matches!(
            Message::parse("P;SET_LOG_LEVEL;INFO;extra"),
            Err(MessageError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn input_messages_keep_trigger() {
        assert_eq!(
            Message::parse("I;RPI_INPUTBUTTON_0_3_PRESSED"),
            Ok(Message::Input("RPI_INPUTBUTTON_0_3_PRESSED".to_string()))
        );
        assert!(Message::parse("I;").is_err());
        assert!(matches!(Message::parse("X;foo"), Err(MessageError::UnknownTag(_))));
    }

    #[test]
    fn json_messages() {
        assert_eq!(
            Message::parse(r#"{"Type": "Processing", "Event": "STOP"}"#),
            Ok(Message::Process(ProcessCommand::Stop))
        );
        assert_eq!(
            Message::parse(r#"{"Type": "Simulation", "Event": "ACTIVATE|Holiday"}"#),
            Ok(Message::Simulation("ACTIVATE|Holiday".to_string()))
        );
        assert!(matches!(
            Message::parse(r#"{"Type": "Other", "Event": "x"}"#),
            Err(MessageError::UnknownType(_))
        ));
        assert!(matches!(
            Message::parse(r#"{"Type": "Simulation"}"#),
            Err(MessageError::Json(_))
        ));
    }

    #[test]
    fn outbound_forms_parse_back() {
        assert_eq!(
            Message::parse(&Message::input_event("T1")),
            Ok(Message::Input("T1".to_string()))
        );
        let sim = Message::simulation_event("RPI_X_0_1_PRESSED").unwrap();
        assert_eq!(sim, r#"{"Type":"Simulation","Event":"RPI_X_0_1_PRESSED"}"#);
        assert_eq!(
            Message::parse(&sim),
            Ok(Message::Simulation("RPI_X_0_1_PRESSED".to_string()))
        );
    }

    #[test]
    fn simulation_commands() {
        assert_eq!(
            SimulationCommand::parse("ACTIVATE|Holiday"),
            Ok(SimulationCommand::Activate("Holiday".to_string()))
        );
        assert_eq!(
            SimulationCommand::parse("DEACTIVATE|Holiday"),
            Ok(SimulationCommand::Deactivate("Holiday".to_string()))
        );
        assert!(matches!(
            SimulationCommand::parse("PAUSE|Holiday"),
            Err(SimulationError::UnknownAction(_))
        ));
        assert!(matches!(
            SimulationCommand::parse("ACTIVATE"),
            Err(SimulationError::Malformed(_))
        ));
    }
}
