use clap::{Parser, Subcommand, ValueEnum};
use domo_gate::consts::{DEFAULT_TOPIC_BASE, GATE_NAME};
use domo_gate::logging::{self, LogSink};
use domo_gate::message::ProcessCommand;
use domo_gate::transport::Initiator;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Send a process control message to a running gate process.
#[derive(Parser, Debug)]
#[command(version, about = "Send a control message to a domo-gate process")]
struct Args {
    /// Input queue of the target process, eg. IQ_RPI_OUTPUTLIGHTS.
    queue: String,

    #[command(subcommand)]
    command: Control,

    // MQTT connection
    #[arg(long)]
    mqtt_host: String,
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,
    #[arg(long, default_value = "")]
    mqtt_username: String,
    #[arg(long, default_value = "")]
    mqtt_password: String,
    #[arg(long, default_value = DEFAULT_TOPIC_BASE)]
    topic_base: String,

    /// Give up when the broker doesn't acknowledge in time.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Control {
    /// Stop the process.
    Stop,
    /// Change the log level: DEBUG, INFO, WARNING, ERROR or CRITICAL.
    SetLogLevel {
        #[arg(default_value = "INFO")]
        level: String,
    },
    /// Log the process status.
    PrintStatus,
    /// Re-read the process attributes.
    Refresh,
    EnableLogging {
        #[arg(value_enum)]
        sink: SinkArg,
    },
    DisableLogging {
        #[arg(value_enum)]
        sink: SinkArg,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SinkArg {
    Console,
    Logfile,
    Syslog,
}

impl From<SinkArg> for LogSink {
    fn from(sink: SinkArg) -> Self {
        match sink {
            SinkArg::Console => LogSink::Console,
            SinkArg::Logfile => LogSink::Logfile,
            SinkArg::Syslog => LogSink::Syslog,
        }
    }
}

impl Control {
    /// Wire text of the command. Rejects what the receiver would reject.
    fn payload(&self) -> anyhow::Result<String> {
        let text = match self {
            Control::Stop => "STOP".to_string(),
            Control::SetLogLevel { level } => format!("SET_LOG_LEVEL;{}", level.to_uppercase()),
            Control::PrintStatus => "PRINT_PROCESS_STATUS".to_string(),
            Control::Refresh => "REFRESH_PROCESS_ATTRIBUTES".to_string(),
            Control::EnableLogging { sink } => ProcessCommand::Logging {
                sink: (*sink).into(),
                enabled: true,
            }
            .to_text(),
            Control::DisableLogging { sink } => ProcessCommand::Logging {
                sink: (*sink).into(),
                enabled: false,
            }
            .to_text(),
        };
        ProcessCommand::parse(&text)?;
        Ok(format!("P;{}", text))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log = logging::init(PathBuf::new(), false);

    let payload = args.command.payload()?;
    let mqtt = Initiator::new(
        &format!("{}-send-{}", GATE_NAME, std::process::id()),
        &args.mqtt_host,
        args.mqtt_port,
        &args.mqtt_username,
        &args.mqtt_password,
        &args.topic_base,
    )
    .await?;
    mqtt.publish_once(&args.queue, &payload, Duration::from_millis(args.timeout_ms))
        .await?;
    info!("Sent {} to {}", payload, args.queue);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &[&str]) -> Args {
        let mut argv = vec!["domo-send", "--mqtt-host", "localhost"];
        argv.extend_from_slice(line);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn control_text() {
        assert_eq!(parse(&["IQ_X", "stop"]).command.payload().unwrap(), "P;STOP");
        assert_eq!(
            parse(&["IQ_X", "set-log-level"]).command.payload().unwrap(),
            "P;SET_LOG_LEVEL;INFO"
        );
        assert_eq!(
            parse(&["IQ_X", "set-log-level", "warning"])
                .command
                .payload()
                .unwrap(),
            "P;SET_LOG_LEVEL;WARNING"
        );
        assert_eq!(
            parse(&["IQ_X", "print-status"]).command.payload().unwrap(),
            "P;PRINT_PROCESS_STATUS"
        );
        assert_eq!(
            parse(&["IQ_X", "refresh"]).command.payload().unwrap(),
            "P;REFRESH_PROCESS_ATTRIBUTES"
        );
        assert_eq!(
            parse(&["IQ_X", "disable-logging", "console"])
                .command
                .payload()
                .unwrap(),
            "P;DISABLE_CONSOLE_LOGGING"
        );
    }

    #[test]
    fn defaults_and_queue() {
        let args = parse(&["IQ_RPI_OUTPUTLIGHTS", "stop"]);
        assert_eq!(args.queue, "IQ_RPI_OUTPUTLIGHTS");
        assert_eq!(args.topic_base, DEFAULT_TOPIC_BASE);
        assert_eq!(args.mqtt_port, 1883);
    }

    #[test]
    fn bad_level_is_not_sent() {
        let control = Control::SetLogLevel {
            level: "LOUD".to_string(),
        };
        assert!(control.payload().is_err());
        assert!(Args::try_parse_from(["domo-send", "--mqtt-host", "h", "IQ_X", "pause"]).is_err());
    }
}
