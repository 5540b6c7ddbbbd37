use clap::Parser;
use domo_gate::board::{Board, MemoryBoard, SerialBoard};
use domo_gate::config::FileSource;
use domo_gate::consts::{BoardIdx, DEFAULT_TOPIC_BASE, GATE_NAME, GATE_VERSION};
use domo_gate::logging::{self, LogHandle};
use domo_gate::process::{self, default_input_queue, Process, Role};
use domo_gate::transport::{Initiator, MqttPublisher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Rule driven home automation process")]
struct Args {
    #[arg(long, value_enum)]
    role: Role,

    #[arg(long, default_value = "domo-gate.yaml")]
    config_path: String,

    /// Defaults to RPI_<ROLE>, eg. RPI_OUTPUTRELAY.
    #[arg(long)]
    process_name: Option<String>,
    /// Defaults to IQ_<PROCESS NAME>.
    #[arg(long)]
    input_queue: Option<String>,

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

    // USB Connection
    #[arg(long, default_value = "/dev/ttyACM0")]
    port_name: String,
    #[arg(long, default_value_t = 115200)]
    baud_rate: u32,
    #[arg(long, default_value_t = 1)]
    boards: BoardIdx,

    /// Keep I/O in memory instead of opening the serial port.
    #[arg(long)]
    dry_run: bool,

    /// Log file used when file logging is on.
    #[arg(long, default_value = "/var/log/homedomotica/domo-gate.log")]
    log_file: PathBuf,
    /// Start with file logging on. `ENABLE_LOGFILE_LOGGING` turns it on later.
    #[arg(long)]
    log_to_file: bool,

    /// Sleep between ticks when the inbox is empty.
    #[arg(long, default_value_t = 100)]
    idle_ms: u64,
}

async fn serve<B: Board>(
    args: &Args,
    name: &str,
    board: B,
    publisher: MqttPublisher,
    inbox: &mut mpsc::Receiver<String>,
    log: LogHandle,
) -> anyhow::Result<()> {
    let source = Box::new(FileSource::new(&args.config_path));
    let mut process =
        Process::new(args.role, name, source, board, publisher)?.with_log_control(Box::new(log));
    process::run(&mut process, inbox, Duration::from_millis(args.idle_ms)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = logging::init(args.log_file.clone(), args.log_to_file);

    let name = args
        .process_name
        .clone()
        .unwrap_or_else(|| args.role.default_process_name());
    let input_queue = args
        .input_queue
        .clone()
        .unwrap_or_else(|| default_input_queue(&name));
    info!(
        "Starting {} {} as {}. Args: {:?}",
        GATE_NAME, GATE_VERSION, name, args
    );

    let mut mqtt = Initiator::new(
        &format!("{}-{}", GATE_NAME, name.to_lowercase()),
        &args.mqtt_host,
        args.mqtt_port,
        &args.mqtt_username,
        &args.mqtt_password,
        &args.topic_base,
    )
    .await?;
    mqtt.subscribe(&input_queue).await?;
    let (publisher, mut inbox) = mqtt.start();

    if args.dry_run {
        info!("Dry run: board I/O stays in memory");
        let board = MemoryBoard::new(args.boards);
        serve(&args, &name, board, publisher, &mut inbox, log).await?;
    } else {
        let (board, tasks) =
            SerialBoard::open(args.port_name.clone(), args.baud_rate, args.boards).await?;
        info!("{} initialized.", GATE_NAME);

        // If any side dies (reader, writer) this should close the program.
        tokio::select! {
            result = serve(&args, &name, board, publisher, &mut inbox, log) => result?,
            result = tasks.reader => error!("Serial reader finished: {:?}", result),
            result = tasks.writer => error!("Serial writer finished: {:?}", result),
        }
    }
    Ok(())
}
