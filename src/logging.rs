use std::cell::Cell;
use std::fmt as stdfmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

/// Place log records are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Console,
    Logfile,
    /// Accepted on the wire, not available in this build.
    Syslog,
}

impl LogSink {
    /// Upper-case word used in `ENABLE_<SINK>_LOGGING`.
    pub fn keyword(self) -> &'static str {
        match self {
            LogSink::Console => "CONSOLE",
            LogSink::Logfile => "LOGFILE",
            LogSink::Syslog => "SYSLOG",
        }
    }
}

impl stdfmt::Display for LogSink {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        match self {
            LogSink::Console => f.write_str("console"),
            LogSink::Logfile => f.write_str("logfile"),
            LogSink::Syslog => f.write_str("syslog"),
        }
    }
}

/// Runtime log switches, driven by `SET_LOG_LEVEL` and the
/// `ENABLE_*_LOGGING` / `DISABLE_*_LOGGING` commands.
pub trait LogControl {
    fn set_level(&self, level: Level) -> anyhow::Result<()>;
    fn set_sink(&self, sink: LogSink, enabled: bool) -> anyhow::Result<()>;
}

type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type Sink = Box<dyn Layer<Filtered> + Send + Sync>;

/// Handle to the installed global filter and output sinks.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    sinks: reload::Handle<Vec<Sink>, Filtered>,
    log_file: PathBuf,
    console: Cell<bool>,
    logfile: Cell<bool>,
}

fn filter(default: LevelFilter) -> EnvFilter {
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .parse_lossy("");
    quiet_dependencies(filter)
}

fn quiet_dependencies(filter: EnvFilter) -> EnvFilter {
    match "rumqttc=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn format() -> fmt::format::Format<fmt::format::Compact, fmt::time::ChronoLocal> {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact()
}

fn console() -> Sink {
    fmt::layer().event_format(format()).boxed()
}

/// Build the enabled sinks. The log file is appended to and created when
/// missing; its directory must exist.
fn sinks(to_console: bool, log_file: Option<&Path>) -> anyhow::Result<Vec<Sink>> {
    let mut sinks: Vec<Sink> = Vec::new();
    if to_console {
        sinks.push(console());
    }
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("can't open {}: {}", path.display(), e))?;
        sinks.push(
            fmt::layer()
                .event_format(format())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }
    Ok(sinks)
}

/// Install the global subscriber. Debug by default, `RUST_LOG` overrides.
/// Logs go to the console, and to `log_file` too when `to_file` is set.
pub fn init(log_file: PathBuf, to_file: bool) -> LogHandle {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env()
        .expect("RUST_LOG configuration is valid");
    let (filter_layer, filter) = reload::Layer::new(quiet_dependencies(env_filter));

    let (initial, file_error) = match sinks(true, to_file.then_some(log_file.as_path())) {
        Ok(initial) => (initial, None),
        Err(err) => (vec![console()], Some(err)),
    };
    let logfile = to_file && file_error.is_none();
    let (sinks_layer, sinks) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(sinks_layer)
        .init();

    if let Some(err) = file_error {
        tracing::warn!("Logging to console only: {}", err);
    }
    LogHandle {
        filter,
        sinks,
        log_file,
        console: Cell::new(true),
        logfile: Cell::new(logfile),
    }
}

impl LogControl for LogHandle {
    fn set_level(&self, level: Level) -> anyhow::Result<()> {
        self.filter.reload(filter(LevelFilter::from_level(level)))?;
        Ok(())
    }

    fn set_sink(&self, sink: LogSink, enabled: bool) -> anyhow::Result<()> {
        let (console, logfile) = match sink {
            LogSink::Console => (enabled, self.logfile.get()),
            LogSink::Logfile => (self.console.get(), enabled),
            LogSink::Syslog => anyhow::bail!("syslog logging is not supported"),
        };
        let log_file = logfile.then_some(self.log_file.as_path());
        self.sinks.reload(sinks(console, log_file)?)?;
        self.console.set(console);
        self.logfile.set(logfile);
        Ok(())
    }
}
