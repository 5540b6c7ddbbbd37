//! Dispatch pipeline. A process owns its engine, board and publisher and is
//! driven by one cooperative loop: a message is handled when there is one,
//! otherwise the process ticks.
use crate::actuator::Variant;
use crate::board::{Board, OutputKind};
use crate::config::{AttributeSource, Attributes};
use crate::gesture::{compile_inputs, trigger_name, InputPoint};
use crate::logging::LogControl;
use crate::message::{Message, ProcessCommand, SimulationCommand};
use crate::outputs::{ActuatorBank, OutputLayout};
use crate::scenario::{compile_scenarios, Scenario, Scheduler};
use crate::transport::Publisher;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// Process kind hosted by the binary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    InputButton,
    OutputRelay,
    OutputLights,
    OutputDimmer,
    OutputVentilator,
    LightSimulator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::InputButton => "input-button",
            Role::OutputRelay => "output-relay",
            Role::OutputLights => "output-lights",
            Role::OutputDimmer => "output-dimmer",
            Role::OutputVentilator => "output-ventilator",
            Role::LightSimulator => "light-simulator",
        }
    }

    /// `RPI_` followed by the role without dashes, eg. `RPI_OUTPUTRELAY`.
    pub fn default_process_name(self) -> String {
        format!("RPI_{}", self.as_str().replace('-', "").to_uppercase())
    }

    /// Declarations and hardware of the output roles.
    pub fn output_layout(self) -> Option<OutputLayout> {
        let (prefix, kind, variant) = match self {
            Role::OutputRelay => ("Relay", OutputKind::Relay, Variant::Pulsed),
            Role::OutputLights => ("Light", OutputKind::Pin, Variant::Toggle),
            Role::OutputDimmer => ("Dimmer", OutputKind::Pin, Variant::Dimmer),
            Role::OutputVentilator => ("Relay", OutputKind::Relay, Variant::TimedRun),
            Role::InputButton | Role::LightSimulator => return None,
        };
        Some(OutputLayout {
            prefix,
            kind,
            variant,
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbox name of a process.
pub fn default_input_queue(process_name: &str) -> String {
    format!("IQ_{}", process_name.to_uppercase())
}

/// Whether the loop goes on after a message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Role specific state derived from configuration. Rebuilt on refresh; only
/// the simulator's active scenarios survive it.
#[derive(Debug)]
enum Engine {
    Inputs(Vec<InputPoint>),
    Outputs(ActuatorBank),
    Simulator {
        scenarios: IndexMap<String, Scenario>,
        scheduler: Scheduler,
    },
}

impl Engine {
    fn build(role: Role, attributes: &Attributes) -> Self {
        if let Some(layout) = role.output_layout() {
            let (bank, diagnostics) = ActuatorBank::build(attributes, layout);
            if !diagnostics.is_empty() {
                warn!("{} actuator declarations skipped", diagnostics.len());
            }
            return Engine::Outputs(bank);
        }
        match role {
            Role::InputButton => {
                let (points, diagnostics) = compile_inputs(attributes);
                if !diagnostics.is_empty() {
                    warn!("{} input declarations skipped", diagnostics.len());
                }
                Engine::Inputs(points)
            }
            _ => {
                let (scenarios, diagnostics) = compile_scenarios(attributes);
                if !diagnostics.is_empty() {
                    warn!("{} scenario declarations skipped", diagnostics.len());
                }
                Engine::Simulator {
                    scenarios,
                    scheduler: Scheduler::new(),
                }
            }
        }
    }
}

pub struct Process<B: Board, P: Publisher> {
    role: Role,
    name: String,
    source: Box<dyn AttributeSource>,
    board: B,
    publisher: P,
    log: Option<Box<dyn LogControl>>,
    engine: Engine,
}

impl<B: Board, P: Publisher> Process<B, P> {
    /// Load the process attributes and build the role's engine.
    pub fn new(
        role: Role,
        name: &str,
        source: Box<dyn AttributeSource>,
        board: B,
        publisher: P,
    ) -> anyhow::Result<Self> {
        let attributes = source.attributes(name)?;
        let engine = Engine::build(role, &attributes);
        info!("Process {} ({}) initialized", name, role);
        Ok(Self {
            role,
            name: name.to_string(),
            source,
            board,
            publisher,
            log: None,
            engine,
        })
    }

    pub fn with_log_control(mut self, log: Box<dyn LogControl>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Actuators of an output process.
    pub fn actuators(&self) -> Option<&ActuatorBank> {
        match &self.engine {
            Engine::Outputs(bank) => Some(bank),
            _ => None,
        }
    }

    /// Scheduler of a simulator process.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        match &self.engine {
            Engine::Simulator { scheduler, .. } => Some(scheduler),
            _ => None,
        }
    }

    /// Handle one inbound message.
    pub fn handle(&mut self, raw: &str, now: Instant, wall: NaiveDateTime) -> Flow {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("Ignoring message {:?}: {}", raw, err);
                return Flow::Continue;
            }
        };
        debug!("Processing {:?}", message);

        match message {
            Message::Process(command) => return self.control(command, wall),
            Message::Input(trigger) => self.dispatch(&trigger, now),
            Message::Simulation(event) => match &mut self.engine {
                Engine::Simulator {
                    scenarios,
                    scheduler,
                } => simulate(scenarios, scheduler, &event, wall),
                _ => self.dispatch(&event, now),
            },
        }
        Flow::Continue
    }

    fn dispatch(&mut self, trigger: &str, now: Instant) {
        match &mut self.engine {
            Engine::Outputs(bank) => {
                let applied = bank.dispatch(trigger, now);
                debug!("{} applied {} actions", trigger, applied);
            }
            _ => debug!("{} has no actuators - ignoring {}", self.name, trigger),
        }
    }

    fn control(&mut self, command: ProcessCommand, wall: NaiveDateTime) -> Flow {
        match command {
            ProcessCommand::Stop => {
                info!("Stop requested for {}", self.name);
                return Flow::Stop;
            }
            ProcessCommand::SetLogLevel(level) => match &self.log {
                Some(log) => match log.set_level(level) {
                    Ok(()) => info!("Log level set to {}", level),
                    Err(err) => warn!("Unable to change log level: {}", err),
                },
                None => warn!("Log level can't be changed in this process"),
            },
            ProcessCommand::Logging { sink, enabled } => match &self.log {
                Some(log) => match log.set_sink(sink, enabled) {
                    Ok(()) => info!("{} logging {}", sink, on_off(enabled)),
                    Err(err) => warn!("Unable to switch {} logging: {}", sink, err),
                },
                None => warn!("Log sinks can't be changed in this process"),
            },
            ProcessCommand::PrintStatus => info!("\n{}", self),
            ProcessCommand::RefreshAttributes => return self.refresh(wall),
        }
        Flow::Continue
    }

    /// Rebuild all derived state from the source. Pending actuator timers are
    /// dropped. Active scenarios are re-installed from their new definition
    /// and deactivated when the definition is gone.
    pub fn refresh(&mut self, wall: NaiveDateTime) -> Flow {
        match self.source.attributes(&self.name) {
            Ok(attributes) => {
                let mut engine = Engine::build(self.role, &attributes);
                if let (
                    Engine::Simulator { scheduler: old, .. },
                    Engine::Simulator {
                        scenarios,
                        scheduler,
                    },
                ) = (&mut self.engine, &mut engine)
                {
                    *scheduler = std::mem::take(old);
                    for tag in scheduler.active_tags() {
                        match scenarios.get(&tag) {
                            Some(scenario) => scheduler.activate(scenario, wall),
                            None => {
                                let removed = scheduler.deactivate(&tag);
                                warn!("Scenario {} is gone ({} jobs removed)", tag, removed);
                            }
                        }
                    }
                }
                self.engine = engine;
                info!("Attributes of {} refreshed", self.name);
                Flow::Continue
            }
            Err(err) => {
                error!("Configuration for {} is unusable: {:#}", self.name, err);
                Flow::Stop
            }
        }
    }

    /// Idle step: classify inputs, advance actuators, run due jobs and write
    /// outputs.
    pub fn tick(&mut self, now: Instant, wall: NaiveDateTime) {
        match &mut self.engine {
            Engine::Inputs(points) => {
                for input in points.iter_mut() {
                    let Some(sample) = self.board.read_input(input.point) else {
                        continue;
                    };
                    for gesture in input.classify(sample, now) {
                        let trigger = trigger_name(&self.name, input.point, gesture);
                        let payload = Message::input_event(&trigger);
                        publish_all(&mut self.publisher, &input.consumers, &payload);
                    }
                }
            }
            Engine::Outputs(bank) => {
                bank.advance(now);
                bank.actuate(&mut self.board);
            }
            Engine::Simulator { scheduler, .. } => {
                for job in scheduler.run_pending(wall) {
                    if job.queues.is_empty() {
                        warn!("No destination for {} of scenario {}", job.event, job.tag);
                        continue;
                    }
                    match Message::simulation_event(&job.event) {
                        Ok(payload) => publish_all(&mut self.publisher, &job.queues, &payload),
                        Err(err) => warn!("Unable to encode {}: {}", job.event, err),
                    }
                }
            }
        }
    }
}

fn simulate(
    scenarios: &IndexMap<String, Scenario>,
    scheduler: &mut Scheduler,
    event: &str,
    wall: NaiveDateTime,
) {
    match SimulationCommand::parse(event) {
        Ok(SimulationCommand::Activate(name)) => match scenarios.get(&name) {
            Some(scenario) => scheduler.activate(scenario, wall),
            None => warn!("Unknown scenario {} - not activated", name),
        },
        Ok(SimulationCommand::Deactivate(name)) => {
            let removed = scheduler.deactivate(&name);
            info!("Scenario {} deactivated ({} jobs removed)", name, removed);
        }
        Err(err) => warn!("Ignoring simulation event: {}", err),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Send to every queue. A failed destination doesn't stop the others.
fn publish_all<P: Publisher>(publisher: &mut P, queues: &[String], payload: &str) {
    for queue in queues {
        match publisher.publish(queue, payload) {
            Ok(()) => debug!("Sent {} to {}", payload, queue),
            Err(err) => warn!("Message {} not sent to {}: {}", payload, queue, err),
        }
    }
}

impl<B: Board, P: Publisher> fmt::Display for Process<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Process {} ({}) on {} boards",
            self.name,
            self.role,
            self.board.boards()
        )?;
        match &self.engine {
            Engine::Inputs(points) => {
                writeln!(f, "{} inputs", points.len())?;
                for input in points {
                    writeln!(
                        f,
                        "  {} {:<24} -> {}",
                        input.point,
                        input.description,
                        input.consumers.join(" ")
                    )?;
                }
                Ok(())
            }
            Engine::Outputs(bank) => write!(f, "{}", bank),
            Engine::Simulator {
                scenarios,
                scheduler,
            } => {
                let names: Vec<&str> = scenarios.keys().map(String::as_str).collect();
                writeln!(f, "Scenarios: {}", names.join(", "))?;
                write!(f, "{}", scheduler)
            }
        }
    }
}

/// Cooperative loop. Returns on `STOP`, on an unusable configuration or when
/// the inbox closes.
pub async fn run<B: Board, P: Publisher>(
    process: &mut Process<B, P>,
    inbox: &mut mpsc::Receiver<String>,
    idle: Duration,
) {
    info!("{} ({}) waiting for messages", process.name(), process.role());
    loop {
        match inbox.try_recv() {
            Ok(raw) => {
                let wall = chrono::Local::now().naive_local();
                if process.handle(&raw, Instant::now(), wall) == Flow::Stop {
                    break;
                }
            }
            Err(TryRecvError::Empty) => {
                let wall = chrono::Local::now().naive_local();
                process.tick(Instant::now(), wall);
                tokio::time::sleep(idle).await;
            }
            Err(TryRecvError::Disconnected) => {
                warn!("Inbox of {} closed", process.name());
                break;
            }
        }
    }
    info!("{} finished", process.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names() {
        assert_eq!(Role::OutputRelay.default_process_name(), "RPI_OUTPUTRELAY");
        assert_eq!(Role::InputButton.default_process_name(), "RPI_INPUTBUTTON");
        assert_eq!(
            default_input_queue(&Role::LightSimulator.default_process_name()),
            "IQ_RPI_LIGHTSIMULATOR"
        );
    }

    #[test]
    fn ventilators_share_relay_declarations() {
        let relay = Role::OutputRelay.output_layout().unwrap();
        let fan = Role::OutputVentilator.output_layout().unwrap();
        assert_eq!(relay.prefix, fan.prefix);
        assert_eq!(fan.variant, Variant::TimedRun);
        assert!(Role::LightSimulator.output_layout().is_none());
    }
}
