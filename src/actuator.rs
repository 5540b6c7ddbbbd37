//! Actuator state machines.
//!
//! Every actuator exposes `apply(action)` for dispatched actions and
//! `advance(now)` for the per-tick timer step. The variant is picked from
//! the process role, not from the declaration.
use crate::board::Point;
use crate::config::{numbered_entries, Attributes};
use crate::consts::{NOT_USED, PULSE_RELEASE};
use crate::rules::DeclarationError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State machine flavour.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Variant {
    /// `TOGGLE` flips.
    Toggle,
    /// `TOGGLE` flips, `PULSE` switches on for a fixed second.
    Pulsed,
    /// Ventilator: `TOGGLE` starts, or requests a lagged stop.
    TimedRun,
    /// Dimmer driven as on/off: `ON`, `OFF`.
    Dimmer,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Action {
    Toggle,
    Pulse,
    On,
    Off,
}

impl Action {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "TOGGLE" => Some(Action::Toggle),
            "PULSE" => Some(Action::Pulse),
            "ON" => Some(Action::On),
            "OFF" => Some(Action::Off),
            _ => None,
        }
    }
}

/// Ventilator timing, from `id;description;lagSeconds;maxRunSeconds`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct TimerSpec {
    /// Time between a stop request and the actual stop.
    pub lag: Duration,
    /// Hard ceiling on run time. `None` means run time is managed externally.
    pub max_run: Option<Duration>,
}

impl TimerSpec {
    pub fn new(lag_secs: u64, max_run_secs: u64) -> Self {
        Self {
            lag: Duration::from_secs(lag_secs),
            max_run: (max_run_secs > 0).then(|| Duration::from_secs(max_run_secs)),
        }
    }

    /// Parse a timer declaration. Returns the actuator id it belongs to, or
    /// `None` for a disabled entry.
    pub fn parse(key: &str, value: &str) -> Result<Option<(String, Self)>, DeclarationError> {
        let fields: Vec<&str> = value.split(';').collect();
        let [id, description, lag, max_run] = fields.as_slice() else {
            return Err(DeclarationError::FieldCount {
                key: key.to_string(),
                expected: 4,
                found: fields.len(),
            });
        };
        if *description == NOT_USED {
            return Ok(None);
        }
        let number = |field: &'static str, value: &str| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| DeclarationError::Number {
                    key: key.to_string(),
                    field,
                    value: value.to_string(),
                })
        };
        let lag = number("lag", *lag)?;
        let max_run = number("max run", *max_run)?;
        Ok(Some((id.trim().to_string(), Self::new(lag, max_run))))
    }
}

/// Collect `RelayTimerNN` declarations keyed by actuator id.
pub fn compile_timers(
    attributes: &Attributes,
) -> (HashMap<String, TimerSpec>, Vec<DeclarationError>) {
    let mut timers = HashMap::new();
    let mut diagnostics = Vec::new();
    for (key, value) in numbered_entries(attributes, "RelayTimer") {
        match TimerSpec::parse(key, value) {
            Ok(Some((id, spec))) => {
                debug!("Timer for {}: {:?}", id, spec);
                timers.insert(id, spec);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Skipping timer declaration: {}", err);
                diagnostics.push(err);
            }
        }
    }
    (timers, diagnostics)
}

/// Running ventilator bookkeeping. Present only while the timer is armed,
/// so a stop request can't exist without a started run.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct RunTimer {
    started: Instant,
    stop_requested: Option<Instant>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum State {
    Toggle {
        on: bool,
    },
    Pulsed {
        on: bool,
        /// Set only while on.
        pulse_armed: Option<Instant>,
    },
    TimedRun {
        on: bool,
        timer: Option<RunTimer>,
        spec: TimerSpec,
    },
    Dimmer {
        on: bool,
    },
}

/// Outcome of applying an action.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Applied {
    Done,
    /// Action not understood by this variant.
    Ignored,
}

#[derive(Clone, Debug)]
pub struct Actuator {
    pub id: String,
    pub description: String,
    /// Physical address, when the id is in `(board,index)` form.
    pub point: Option<Point>,
    state: State,
}

impl Actuator {
    /// New actuator, always off.
    pub fn new(id: &str, description: &str, variant: Variant, timer: TimerSpec) -> Self {
        let state = match variant {
            Variant::Toggle => State::Toggle { on: false },
            Variant::Pulsed => State::Pulsed {
                on: false,
                pulse_armed: None,
            },
            Variant::TimedRun => State::TimedRun {
                on: false,
                timer: None,
                spec: timer,
            },
            Variant::Dimmer => State::Dimmer { on: false },
        };
        Self {
            id: id.to_string(),
            description: description.to_string(),
            point: id.parse().ok(),
            state,
        }
    }

    pub fn variant(&self) -> Variant {
        match self.state {
            State::Toggle { .. } => Variant::Toggle,
            State::Pulsed { .. } => Variant::Pulsed,
            State::TimedRun { .. } => Variant::TimedRun,
            State::Dimmer { .. } => Variant::Dimmer,
        }
    }

    pub fn is_on(&self) -> bool {
        match self.state {
            State::Toggle { on }
            | State::Pulsed { on, .. }
            | State::TimedRun { on, .. }
            | State::Dimmer { on } => on,
        }
    }

    /// A pulse or run timer is pending.
    pub fn timer_armed(&self) -> bool {
        match self.state {
            State::Pulsed { pulse_armed, .. } => pulse_armed.is_some(),
            State::TimedRun { timer, .. } => timer.is_some(),
            _ => false,
        }
    }

    /// A ventilator is waiting out its lag.
    pub fn stop_requested(&self) -> bool {
        matches!(
            self.state,
            State::TimedRun {
                timer: Some(RunTimer {
                    stop_requested: Some(_),
                    ..
                }),
                ..
            }
        )
    }

    pub fn apply(&mut self, action: &str, now: Instant) -> Applied {
        let Some(parsed) = Action::parse(action) else {
            debug!("Unknown action {} for {} - skipping", action, self.id);
            return Applied::Ignored;
        };

        let variant = self.variant();
        match (&mut self.state, parsed) {
            (State::Toggle { on }, Action::Toggle) => {
                *on = !*on;
                info!("Toggled {} - {} to {}", self.id, self.description, on_off(*on));
            }

            (State::Pulsed { on, pulse_armed }, Action::Pulse) => {
                *on = true;
                *pulse_armed = Some(now);
                info!("Pulse started for {} - {}", self.id, self.description);
            }
            (State::Pulsed { on, pulse_armed }, Action::Toggle) => {
                *on = !*on;
                if !*on {
                    // Pulse armed implies on.
                    *pulse_armed = None;
                }
                info!("Toggled {} - {} to {}", self.id, self.description, on_off(*on));
            }

            (State::TimedRun { on, timer, .. }, Action::Toggle) => {
                if !*on {
                    *on = true;
                    *timer = Some(RunTimer {
                        started: now,
                        stop_requested: None,
                    });
                    info!("Started {} - {}", self.id, self.description);
                } else if let Some(timer) = timer {
                    timer.stop_requested = Some(now);
                    debug!("Stop requested for {} - {}", self.id, self.description);
                } else {
                    // Unreachable through TOGGLE alone: on implies an armed timer.
                    *on = false;
                }
            }

            (State::Dimmer { on }, Action::On) => {
                *on = true;
                info!("Dimmer {} - {} on", self.id, self.description);
            }
            (State::Dimmer { on }, Action::Off) => {
                *on = false;
                info!("Dimmer {} - {} off", self.id, self.description);
            }

            (_, action) => {
                debug!(
                    "Action {:?} is not supported by {} ({:?}) - skipping",
                    action, self.id, variant
                );
                return Applied::Ignored;
            }
        }
        Applied::Done
    }

    /// Timer step: release expired pulses and stop ventilators.
    pub fn advance(&mut self, now: Instant) {
        match &mut self.state {
            State::Pulsed { on, pulse_armed } => {
                if let Some(armed) = *pulse_armed {
                    if now.saturating_duration_since(armed) > PULSE_RELEASE {
                        *on = false;
                        *pulse_armed = None;
                        debug!("Pulse released for {}", self.id);
                    }
                }
            }
            State::TimedRun { on, timer, spec } => {
                let Some(run) = *timer else {
                    return;
                };
                let over_max = spec
                    .max_run
                    .map(|max| now.saturating_duration_since(run.started) > max)
                    .unwrap_or(false);
                if over_max {
                    *on = false;
                    *timer = None;
                    info!(
                        "Stopping {} after maximum run time ({:?})",
                        self.id, spec.max_run
                    );
                } else if let Some(stop) = run.stop_requested {
                    if now.saturating_duration_since(stop) > spec.lag {
                        *on = false;
                        *timer = None;
                        info!("Stopping {} after lag time ({:?})", self.id, spec.lag);
                    }
                }
            }
            State::Toggle { .. } | State::Dimmer { .. } => {}
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn toggle_flips_and_ignores_others() {
        let now = Instant::now();
        let mut light = Actuator::new("(0,2)", "Hall", Variant::Toggle, TimerSpec::default());
        assert_eq!(light.point, Some(Point::new(0, 2)));
        assert_eq!(light.apply("TOGGLE", now), Applied::Done);
        assert!(light.is_on());
        assert_eq!(light.apply("ON", now), Applied::Ignored);
        assert_eq!(light.apply("BLINK", now), Applied::Ignored);
        light.advance(at(now, 60_000));
        assert!(light.is_on());
        light.apply("TOGGLE", now);
        assert!(!light.is_on());
    }

    #[test]
    fn pulse_releases_after_a_second() {
        let t0 = Instant::now();
        let mut relay = Actuator::new("(0,0)", "Garage", Variant::Pulsed, TimerSpec::default());
        relay.apply("PULSE", t0);
        relay.advance(at(t0, 500));
        assert!(relay.is_on());
        assert!(relay.timer_armed());
        relay.advance(at(t0, 1100));
        assert!(!relay.is_on());
        assert!(!relay.timer_armed());
    }

    #[test]
    fn pulse_relay_toggle_leaves_no_timer() {
        let t0 = Instant::now();
        let mut relay = Actuator::new("(0,0)", "Garage", Variant::Pulsed, TimerSpec::default());
        relay.apply("TOGGLE", t0);
        assert!(relay.is_on());
        assert!(!relay.timer_armed());
        relay.advance(at(t0, 5000));
        assert!(relay.is_on());

        relay.apply("PULSE", at(t0, 6000));
        relay.apply("TOGGLE", at(t0, 6200));
        assert!(!relay.is_on());
        assert!(!relay.timer_armed());
    }

    #[test]
    fn ventilator_stops_after_lag() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(5, 0));
        fan.apply("TOGGLE", t0);
        assert!(fan.is_on());
        fan.apply("TOGGLE", at(t0, 2000));
        assert!(fan.is_on());
        assert!(fan.stop_requested());
        fan.advance(at(t0, 6900));
        assert!(fan.is_on());
        fan.advance(at(t0, 7100));
        assert!(!fan.is_on());
        assert!(!fan.timer_armed());
        assert!(!fan.stop_requested());
    }

    #[test]
    fn ventilator_runs_through_exact_lag_and_max_run() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(5, 0));
        fan.apply("TOGGLE", t0);
        fan.apply("TOGGLE", at(t0, 2000));
        fan.advance(at(t0, 7000));
        assert!(fan.is_on());
        fan.advance(at(t0, 7001));
        assert!(!fan.is_on());

        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(30, 10));
        fan.apply("TOGGLE", t0);
        fan.advance(at(t0, 10_000));
        assert!(fan.is_on());
        fan.advance(at(t0, 10_001));
        assert!(!fan.is_on());
    }

    #[test]
    fn ventilator_max_run_is_a_hard_ceiling() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(30, 10));
        fan.apply("TOGGLE", t0);
        fan.advance(at(t0, 9_900));
        assert!(fan.is_on());
        fan.advance(at(t0, 10_100));
        assert!(!fan.is_on());
        assert!(!fan.timer_armed());
    }

    #[test]
    fn ventilator_max_run_wins_over_pending_lag() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(30, 10));
        fan.apply("TOGGLE", t0);
        fan.apply("TOGGLE", at(t0, 8_000));
        fan.advance(at(t0, 10_100));
        assert!(!fan.is_on());
        assert!(!fan.stop_requested());
    }

    #[test]
    fn ventilator_without_limits_runs_until_stopped() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(0, 0));
        fan.apply("TOGGLE", t0);
        fan.advance(at(t0, 3_600_000));
        assert!(fan.is_on());
        fan.apply("TOGGLE", at(t0, 3_600_000));
        fan.advance(at(t0, 3_600_001));
        assert!(!fan.is_on());
    }

    #[test]
    fn restart_after_stop_clears_stop_request() {
        let t0 = Instant::now();
        let mut fan = Actuator::new("(0,1)", "Bathroom", Variant::TimedRun, TimerSpec::new(1, 0));
        fan.apply("TOGGLE", t0);
        fan.apply("TOGGLE", at(t0, 100));
        fan.advance(at(t0, 1_200));
        assert!(!fan.is_on());
        fan.apply("TOGGLE", at(t0, 2_000));
        assert!(fan.is_on());
        assert!(!fan.stop_requested());
        fan.advance(at(t0, 10_000));
        assert!(fan.is_on());
    }

    #[test]
    fn dimmer_uses_on_off() {
        let now = Instant::now();
        let mut dimmer = Actuator::new("(1,4)", "Living", Variant::Dimmer, TimerSpec::default());
        assert_eq!(dimmer.apply("TOGGLE", now), Applied::Ignored);
        assert!(!dimmer.is_on());
        dimmer.apply("ON", now);
        dimmer.apply("ON", now);
        assert!(dimmer.is_on());
        dimmer.apply("OFF", now);
        assert!(!dimmer.is_on());
    }

    #[test]
    fn timer_declarations() {
        assert_eq!(
            TimerSpec::parse("RelayTimer00", "(0,1);Bath;5;600"),
            Ok(Some((
                "(0,1)".to_string(),
                TimerSpec {
                    lag: Duration::from_secs(5),
                    max_run: Some(Duration::from_secs(600)),
                }
            )))
        );
        assert_eq!(TimerSpec::parse("RelayTimer00", "(0,1);Not Used;5;0"), Ok(None));
        assert!(matches!(
            TimerSpec::parse("RelayTimer00", "(0,1);Bath;five;0"),
            Err(DeclarationError::Number { field: "lag", .. })
        ));
        assert!(TimerSpec::parse("RelayTimer00", "(0,1);Bath;5").is_err());
    }
}
