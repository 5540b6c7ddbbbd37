//! Button gesture classification.
//!
//! Each configured input pin is sampled once per tick. Transitions are turned
//! into gestures:
//!
//! | Gesture         | Condition                                               |
//! |-----------------|---------------------------------------------------------|
//! | `UP`            | 0 -> 1                                                  |
//! | `DOWN`          | 1 -> 0                                                  |
//! | `PRESSEDLONG`   | on DOWN, pulse > 0.75s                                  |
//! | `PRESSED`       | on DOWN, 0.25s < pulse <= 0.75s                         |
//! | `PRESSEDDOUBLE` | on DOWN, second pulse <= 0.25s while a short one is armed |
//!
//! Only a short pulse arms the double press; long and medium presses never do.
use crate::board::Point;
use crate::config::{numbered_entries, resolve_queues, Attributes};
use crate::consts::{DOUBLE_PRESS_GAP, LONG_PRESS, NOT_USED, SHORT_PRESS};
use crate::rules::DeclarationError;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Gesture {
    Up,
    Down,
    Pressed,
    PressedLong,
    PressedDouble,
}

impl Gesture {
    pub fn as_str(self) -> &'static str {
        match self {
            Gesture::Up => "UP",
            Gesture::Down => "DOWN",
            Gesture::Pressed => "PRESSED",
            Gesture::PressedLong => "PRESSEDLONG",
            Gesture::PressedDouble => "PRESSEDDOUBLE",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger identifier of a gesture: `<PROCESS>_<board>_<pin>_<GESTURE>`.
pub fn trigger_name(process_name: &str, point: Point, gesture: Gesture) -> String {
    format!(
        "{}_{}_{}_{}",
        process_name.to_uppercase(),
        point.board,
        point.index,
        gesture
    )
}

/// One physical button and its classification state.
#[derive(Debug, Clone)]
pub struct InputPoint {
    pub point: Point,
    pub description: String,
    /// Resolved destination queues for this button's events.
    pub consumers: Vec<String>,
    sample: bool,
    previous: bool,
    signal_up: Option<Instant>,
    signal_down: Option<Instant>,
    previous_signal_down: Option<Instant>,
    /// A short pulse was seen and a second one would make a double press.
    double_armed: bool,
}

impl InputPoint {
    pub fn new(point: Point, description: &str, consumers: Vec<String>) -> Self {
        Self {
            point,
            description: description.to_string(),
            consumers,
            sample: false,
            previous: false,
            signal_up: None,
            signal_down: None,
            previous_signal_down: None,
            double_armed: false,
        }
    }

    pub fn double_armed(&self) -> bool {
        self.double_armed
    }

    /// Feed the current sample and classify. Returns the edge gesture
    /// followed by at most one press gesture.
    pub fn classify(&mut self, sample: bool, now: Instant) -> Vec<Gesture> {
        self.sample = sample;
        let mut gestures = Vec::new();

        if self.sample == self.previous {
            return gestures;
        }

        if self.sample {
            self.signal_up = Some(now);
            self.previous_signal_down = self.signal_down;
            info!(
                "Up event detected on {} for {}",
                self.point, self.description
            );
            gestures.push(Gesture::Up);
        } else {
            self.signal_down = Some(now);
            info!(
                "Down event detected on {} for {}",
                self.point, self.description
            );
            gestures.push(Gesture::Down);
            if let Some(press) = self.classify_pulse(now) {
                info!("{} event for {}", press, self.description);
                gestures.push(press);
            }
        }

        self.previous = self.sample;
        gestures
    }

    fn classify_pulse(&mut self, signal_down: Instant) -> Option<Gesture> {
        // Down without a seen Up (eg. held during startup) counts as an
        // instant pulse.
        let signal_up = self.signal_up.unwrap_or(signal_down);
        let duration = signal_down.saturating_duration_since(signal_up);

        // Never released before means the gap is unbounded.
        let within_gap = self
            .previous_signal_down
            .map(|down| signal_up.saturating_duration_since(down) <= DOUBLE_PRESS_GAP)
            .unwrap_or(false);
        if !within_gap {
            self.double_armed = false;
        }

        if duration > LONG_PRESS {
            Some(Gesture::PressedLong)
        } else if duration > SHORT_PRESS {
            Some(Gesture::Pressed)
        } else if !self.double_armed {
            self.double_armed = true;
            None
        } else {
            self.double_armed = false;
            Some(Gesture::PressedDouble)
        }
    }
}

/// Build input points from `ButtonNN` declarations:
/// `id;description;consumer1,consumer2`.
///
/// Disabled and malformed entries are skipped. Unresolvable consumer
/// references are dropped one by one.
pub fn compile_inputs(attributes: &Attributes) -> (Vec<InputPoint>, Vec<DeclarationError>) {
    let mut points = Vec::new();
    let mut diagnostics = Vec::new();

    for (key, value) in numbered_entries(attributes, "Button") {
        match parse_input(attributes, key, value) {
            Ok(Some(point)) => {
                debug!(
                    "Initializing input {} - {} -> {:?}",
                    point.point, point.description, point.consumers
                );
                points.push(point);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Skipping input declaration: {}", err);
                diagnostics.push(err);
            }
        }
    }
    (points, diagnostics)
}

fn parse_input(
    attributes: &Attributes,
    key: &str,
    value: &str,
) -> Result<Option<InputPoint>, DeclarationError> {
    let fields: Vec<&str> = value.split(';').collect();
    let [id, description, consumers] = fields.as_slice() else {
        return Err(DeclarationError::FieldCount {
            key: key.to_string(),
            expected: 3,
            found: fields.len(),
        });
    };
    // No description means a dead input.
    if *description == NOT_USED || description.trim().is_empty() {
        return Ok(None);
    }
    let point = id.parse::<Point>().map_err(|reason| DeclarationError::Address {
        key: key.to_string(),
        reason,
    })?;

    let mut queues = Vec::new();
    for reference in consumers.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        match resolve_queues(attributes, reference) {
            Some(names) => queues.extend(names),
            None => warn!(
                "Invalid queue reference '{}' for input {}. No events sent there",
                reference, point
            ),
        }
    }
    Ok(Some(InputPoint::new(point, description, queues)))
}
