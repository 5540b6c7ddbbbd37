use std::time::Duration;

// Board index. PiFace style stacks hold up to 4 boards.
pub type BoardIdx = u8;
// Pin or relay index on a single board.
pub type PinIdx = u8;

/// Input pins per board.
pub const INPUT_PINS: PinIdx = 8;
/// Output pins per board.
pub const OUTPUT_PINS: PinIdx = 8;
/// Relays per board.
pub const RELAYS: PinIdx = 2;

/// Pulses longer than this are a long press.
pub const LONG_PRESS: Duration = Duration::from_millis(750);
/// Pulses longer than this (and not long) are a normal press.
pub const SHORT_PRESS: Duration = Duration::from_millis(250);
/// Max time between two short pulses to still count as a double press.
pub const DOUBLE_PRESS_GAP: Duration = Duration::from_secs(1);
/// Fixed auto-release time of a pulsed relay. Not configurable.
pub const PULSE_RELEASE: Duration = Duration::from_secs(1);

/// Description marking a declaration as disabled.
pub const NOT_USED: &str = "Not Used";

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "domo-gate";

pub const DEFAULT_TOPIC_BASE: &str = "domotica";
