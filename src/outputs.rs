//! Output processes: compiled rules plus the actuators they drive.
use crate::actuator::{compile_timers, Actuator, Applied, TimerSpec, Variant};
use crate::board::{Board, OutputKind, Point};
use crate::config::Attributes;
use crate::rules::{self, ActuatorRule, DeclarationError, DispatchTable};
use indexmap::IndexMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

/// How an output role reads its declarations and drives its hardware.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct OutputLayout {
    /// Declaration key prefix, eg. `Relay`.
    pub prefix: &'static str,
    pub kind: OutputKind,
    pub variant: Variant,
}

/// Dispatch table and actuator states, built and replaced as one unit.
#[derive(Debug, Clone)]
pub struct ActuatorBank {
    layout: OutputLayout,
    table: DispatchTable,
    actuators: IndexMap<String, Actuator>,
}

impl ActuatorBank {
    /// Compile a fresh bank. Every actuator starts off.
    pub fn build(attributes: &Attributes, layout: OutputLayout) -> (Self, Vec<DeclarationError>) {
        let (rules, mut diagnostics) = rules::compile(attributes, layout.prefix);

        let timers = if layout.variant == Variant::TimedRun {
            let (timers, timer_diagnostics) = compile_timers(attributes);
            diagnostics.extend(timer_diagnostics);
            timers
        } else {
            Default::default()
        };

        // Only addressable actuators can be driven; the rest never reach the table.
        let mut usable: Vec<ActuatorRule> = Vec::with_capacity(rules.len());
        let mut actuators = IndexMap::new();
        for rule in rules {
            if let Err(reason) = rule.id.parse::<Point>() {
                let err = DeclarationError::Address {
                    key: rule.id.clone(),
                    reason,
                };
                warn!("Skipping actuator declaration: {}", err);
                diagnostics.push(err);
                continue;
            }
            let timer = match timers.get(&rule.id) {
                Some(timer) => *timer,
                None => {
                    if layout.variant == Variant::TimedRun {
                        warn!(
                            "No timer declared for {} - running without lag or limit",
                            rule.id
                        );
                    }
                    TimerSpec::default()
                }
            };
            let actuator = Actuator::new(&rule.id, &rule.description, layout.variant, timer);
            debug!(
                "Initializing {} - {} ({:?})",
                actuator.id, actuator.description, layout.variant
            );
            actuators.insert(rule.id.clone(), actuator);
            usable.push(rule);
        }

        let bank = Self {
            layout,
            table: DispatchTable::build(&usable),
            actuators,
        };
        (bank, diagnostics)
    }

    /// Apply every action listening to `trigger`, in declaration order.
    /// Returns how many actions took effect.
    pub fn dispatch(&mut self, trigger: &str, now: Instant) -> usize {
        let entries = self.table.lookup(trigger);
        if entries.is_empty() {
            debug!("No actions registered for {}", trigger);
            return 0;
        }

        let mut applied = 0;
        for entry in entries {
            match self.actuators.get_mut(&entry.actuator) {
                Some(actuator) => {
                    if actuator.apply(&entry.action, now) == Applied::Done {
                        applied += 1;
                    }
                }
                None => debug!("Actuator {} vanished from the bank", entry.actuator),
            }
        }
        applied
    }

    pub fn advance(&mut self, now: Instant) {
        for actuator in self.actuators.values_mut() {
            actuator.advance(now);
        }
    }

    /// Write every actuator state to the board.
    pub fn actuate(&self, board: &mut dyn Board) {
        for actuator in self.actuators.values() {
            if let Some(point) = actuator.point {
                board.write(self.layout.kind, point, actuator.is_on());
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Actuator> {
        self.actuators.get(id)
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}

impl fmt::Display for ActuatorBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} actuators, {} triggers",
            self.actuators.len(),
            self.table.len()
        )?;
        for actuator in self.actuators.values() {
            writeln!(
                f,
                "  {} {:<24} on={} timer={}",
                actuator.id,
                actuator.description,
                actuator.is_on(),
                actuator.timer_armed()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MemoryBoard;
    use std::time::Duration;

    const RELAYS: OutputLayout = OutputLayout {
        prefix: "Relay",
        kind: OutputKind::Relay,
        variant: Variant::Pulsed,
    };

    const VENTILATORS: OutputLayout = OutputLayout {
        prefix: "Relay",
        kind: OutputKind::Relay,
        variant: Variant::TimedRun,
    };

    fn attributes(entries: &[(&str, &str)]) -> Attributes {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn dispatch_drives_relays() {
        let attrs = attributes(&[
            ("Relay00", "(0,0);Garage;T1|PULSE"),
            ("Relay01", "(0,1);Gate;T1|TOGGLE,T2|TOGGLE"),
        ]);
        let (mut bank, diagnostics) = ActuatorBank::build(&attrs, RELAYS);
        assert!(diagnostics.is_empty());
        assert_eq!(bank.len(), 2);

        let t0 = Instant::now();
        assert_eq!(bank.dispatch("T1", t0), 2);
        assert_eq!(bank.dispatch("T9", t0), 0);

        let mut board = MemoryBoard::new(1);
        bank.actuate(&mut board);
        assert_eq!(board.relay(Point::new(0, 0)), Some(true));
        assert_eq!(board.relay(Point::new(0, 1)), Some(true));

        bank.advance(t0 + Duration::from_millis(1100));
        bank.actuate(&mut board);
        assert_eq!(board.relay(Point::new(0, 0)), Some(false));
        assert_eq!(board.relay(Point::new(0, 1)), Some(true));
    }

    #[test]
    fn unaddressable_actuators_are_skipped() {
        let attrs = attributes(&[
            ("Relay00", "Garage;Garage;T1|PULSE"),
            ("Relay01", "(0,1);Gate;T1|TOGGLE"),
        ]);
        let (mut bank, diagnostics) = ActuatorBank::build(&attrs, RELAYS);
        assert_eq!(bank.len(), 1);
        assert!(matches!(diagnostics[0], DeclarationError::Address { .. }));
        assert_eq!(bank.dispatch("T1", Instant::now()), 1);
    }

    #[test]
    fn ventilators_pick_up_their_timers() {
        let attrs = attributes(&[
            ("Relay00", "(0,0);Bath;B1|TOGGLE"),
            ("RelayTimer00", "(0,0);Bath timer;5;0"),
            ("Relay01", "(0,1);Kitchen;B2|TOGGLE"),
        ]);
        let (mut bank, diagnostics) = ActuatorBank::build(&attrs, VENTILATORS);
        assert!(diagnostics.is_empty());

        let t0 = Instant::now();
        bank.dispatch("B1", t0);
        bank.dispatch("B1", t0 + Duration::from_secs(2));
        bank.advance(t0 + Duration::from_millis(6900));
        assert!(bank.get("(0,0)").unwrap().is_on());
        bank.advance(t0 + Duration::from_millis(7100));
        assert!(!bank.get("(0,0)").unwrap().is_on());

        // Without a timer the stop happens on the next tick.
        bank.dispatch("B2", t0);
        bank.dispatch("B2", t0 + Duration::from_secs(1));
        bank.advance(t0 + Duration::from_millis(1001));
        assert!(!bank.get("(0,1)").unwrap().is_on());
    }

    #[test]
    fn status_lists_actuators() {
        let attrs = attributes(&[("Relay00", "(0,0);Garage;T1|PULSE")]);
        let (bank, _) = ActuatorBank::build(&attrs, RELAYS);
        let status = bank.to_string();
        assert!(status.starts_with("1 actuators, 1 triggers"));
        assert!(status.contains("Garage"));
    }
}
