//! Rule compiler: actuator declarations -> trigger dispatch table.
//!
//! A declaration reads `id;description;trigger1|action1,trigger2|action2`.
//! The table maps every trigger to the `(actuator, action)` pairs listening
//! to it, in declaration order.
use crate::config::{numbered_entries, Attributes};
use crate::consts::NOT_USED;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// A configuration entry that could not be used. The entry is skipped and
/// compilation carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("{key}: expected {expected} ';' separated fields, found {found}")]
    FieldCount {
        key: String,
        expected: usize,
        found: usize,
    },
    #[error("{key}: {reason}")]
    Address { key: String, reason: String },
    #[error("{key}: logic item {item:?} is not in trigger|action form")]
    LogicItem { key: String, item: String },
    #[error("{key}: {field} {value:?} is not a whole number")]
    Number {
        key: String,
        field: &'static str,
        value: String,
    },
}

/// One actuator as declared. Immutable once compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorRule {
    pub id: String,
    pub description: String,
    /// (trigger, action) pairs in declaration order.
    pub logic: Vec<(String, String)>,
}

impl ActuatorRule {
    /// Parse a declaration. `Ok(None)` for a disabled entry.
    pub fn parse(key: &str, value: &str) -> Result<Option<Self>, DeclarationError> {
        let fields: Vec<&str> = value.split(';').collect();
        let [id, description, logic] = fields.as_slice() else {
            return Err(DeclarationError::FieldCount {
                key: key.to_string(),
                expected: 3,
                found: fields.len(),
            });
        };
        if *description == NOT_USED {
            return Ok(None);
        }

        let mut pairs = Vec::new();
        for item in logic.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (trigger, action) = match item.split('|').collect::<Vec<_>>().as_slice() {
                [trigger, action] if !trigger.is_empty() && !action.is_empty() => {
                    (trigger.to_string(), action.to_string())
                }
                _ => {
                    return Err(DeclarationError::LogicItem {
                        key: key.to_string(),
                        item: item.to_string(),
                    })
                }
            };
            pairs.push((trigger, action));
        }

        Ok(Some(Self {
            id: id.trim().to_string(),
            description: description.to_string(),
            logic: pairs,
        }))
    }
}

impl fmt::Display for ActuatorRule {
    /// Back to declaration form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};", self.id, self.description)?;
        for (i, (trigger, action)) in self.logic.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}|{}", trigger, action)?;
        }
        Ok(())
    }
}

/// One entry of the dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub actuator: String,
    pub action: String,
}

/// trigger -> ordered actions. Built whole, never patched.
#[derive(Debug, Default, Clone)]
pub struct DispatchTable {
    entries: HashMap<String, Vec<Dispatch>>,
}

impl DispatchTable {
    pub fn build(rules: &[ActuatorRule]) -> Self {
        let mut entries: HashMap<String, Vec<Dispatch>> = HashMap::new();
        for rule in rules {
            for (trigger, action) in &rule.logic {
                debug!("Adding {}|{} for actuator {}", trigger, action, rule.id);
                entries.entry(trigger.clone()).or_default().push(Dispatch {
                    actuator: rule.id.clone(),
                    action: action.clone(),
                });
            }
        }
        Self { entries }
    }

    /// Actions for a trigger. Empty for triggers nobody listens to.
    pub fn lookup(&self, trigger: &str) -> &[Dispatch] {
        self.entries.get(trigger).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct triggers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compile every `<prefix>NN` declaration of a process block.
pub fn compile(attributes: &Attributes, prefix: &str) -> (Vec<ActuatorRule>, Vec<DeclarationError>) {
    let mut rules = Vec::new();
    let mut diagnostics = Vec::new();

    for (key, value) in numbered_entries(attributes, prefix) {
        match ActuatorRule::parse(key, value) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => debug!("{} is not used", key),
            Err(err) => {
                warn!("Skipping actuator declaration: {}", err);
                diagnostics.push(err);
            }
        }
    }
    (rules, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(entries: &[(&str, &str)]) -> Attributes {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pairs(dispatches: &[Dispatch]) -> Vec<(&str, &str)> {
        dispatches
            .iter()
            .map(|d| (d.actuator.as_str(), d.action.as_str()))
            .collect()
    }

    #[test]
    fn dispatch_follows_declaration_order() {
        let attrs = attributes(&[
            ("Light00", "A1;desc;T1|ON,T2|OFF"),
            ("Light01", "A2;desc;T1|TOGGLE"),
        ]);
        let (rules, diagnostics) = compile(&attrs, "Light");
        assert!(diagnostics.is_empty());
        let table = DispatchTable::build(&rules);
        assert_eq!(pairs(table.lookup("T1")), [("A1", "ON"), ("A2", "TOGGLE")]);
        assert_eq!(pairs(table.lookup("T2")), [("A1", "OFF")]);
        assert!(table.lookup("T3").is_empty());
    }

    #[test]
    fn unused_entries_are_not_registered() {
        let attrs = attributes(&[
            ("Relay00", "(0,0);Not Used;T1|PULSE"),
            ("Relay01", "(0,1);Gate;T1|TOGGLE"),
        ]);
        let (rules, _) = compile(&attrs, "Relay");
        let table = DispatchTable::build(&rules);
        assert_eq!(pairs(table.lookup("T1")), [("(0,1)", "TOGGLE")]);
    }

    #[test]
    fn sentinel_is_case_sensitive() {
        let attrs = attributes(&[("Relay00", "(0,0);not used;T1|PULSE")]);
        let (rules, _) = compile(&attrs, "Relay");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let attrs = attributes(&[
            ("Light00", "A1;desc"),
            ("Light01", "A2;desc;T1-ON"),
            ("Light02", "A3;desc;T1|ON|OFF"),
            ("Light03", "A4;desc;T1|ON"),
        ]);
        let (rules, diagnostics) = compile(&attrs, "Light");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "A4");
        assert_eq!(diagnostics.len(), 3);
        assert!(matches!(diagnostics[0], DeclarationError::FieldCount { found: 2, .. }));
        assert!(matches!(diagnostics[1], DeclarationError::LogicItem { .. }));
    }

    #[test]
    fn empty_logic_is_allowed() {
        let rule = ActuatorRule::parse("Light00", "A1;Spare;").unwrap().unwrap();
        assert!(rule.logic.is_empty());
    }

    #[test]
    fn recompiling_serialized_rules_keeps_order() {
        let attrs = attributes(&[
            ("Light00", "A1;Hall;T1|ON,T2|OFF"),
            ("Light01", "A2;Porch;T2|TOGGLE,T1|TOGGLE"),
            ("Light02", "A3;Desk;T1|OFF"),
        ]);
        let (rules, _) = compile(&attrs, "Light");
        let table = DispatchTable::build(&rules);

        let serialized: Vec<(String, String)> = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (format!("Light{:02}", i), rule.to_string()))
            .collect();
        let again: Attributes = serialized.into_iter().collect();
        let (rules_again, _) = compile(&again, "Light");
        let table_again = DispatchTable::build(&rules_again);

        assert_eq!(rules, rules_again);
        for trigger in ["T1", "T2"] {
            assert_eq!(table.lookup(trigger), table_again.lookup(trigger));
        }
    }
}
