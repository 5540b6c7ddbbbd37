//! Light simulation scenarios and their day/time scheduler.
//!
//! A scenario is declared as
//! `name;<days> <time>;activation-event;<days> <time>;deactivation-event;queue-ref`
//! where `<days>` is `*` or a comma list of weekday names. Activating a
//! scenario installs tagged recurring jobs; each due job yields an event to
//! publish on the scenario's queues.
use crate::config::{numbered_entries, resolve_queues, Attributes};
use crate::consts::NOT_USED;
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("{key}: expected 6 ';' separated fields, found {found}")]
    FieldCount { key: String, found: usize },
    #[error("{key}: {value:?} is not '<days> <time>'")]
    Moment { key: String, value: String },
    #[error("{key}: unknown weekday {day:?}")]
    Weekday { key: String, day: String },
    #[error("{key}: invalid time {value:?}, expected HH:MM or HH:MM:SS")]
    Time { key: String, value: String },
}

/// Weekday from its English name. `Saterday` is a long-standing spelling in
/// deployed configurations.
fn weekday(name: &str) -> Option<Weekday> {
    match name {
        "Monday" => Some(Weekday::Mon),
        "Tuesday" => Some(Weekday::Tue),
        "Wednesday" => Some(Weekday::Wed),
        "Thursday" => Some(Weekday::Thu),
        "Friday" => Some(Weekday::Fri),
        "Saturday" | "Saterday" => Some(Weekday::Sat),
        "Sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySet {
    Every,
    Days(Vec<Weekday>),
}

/// When a job fires: day set plus time of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moment {
    pub days: DaySet,
    pub time: NaiveTime,
}

impl Moment {
    fn parse(key: &str, value: &str) -> Result<Self, ScenarioError> {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        let Some((time, days)) = tokens.split_last().filter(|(_, days)| !days.is_empty()) else {
            return Err(ScenarioError::Moment {
                key: key.to_string(),
                value: value.to_string(),
            });
        };

        let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .map_err(|_| ScenarioError::Time {
                key: key.to_string(),
                value: time.to_string(),
            })?;

        // "Monday, Friday" splits over two tokens.
        let days = days.concat();
        let days = if days == "*" {
            DaySet::Every
        } else {
            let mut set = Vec::new();
            for name in days.split(',').filter(|d| !d.is_empty()) {
                let day = weekday(name).ok_or_else(|| ScenarioError::Weekday {
                    key: key.to_string(),
                    day: name.to_string(),
                })?;
                if !set.contains(&day) {
                    set.push(day);
                }
            }
            DaySet::Days(set)
        };
        Ok(Self { days, time })
    }
}

/// One activation/deactivation pair of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioAction {
    pub activation: Moment,
    pub activation_event: String,
    pub deactivation: Moment,
    pub deactivation_event: String,
    /// Resolved destination queues. Empty when the reference did not resolve.
    pub queues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub actions: Vec<ScenarioAction>,
}

/// Compile all `SimulationNN` entries. Entries sharing a scenario name are
/// merged in declaration order.
pub fn compile_scenarios(
    attributes: &Attributes,
) -> (IndexMap<String, Scenario>, Vec<ScenarioError>) {
    let mut scenarios: IndexMap<String, Scenario> = IndexMap::new();
    let mut diagnostics = Vec::new();

    for (key, value) in numbered_entries(attributes, "Simulation") {
        if value.starts_with(NOT_USED) {
            debug!("{} is not used", key);
            continue;
        }
        match parse_action(attributes, key, value) {
            Ok((name, action)) => {
                debug!("Adding {} to scenario {}", key, name);
                scenarios
                    .entry(name.clone())
                    .or_insert_with(|| Scenario {
                        name,
                        actions: Vec::new(),
                    })
                    .actions
                    .push(action);
            }
            Err(err) => {
                warn!("Skipping scenario declaration: {}", err);
                diagnostics.push(err);
            }
        }
    }
    (scenarios, diagnostics)
}

fn parse_action(
    attributes: &Attributes,
    key: &str,
    value: &str,
) -> Result<(String, ScenarioAction), ScenarioError> {
    let fields: Vec<&str> = value.split(';').collect();
    let [name, activation, activation_event, deactivation, deactivation_event, queue_ref] =
        fields.as_slice()
    else {
        return Err(ScenarioError::FieldCount {
            key: key.to_string(),
            found: fields.len(),
        });
    };

    let queues = resolve_queues(attributes, queue_ref).unwrap_or_else(|| {
        warn!(
            "Invalid queue reference '{}' for {}. No events sent there",
            queue_ref.trim(),
            key
        );
        Vec::new()
    });

    Ok((
        name.trim().to_string(),
        ScenarioAction {
            activation: Moment::parse(key, activation)?,
            activation_event: activation_event.to_string(),
            deactivation: Moment::parse(key, deactivation)?,
            deactivation_event: deactivation_event.to_string(),
            queues,
        },
    ))
}

/// Event emitted by a due job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub tag: String,
    pub event: String,
    pub queues: Vec<String>,
}

#[derive(Debug, Clone)]
struct Job {
    tag: String,
    /// `None` fires every day.
    weekday: Option<Weekday>,
    time: NaiveTime,
    event: String,
    queues: Vec<String>,
    next_run: Option<NaiveDateTime>,
}

impl Job {
    /// First occurrence strictly after `now`.
    fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut date = now.date();
        // A week and a day covers every weekday including today's later slot.
        for _ in 0..8 {
            let candidate = date.and_time(self.time);
            let day_matches = self.weekday.map_or(true, |wd| date.weekday() == wd);
            if day_matches && candidate > now {
                return Some(candidate);
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = match self.weekday {
            Some(day) => day.to_string(),
            None => "every day".to_string(),
        };
        write!(f, "[{}] {} at {} -> {}", self.tag, day, self.time, self.event)?;
        match self.next_run {
            Some(next) => write!(f, " (next {})", next),
            None => Ok(()),
        }
    }
}

/// Recurring jobs grouped by scenario tag.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the scenario's jobs, replacing any it already had.
    pub fn activate(&mut self, scenario: &Scenario, now: NaiveDateTime) {
        let removed = self.deactivate(&scenario.name);
        if removed > 0 {
            debug!("Replacing {} jobs of {}", removed, scenario.name);
        }

        for action in &scenario.actions {
            self.install(
                &scenario.name,
                &action.activation,
                &action.activation_event,
                &action.queues,
                now,
            );
            self.install(
                &scenario.name,
                &action.deactivation,
                &action.deactivation_event,
                &action.queues,
                now,
            );
        }
        info!(
            "Scenario {} activated with {} jobs",
            scenario.name,
            self.job_count(&scenario.name)
        );
    }

    fn install(
        &mut self,
        tag: &str,
        moment: &Moment,
        event: &str,
        queues: &[String],
        now: NaiveDateTime,
    ) {
        let weekdays: Vec<Option<Weekday>> = match &moment.days {
            DaySet::Every => vec![None],
            DaySet::Days(days) => days.iter().copied().map(Some).collect(),
        };
        for weekday in weekdays {
            let mut job = Job {
                tag: tag.to_string(),
                weekday,
                time: moment.time,
                event: event.to_string(),
                queues: queues.to_vec(),
                next_run: None,
            };
            job.next_run = job.next_after(now);
            debug!("Scheduled {}", job);
            self.jobs.push(job);
        }
    }

    /// Remove every job of a scenario. Returns how many were removed.
    pub fn deactivate(&mut self, tag: &str) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.tag != tag);
        before - self.jobs.len()
    }

    /// Scenarios with at least one job, in installation order.
    pub fn active_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for job in &self.jobs {
            if !tags.contains(&job.tag) {
                tags.push(job.tag.clone());
            }
        }
        tags
    }

    pub fn job_count(&self, tag: &str) -> usize {
        self.jobs.iter().filter(|job| job.tag == tag).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Fire every job whose time has come. Each fires once and is moved to
    /// its next occurrence after `now`; missed occurrences are not replayed.
    pub fn run_pending(&mut self, now: NaiveDateTime) -> Vec<FiredJob> {
        let mut fired = Vec::new();
        for job in self.jobs.iter_mut() {
            let Some(next) = job.next_run else {
                continue;
            };
            if next > now {
                continue;
            }
            info!("Running job [{}] {}", job.tag, job.event);
            fired.push(FiredJob {
                tag: job.tag.clone(),
                event: job.event.clone(),
                queues: job.queues.clone(),
            });
            job.next_run = job.next_after(now);
        }
        fired
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} scheduled jobs", self.jobs.len())?;
        for job in &self.jobs {
            writeln!(f, "  {}", job)?;
        }
        Ok(())
    }
}
