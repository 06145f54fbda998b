//! Action-log scorer.
//!
//! Replays the dispatch, resolve and reroute actions an agent took and
//! measures them against ground truth: how many incidents were resolved,
//! how long dispatch-to-resolution took, and whether dispatched drones
//! carried the capabilities their incidents required.
//!
//! Log entries are untrusted JSON. An entry with an unknown action, a
//! missing id or an unreadable timestamp is skipped and counted in
//! [`ScoreRecord::fallback_failures`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::{CommandResult, ServiceType};
use crate::models::ServiceState;
use crate::seed::ScenarioConfig;

/// What an agent did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    Dispatch,
    Resolve,
    Reroute,
}

/// A well-formed action log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix seconds.
    pub timestamp: f64,
    pub action: LogAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_id: Option<String>,
}

fn parse_timestamp(value: &Value) -> Option<f64> {
    let ts = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
            .or_else(|| s.parse().ok())?,
        _ => return None,
    };
    (ts.is_finite() && ts >= 0.0).then_some(ts)
}

impl LogEntry {
    /// Parse an entry, explaining why it is malformed when it is.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let field = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let action = match raw.get("action").and_then(Value::as_str) {
            Some("dispatch") => LogAction::Dispatch,
            Some("resolve") => LogAction::Resolve,
            Some("reroute") => LogAction::Reroute,
            Some(other) => return Err(format!("unknown action '{}'", other)),
            None => return Err("missing action".to_string()),
        };
        let timestamp = raw
            .get("timestamp")
            .and_then(parse_timestamp)
            .ok_or_else(|| "bad timestamp".to_string())?;
        let entry = Self {
            timestamp,
            action,
            drone_id: field("drone_id"),
            incident_id: field("incident_id"),
            sector_id: field("sector_id"),
        };
        let complete = match action {
            LogAction::Dispatch => entry.drone_id.is_some() && entry.incident_id.is_some(),
            LogAction::Resolve => entry.incident_id.is_some(),
            LogAction::Reroute => entry.sector_id.is_some(),
        };
        if complete {
            Ok(entry)
        } else {
            Err(format!("missing ids for {:?}", action))
        }
    }
}

/// Incident requirements and drone capabilities to score against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Incident id to required capabilities.
    pub incidents: BTreeMap<String, Vec<String>>,
    /// Drone id to capabilities.
    pub drones: BTreeMap<String, Vec<String>>,
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn records<'a>(value: Option<&'a Value>, id_keys: &'a [&'a str]) -> Vec<(String, &'a Value)> {
    let id_of = |v: &Value| id_keys.iter().find_map(|k| v.get(*k).and_then(Value::as_str)).map(str::to_string);
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Some(Value::Array(list)) => list.iter().filter_map(|v| id_of(v).map(|id| (id, v))).collect(),
        _ => Vec::new(),
    }
}

impl GroundTruth {
    /// From the emergency service's `/state/get` response.
    pub fn from_emergency_state(state: &Value) -> Self {
        Self {
            incidents: records(state.get("incidents"), &["incident_id", "id"])
                .into_iter()
                .map(|(id, r)| (id, strings(r.get("required_capabilities"))))
                .collect(),
            drones: records(state.get("drones"), &["drone_id", "id"])
                .into_iter()
                .map(|(id, r)| (id, strings(r.get("capabilities"))))
                .collect(),
        }
    }

    pub fn from_seed(config: &ScenarioConfig) -> Self {
        Self {
            incidents: config
                .incidents
                .iter()
                .map(|i| (i.incident_id.clone(), i.required_capabilities.clone()))
                .collect(),
            drones: config
                .drones
                .iter()
                .map(|(id, d)| (id.clone(), d.capabilities.clone()))
                .collect(),
        }
    }
}

impl From<&ServiceState> for GroundTruth {
    fn from(state: &ServiceState) -> Self {
        Self {
            incidents: state
                .incidents
                .iter()
                .map(|i| (i.id.clone(), i.required_capabilities.clone()))
                .collect(),
            drones: state
                .drones
                .iter()
                .map(|d| (d.id.clone(), d.capabilities.clone()))
                .collect(),
        }
    }
}

/// Scores for one scenario run. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    scenario: String,
    coverage: f64,
    eta: f64,
    capability_match: f64,
    latency_seconds: f64,
    steps: usize,
    fallback_failures: usize,
    created_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Resolved over total incidents.
    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    /// Mean dispatch-to-resolution minutes.
    pub fn eta(&self) -> f64 {
        self.eta
    }

    pub fn capability_match(&self) -> f64 {
        self.capability_match
    }

    pub fn latency_seconds(&self) -> f64 {
        self.latency_seconds
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn fallback_failures(&self) -> usize {
        self.fallback_failures
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Score an action log against ground truth.
///
/// `latency_seconds` defaults to the span between the first and last
/// well-formed entries.
pub fn score_actions(
    scenario: &str,
    log: &[Value],
    truth: &GroundTruth,
    latency_seconds: Option<f64>,
) -> ScoreRecord {
    let mut entries = Vec::with_capacity(log.len());
    let mut fallback_failures = 0;
    for raw in log {
        match LogEntry::parse(raw) {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                tracing::warn!("Skipping malformed log entry ({}): {}", reason, raw);
                fallback_failures += 1;
            }
        }
    }
    entries.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut dispatched: BTreeMap<&str, f64> = BTreeMap::new();
    let mut resolved: BTreeSet<&str> = BTreeSet::new();
    let mut durations = Vec::new();
    let (mut dispatches, mut matched) = (0usize, 0usize);

    for entry in &entries {
        match entry.action {
            LogAction::Dispatch => {
                let (Some(drone), Some(incident)) = (entry.drone_id.as_deref(), entry.incident_id.as_deref()) else {
                    continue;
                };
                dispatches += 1;
                let required = truth.incidents.get(incident).map(Vec::as_slice).unwrap_or(&[]);
                if truth
                    .drones
                    .get(drone)
                    .is_some_and(|caps| required.iter().all(|r| caps.contains(r)))
                {
                    matched += 1;
                }
                dispatched.entry(incident).or_insert(entry.timestamp);
            }
            LogAction::Resolve => {
                let Some(incident) = entry.incident_id.as_deref() else {
                    continue;
                };
                if !resolved.insert(incident) {
                    continue;
                }
                if let Some(start) = dispatched.get(incident) {
                    durations.push(((entry.timestamp - start) / 60.0).max(0.0));
                }
            }
            LogAction::Reroute => {}
        }
    }

    // Nothing to resolve counts as full coverage.
    let coverage = match truth.incidents.len() {
        0 => 1.0,
        total => {
            let known = resolved.iter().filter(|id| truth.incidents.contains_key(**id)).count();
            known as f64 / total as f64
        }
    };
    let eta = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };
    let capability_match = if dispatches == 0 {
        0.0
    } else {
        matched as f64 / dispatches as f64
    };
    let span = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => last.timestamp - first.timestamp,
        _ => 0.0,
    };

    ScoreRecord {
        scenario: scenario.to_string(),
        coverage,
        eta,
        capability_match,
        latency_seconds: latency_seconds.unwrap_or(span).max(0.0),
        steps: entries.len(),
        fallback_failures,
        created_at: Utc::now(),
    }
}

/// Action log entries implied by executed commands.
///
/// Successful drone assignments are dispatches, incident updates to
/// `resolved` are resolutions and traffic redirections are reroutes.
pub fn action_log_from_results(results: &[CommandResult]) -> Vec<Value> {
    results
        .iter()
        .filter(|r| r.is_successful())
        .filter_map(|r| {
            let cmd = &r.command;
            let timestamp = cmd.timestamp.unwrap_or_else(|| Utc::now().timestamp() as f64);
            match (cmd.service, cmd.action.as_str()) {
                (ServiceType::Emergency, "assign_drone") => Some(json!({
                    "timestamp": timestamp,
                    "action": "dispatch",
                    "drone_id": cmd.param_str("drone_id"),
                    "incident_id": cmd.param_str("incident_id"),
                })),
                (ServiceType::Emergency, "update_incident")
                    if cmd.param_str("status").as_deref() == Some("resolved") =>
                {
                    Some(json!({
                        "timestamp": timestamp,
                        "action": "resolve",
                        "incident_id": cmd.param_str("incident_id"),
                    }))
                }
                (ServiceType::Traffic, "redirect") => Some(json!({
                    "timestamp": timestamp,
                    "action": "reroute",
                    "sector_id": cmd.param_str("sector_id"),
                })),
                _ => None,
            }
        })
        .collect()
}
