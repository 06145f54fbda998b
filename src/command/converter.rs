//! Conversion of agent task outputs into validated [`Command`]s.
//!
//! Each task output is expected to be one structured plan. Outputs that are
//! not recognisable plans fall back to keyword matching so the agent still
//! gets credit for the kinds of actions it talked about.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::{Command, ServiceType};

/// Error raised when a task output cannot be parsed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConverterError {
    pub message: String,
}

impl ConverterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

const FALLBACK_PATTERNS: [(&str, &str, ServiceType); 6] = [
    ("grid zone", "adjust_zone", ServiceType::Grid),
    ("infrastructure", "set_priority", ServiceType::Grid),
    ("drone", "assign_drone", ServiceType::Emergency),
    ("incident", "update_incident", ServiceType::Emergency),
    ("traffic", "redirect", ServiceType::Traffic),
    ("route", "block_route", ServiceType::Traffic),
];

/// Parse raw model text into a JSON object, tolerating prose around it.
pub fn parse_task_output(text: &str) -> Result<Value, ConverterError> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(ConverterError::new("No valid JSON found in result"))
}

fn build(service: ServiceType, action: &str, parameters: Value, out: &mut Vec<Command>) {
    let parameters = match parameters {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    match Command::new(service, action, parameters) {
        Ok(cmd) => {
            tracing::debug!("  {}: {} {:?}", service, action, cmd.parameters);
            out.push(cmd);
        }
        Err(e) => tracing::warn!("Skipping converted command: {}", e),
    }
}

fn list<'a>(task: &'a Value, key: &str, required: &'a [&'a str]) -> impl Iterator<Item = &'a Value> {
    task.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |item| required.iter().all(|k| item.get(*k).is_some()))
}

fn has_any(task: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| task.get(*k).is_some())
}

fn convert_grid(task: &Value, out: &mut Vec<Command>) {
    for item in list(task, "zone_adjustments", &["zone_id", "capacity"]) {
        build(
            ServiceType::Grid,
            "adjust_zone",
            json!({"zone_id": item["zone_id"], "capacity": item["capacity"]}),
            out,
        );
    }
    for item in list(task, "priority_settings", &["infrastructure_id", "level"]) {
        build(
            ServiceType::Grid,
            "set_priority",
            json!({"infrastructure_id": item["infrastructure_id"], "level": item["level"]}),
            out,
        );
    }
}

fn convert_emergency(task: &Value, out: &mut Vec<Command>) {
    for item in list(task, "drone_assignments", &["drone_id", "incident_id"]) {
        build(
            ServiceType::Emergency,
            "assign_drone",
            json!({"drone_id": item["drone_id"], "incident_id": item["incident_id"]}),
            out,
        );
    }
    for item in list(task, "incident_updates", &["incident_id", "status"]) {
        build(
            ServiceType::Emergency,
            "update_incident",
            json!({"incident_id": item["incident_id"], "status": item["status"]}),
            out,
        );
    }
}

fn convert_traffic(task: &Value, out: &mut Vec<Command>) {
    for item in list(task, "traffic_redirections", &["sector_id", "target_reduction"]) {
        build(
            ServiceType::Traffic,
            "redirect",
            json!({"sector_id": item["sector_id"], "target_reduction": item["target_reduction"]}),
            out,
        );
    }
    for item in list(task, "route_blocks", &["sector_id", "duration_minutes"]) {
        build(
            ServiceType::Traffic,
            "block_route",
            json!({
                "sector": item["sector_id"],
                "reason": item.get("reason").and_then(Value::as_str).unwrap_or("Emergency access"),
                "duration_minutes": item["duration_minutes"],
            }),
            out,
        );
    }
}

/// Keyword fallback for outputs without a recognisable plan.
fn convert_fallback(text: &str, out: &mut Vec<Command>) -> usize {
    let lowered = text.to_lowercase();
    let before = out.len();
    for (pattern, action, service) in FALLBACK_PATTERNS {
        if lowered.contains(pattern) {
            build(service, action, json!({"fallback": true}), out);
        }
    }
    out.len() - before
}

/// Convert one task output (a plan object or raw text) into commands.
pub fn convert_task_output(task: &Value) -> Vec<Command> {
    let mut commands = Vec::new();
    let parsed;
    let task = match task {
        Value::String(text) => match parse_task_output(text) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => {
                convert_fallback(text, &mut commands);
                return commands;
            }
        },
        other => other,
    };

    match task.as_object() {
        Some(map) if map.is_empty() => {
            tracing::debug!("Skipping empty coordination task");
        }
        Some(_) if has_any(task, &["zone_adjustments", "priority_settings"]) => {
            convert_grid(task, &mut commands)
        }
        Some(_) if has_any(task, &["drone_assignments", "incident_updates"]) => {
            convert_emergency(task, &mut commands)
        }
        Some(_) if has_any(task, &["traffic_redirections", "route_blocks"]) => {
            convert_traffic(task, &mut commands)
        }
        _ => {
            let found = convert_fallback(&task.to_string(), &mut commands);
            if found > 0 {
                tracing::info!("Extracted {} fallback tool usages", found);
            }
        }
    }
    commands
}

/// Convert every task output of a run into commands.
pub fn convert_task_outputs(tasks: &[Value]) -> Vec<Command> {
    if tasks.is_empty() {
        tracing::warn!("No task outputs found in agent result");
        return Vec::new();
    }
    let commands: Vec<Command> = tasks.iter().flat_map(convert_task_output).collect();
    tracing::info!("Converted {} commands from {} task outputs", commands.len(), tasks.len());
    commands
}
