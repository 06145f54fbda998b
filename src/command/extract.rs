//! Pull commands out of agent output.
//!
//! Structured plans carry their actions under well-known keys
//! (`zone_adjustments`, `drone_assignments`, ...). Free text is scanned for
//! inline `{"service": ..., "action": ...}` objects.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Command;
use crate::error::CommandError;

static INLINE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{[^{}]*"service"[^{}]*"action"[^{}]*\}"#).unwrap());

/// A command as found in agent output, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCommand {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ExtractedCommand {
    fn new(service: &str, action: &str, parameters: Value) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
            parameters: match parameters {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    fn dedup_key(&self) -> String {
        // Map keys are already sorted, so the serialized form is canonical.
        format!(
            "{}|{}|{}",
            self.service,
            self.action,
            Value::Object(self.parameters.clone())
        )
    }

    /// Turn this into a [`Command`], checking the service and action.
    pub fn into_command(self) -> Result<Command, CommandError> {
        Command::new(self.service.parse()?, self.action, self.parameters)
    }
}

fn has(item: &Value, keys: &[&str]) -> bool {
    keys.iter().all(|k| item.get(*k).is_some())
}

fn items<'a>(output: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    output
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|v| v.is_object())
}

fn from_plan(output: &Value) -> Vec<ExtractedCommand> {
    let mut commands = Vec::new();

    for item in items(output, "zone_adjustments").filter(|i| has(i, &["zone_id", "capacity"])) {
        commands.push(ExtractedCommand::new(
            "grid",
            "adjust_zone",
            json!({"zone_id": item["zone_id"], "capacity": item["capacity"]}),
        ));
    }
    for item in items(output, "priority_settings").filter(|i| has(i, &["infrastructure_id", "level"])) {
        commands.push(ExtractedCommand::new(
            "grid",
            "set_priority",
            json!({"infrastructure_id": item["infrastructure_id"], "level": item["level"]}),
        ));
    }
    for item in items(output, "drone_assignments").filter(|i| has(i, &["drone_id", "incident_id"])) {
        commands.push(ExtractedCommand::new(
            "emergency",
            "assign_drone",
            json!({"drone_id": item["drone_id"], "incident_id": item["incident_id"]}),
        ));
    }
    for item in items(output, "incident_updates").filter(|i| has(i, &["incident_id", "status"])) {
        commands.push(ExtractedCommand::new(
            "emergency",
            "update_incident",
            json!({"incident_id": item["incident_id"], "status": item["status"]}),
        ));
    }
    for item in items(output, "traffic_redirections").filter(|i| has(i, &["sector_id", "target_reduction"])) {
        commands.push(ExtractedCommand::new(
            "traffic",
            "redirect",
            json!({"sector_id": item["sector_id"], "target_reduction": item["target_reduction"]}),
        ));
    }
    for item in items(output, "route_blocks").filter(|i| has(i, &["sector_id", "duration_minutes"])) {
        commands.push(ExtractedCommand::new(
            "traffic",
            "block_route",
            json!({
                "sector": item["sector_id"],
                "reason": item.get("reason").and_then(Value::as_str).unwrap_or("Emergency blocking"),
                "duration_minutes": item["duration_minutes"],
            }),
        ));
    }
    for key in ["commands", "actions", "recommendations", "executed_commands"] {
        for item in items(output, key) {
            if let Ok(cmd) = serde_json::from_value::<ExtractedCommand>(item.clone()) {
                commands.push(cmd);
            }
        }
    }
    commands
}

fn from_text(text: &str) -> Vec<ExtractedCommand> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        let structured = from_plan(&value);
        if !structured.is_empty() {
            return structured;
        }
    }
    INLINE_COMMAND
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<ExtractedCommand>(m.as_str()).ok())
        .collect()
}

/// Extract the commands contained in an agent's output.
///
/// Duplicates (same service, action and parameters) are dropped, keeping
/// the first occurrence.
pub fn extract_commands_from_output(output: &Value) -> Vec<ExtractedCommand> {
    let commands = match output {
        Value::String(text) => from_text(text),
        Value::Object(_) => from_plan(output),
        Value::Array(list) => list.iter().flat_map(extract_commands_from_output).collect(),
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    commands
        .into_iter()
        .filter(|cmd| seen.insert(cmd.dedup_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_keys_produce_commands() {
        let output = json!({
            "zone_adjustments": [{"zone_id": "Z001", "capacity": 0.7, "reason": "heat"}],
            "priority_settings": [{"infrastructure_id": "hospital", "level": "critical"}],
            "drone_assignments": [{"drone_id": "D001", "incident_id": "E-1001"}, {"drone_id": "D002"}],
            "route_blocks": [{"sector_id": "S003", "duration_minutes": 60}],
            "coordination_notes": "grid first"
        });
        let commands = extract_commands_from_output(&output);
        let actions: Vec<&str> = commands.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(actions, vec!["adjust_zone", "set_priority", "assign_drone", "block_route"]);

        let block = &commands[3];
        assert_eq!(block.parameters["sector"], "S003");
        assert_eq!(block.parameters["reason"], "Emergency blocking");
        assert!(block.clone().into_command().is_ok());
    }

    #[test]
    fn test_generic_items_and_dedup() {
        let output = json!({
            "commands": [
                {"service": "traffic", "action": "redirect", "parameters": {"sector_id": "S001", "target_reduction": 0.4}},
                {"service": "traffic", "action": "redirect", "parameters": {"target_reduction": 0.4, "sector_id": "S001"}},
                {"note": "not a command"}
            ]
        });
        assert_eq!(extract_commands_from_output(&output).len(), 1);
    }

    #[test]
    fn test_inline_commands_in_text() {
        let text = r#"First I will call {"service": "grid", "action": "report_status"} and then
            {"service": "emergency", "action": "assign_drone", "parameters": {"drone_id": "D1"}} which is nested."#;
        let commands = extract_commands_from_output(&json!(text));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].service, "grid");
    }

    #[test]
    fn test_json_text_is_parsed_as_plan() {
        let text = r#"{"drone_assignments": [{"drone_id": "D003", "incident_id": "E-1002"}]}"#;
        let commands = extract_commands_from_output(&json!(text));
        assert_eq!(commands[0].action, "assign_drone");
    }

    #[test]
    fn test_unknown_service_fails_conversion() {
        let cmd = ExtractedCommand::new("weather", "report_status", json!({}));
        assert!(cmd.into_command().is_err());
        assert!(extract_commands_from_output(&json!(42)).is_empty());
    }
}
