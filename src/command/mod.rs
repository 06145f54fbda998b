//! Commands agents issue against the city services.
//!
//! A [`Command`] names a service, an action allowed for that service and a
//! JSON parameter map. [`validate_parameters`] checks the per-action rules
//! before a command is sent; [`CommandExecutor`] maps it onto the service's
//! HTTP endpoint.

pub mod converter;
pub mod executor;
pub mod extract;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CommandError;
use crate::models::{IncidentStatus, PriorityLevel};

pub use converter::{convert_task_outputs, parse_task_output, ConverterError};
pub use executor::CommandExecutor;
pub use extract::{extract_commands_from_output, ExtractedCommand};

/// The services commands can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Grid,
    Emergency,
    Traffic,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [Self::Grid, Self::Emergency, Self::Traffic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Emergency => "emergency",
            Self::Traffic => "traffic",
        }
    }

    /// Actions this service accepts.
    pub fn allowed_actions(&self) -> &'static [&'static str] {
        match self {
            Self::Grid => &["adjust_zone", "set_priority", "report_status"],
            Self::Emergency => &["assign_drone", "update_incident", "report_status"],
            Self::Traffic => &["redirect", "report_conditions", "block_route"],
        }
    }

    pub fn allows(&self, action: &str) -> bool {
        self.allowed_actions().contains(&action)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "emergency" => Ok(Self::Emergency),
            "traffic" => Ok(Self::Traffic),
            other => Err(CommandError::UnknownService(other.to_string())),
        }
    }
}

/// Outcome class of an executed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Success,
    Failure,
    Timeout,
}

fn default_priority() -> Option<u32> {
    Some(1)
}

pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// A single action against one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub service: ServiceType,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default = "default_priority")]
    pub priority: Option<u32>,
    #[serde(default)]
    pub command_id: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl Command {
    /// Build a command, checking that the action is allowed for the service.
    pub fn new(
        service: ServiceType,
        action: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Self, CommandError> {
        let action = action.into();
        if !service.allows(&action) {
            return Err(CommandError::InvalidAction {
                service: service.to_string(),
                action,
            });
        }
        Ok(Self {
            service,
            action,
            parameters,
            priority: Some(1),
            command_id: Some(Uuid::new_v4().to_string()),
            timestamp: Some(unix_now()),
        })
    }

    /// Build a command from a JSON value with `service`, `action` and
    /// optional `parameters`.
    pub fn from_value(value: &Value) -> Result<Self, CommandError> {
        let service: ServiceType = value
            .get("service")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::Malformed("missing 'service'".into()))?
            .parse()?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::Malformed("missing 'action'".into()))?;
        let parameters = match value.get("parameters") {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(_) => return Err(CommandError::Malformed("'parameters' must be an object".into())),
        };
        let mut command = Self::new(service, action, parameters)?;
        if let Some(priority) = value.get("priority").and_then(Value::as_u64) {
            command.priority = Some(priority as u32);
        }
        Ok(command)
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Re-check the action and the parameters, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), CommandError> {
        if !self.service.allows(&self.action) {
            return Err(CommandError::InvalidAction {
                service: self.service.to_string(),
                action: self.action.clone(),
            });
        }
        validate_parameters(&self.action, &self.parameters)
    }

    /// A string parameter, accepting numbers as well.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.parameters.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Whether this is a read-only report action.
    pub fn is_report(&self) -> bool {
        matches!(self.action.as_str(), "report_status" | "report_conditions")
    }

    /// Whether this command was inferred from free text rather than a plan.
    pub fn is_fallback(&self) -> bool {
        self.parameters.get("fallback").and_then(Value::as_bool) == Some(true)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.action)
    }
}

/// Numeric value of a parameter, accepting numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn require<'a>(
    action: &str,
    params: &'a Map<String, Value>,
    names: &[&str],
) -> Result<Vec<&'a Value>, CommandError> {
    names
        .iter()
        .map(|name| {
            params.get(*name).ok_or_else(|| {
                CommandError::params(
                    action,
                    format!("Missing required parameter '{}' for {} command", name, action),
                )
            })
        })
        .collect()
}

fn number_in(action: &str, name: &str, value: &Value, min: f64, max: f64) -> Result<f64, CommandError> {
    let n = as_number(value)
        .ok_or_else(|| CommandError::params(action, format!("{} must be a number, got {}", name, value)))?;
    if !(min..=max).contains(&n) {
        return Err(CommandError::params(
            action,
            format!("{} must be between {} and {}, got {}", name, min, max, n),
        ));
    }
    Ok(n)
}

/// Check the parameters of an action against its rules.
///
/// Report actions accept any parameters.
pub fn validate_parameters(action: &str, params: &Map<String, Value>) -> Result<(), CommandError> {
    match action {
        "adjust_zone" => {
            let found = require(action, params, &["zone_id", "capacity"])?;
            number_in(action, "Capacity", found[1], 0.0, 1.0)?;
        }
        "set_priority" => {
            let found = require(action, params, &["infrastructure_id", "level"])?;
            let level = found[1].as_str().unwrap_or_default();
            if level.parse::<PriorityLevel>().is_err() {
                return Err(CommandError::params(
                    action,
                    format!("Level must be one of {:?}, got {}", PriorityLevel::names(), found[1]),
                ));
            }
        }
        "assign_drone" => {
            require(action, params, &["drone_id", "incident_id"])?;
        }
        "update_incident" => {
            let found = require(action, params, &["incident_id", "status"])?;
            let status = found[1].as_str().unwrap_or_default();
            if status.parse::<IncidentStatus>().is_err() {
                return Err(CommandError::params(
                    action,
                    format!("Status must be one of {:?}, got {}", IncidentStatus::names(), found[1]),
                ));
            }
        }
        "redirect" => {
            let found = require(action, params, &["sector_id", "target_reduction"])?;
            number_in(action, "Target reduction", found[1], 0.0, 1.0)?;
        }
        "block_route" => {
            require(action, params, &["sector", "reason"])?;
            if let Some(duration) = params.get("duration_minutes") {
                number_in(action, "Duration", duration, 5.0, 1440.0)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: Command,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Seconds spent executing.
    pub execution_time: f64,
    pub status: CommandStatus,
    /// The target service timed out, refused the connection or answered 5xx.
    #[serde(default)]
    pub unavailable: bool,
}

impl CommandResult {
    pub fn succeeded(command: Command, result: Value, execution_time: f64) -> Self {
        Self {
            command,
            success: true,
            result: Some(result),
            error: None,
            execution_time,
            status: CommandStatus::Success,
            unavailable: false,
        }
    }

    pub fn failed(
        command: Command,
        error: impl Into<String>,
        execution_time: f64,
        status: CommandStatus,
    ) -> Self {
        Self {
            command,
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time,
            status,
            unavailable: false,
        }
    }

    /// Mark a failure as caused by the service being down.
    pub fn with_unavailable(mut self, unavailable: bool) -> Self {
        self.unavailable = unavailable;
        self
    }

    pub fn is_successful(&self) -> bool {
        self.success && self.status == CommandStatus::Success
    }
}

/// An ordered list of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl CommandPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            commands: Vec::new(),
        }
    }

    pub fn add_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a plan and check every command's action.
    pub fn from_json(json: &str) -> Result<Self, CommandError> {
        let plan: Self = serde_json::from_str(json).map_err(|e| CommandError::Malformed(e.to_string()))?;
        for command in &plan.commands {
            if !command.service.allows(&command.action) {
                return Err(CommandError::InvalidAction {
                    service: command.service.to_string(),
                    action: command.action.clone(),
                });
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_action_must_belong_to_service() {
        assert!(Command::new(ServiceType::Grid, "adjust_zone", Map::new()).is_ok());
        let err = Command::new(ServiceType::Traffic, "assign_drone", Map::new()).unwrap_err();
        assert!(matches!(err, CommandError::InvalidAction { .. }));
        assert!("power".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_new_command_defaults() {
        let cmd = Command::new(ServiceType::Emergency, "report_status", Map::new()).unwrap();
        assert_eq!(cmd.priority, Some(1));
        assert!(cmd.command_id.is_some());
        assert!(cmd.timestamp.unwrap() > 0.0);
        assert!(cmd.is_report());
        assert_eq!(cmd.to_string(), "emergency.report_status");
    }

    #[test]
    fn test_parameter_rules() {
        assert!(validate_parameters("adjust_zone", &params(json!({"zone_id": "Z001", "capacity": 0.5}))).is_ok());
        assert!(validate_parameters("adjust_zone", &params(json!({"zone_id": "Z001", "capacity": "0.5"}))).is_ok());
        assert!(validate_parameters("adjust_zone", &params(json!({"zone_id": "Z001", "capacity": 1.5}))).is_err());
        assert!(validate_parameters("adjust_zone", &params(json!({"capacity": 0.5}))).is_err());

        assert!(validate_parameters("set_priority", &params(json!({"infrastructure_id": "hospital", "level": "urgent"}))).is_err());
        assert!(validate_parameters("update_incident", &params(json!({"incident_id": "E-1001", "status": "done"}))).is_err());
        assert!(validate_parameters("redirect", &params(json!({"sector_id": "S001"}))).is_err());

        let block = params(json!({"sector": "S001", "reason": "flood", "duration_minutes": 2}));
        let err = validate_parameters("block_route", &block).unwrap_err();
        assert!(err.to_string().contains("Duration"));
        assert!(validate_parameters("block_route", &params(json!({"sector": "S001", "reason": "flood"}))).is_ok());

        assert!(validate_parameters("report_status", &Map::new()).is_ok());
    }

    #[test]
    fn test_from_value() {
        let cmd = Command::from_value(&json!({
            "service": "traffic",
            "action": "redirect",
            "parameters": {"sector_id": "S002", "target_reduction": 0.3},
            "priority": 2
        }))
        .unwrap();
        assert_eq!(cmd.service, ServiceType::Traffic);
        assert_eq!(cmd.priority, Some(2));
        assert!(cmd.validate().is_ok());

        assert!(Command::from_value(&json!({"action": "redirect"})).is_err());
    }

    #[test]
    fn test_plan_json_round_trip_checks_actions() {
        let mut plan = CommandPlan::new("heat response");
        plan.add_command(
            Command::new(ServiceType::Grid, "set_priority", params(json!({"infrastructure_id": "hospital", "level": "critical"})))
                .unwrap(),
        );
        let json = plan.to_json().unwrap();
        let parsed = CommandPlan::from_json(&json).unwrap();
        assert_eq!(parsed.commands.len(), 1);

        let bad = r#"{"name": "x", "commands": [{"service": "grid", "action": "redirect"}]}"#;
        assert!(CommandPlan::from_json(bad).is_err());
    }
}
