//! Service actions exposed to the planner as tools.
//!
//! Every command action becomes a [`ServiceTool`] named
//! `{service}_{action}` with a JSON schema for its arguments. Running a
//! tool validates the arguments first; a validation error is handed back
//! to the agent as the tool output instead of being sent to a service.

use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::cache::ToolCache;
use crate::command::{Command, CommandExecutor, CommandResult, ServiceType};
use crate::error::CommandError;
use crate::models::{IncidentStatus, PriorityLevel};

/// A command action callable by the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTool {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub args_schema: Value,
    #[serde(skip)]
    service: ServiceType,
    #[serde(skip)]
    action: &'static str,
}

/// What running a tool produced.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Text or JSON handed back to the agent.
    pub output: Value,
    /// The executed command, when the arguments were valid.
    pub result: Option<CommandResult>,
    /// The output came from the cache because the service was down.
    pub from_cache: bool,
}

impl ToolOutcome {
    /// The service was unreachable, timed out or answered 5xx.
    pub fn is_service_failure(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.unavailable)
    }

    pub fn is_success(&self) -> bool {
        self.from_cache || self.result.as_ref().is_some_and(CommandResult::is_successful)
    }
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn action_schema(action: &str) -> Value {
    match action {
        "adjust_zone" => schema(
            json!({
                "zone_id": {"type": "string", "description": "Grid zone id, e.g. Z001"},
                "capacity": {"type": "number", "minimum": 0.0, "maximum": 1.0,
                             "description": "Fraction of nominal capacity to allow"},
            }),
            &["zone_id", "capacity"],
        ),
        "set_priority" => schema(
            json!({
                "infrastructure_id": {"type": "string", "description": "e.g. hospital, water_treatment"},
                "level": {"type": "string", "enum": PriorityLevel::names()},
            }),
            &["infrastructure_id", "level"],
        ),
        "assign_drone" => schema(
            json!({
                "drone_id": {"type": "string"},
                "incident_id": {"type": "string"},
            }),
            &["drone_id", "incident_id"],
        ),
        "update_incident" => schema(
            json!({
                "incident_id": {"type": "string"},
                "status": {"type": "string", "enum": IncidentStatus::names()},
            }),
            &["incident_id", "status"],
        ),
        "redirect" => schema(
            json!({
                "sector_id": {"type": "string"},
                "target_reduction": {"type": "number", "minimum": 0.0, "maximum": 1.0,
                                     "description": "Fraction of congestion to remove"},
            }),
            &["sector_id", "target_reduction"],
        ),
        "block_route" => schema(
            json!({
                "sector": {"type": "string"},
                "reason": {"type": "string"},
                "duration_minutes": {"type": "integer", "minimum": 5, "maximum": 1440},
            }),
            &["sector", "reason"],
        ),
        "report_status" => schema(
            json!({"zone_id": {"type": "string", "description": "Limit the grid report to one zone"}}),
            &[],
        ),
        _ => schema(json!({}), &[]),
    }
}

fn action_description(service: ServiceType, action: &str) -> String {
    match (service, action) {
        (ServiceType::Grid, "adjust_zone") => "Set the allowed capacity of a power grid zone".to_string(),
        (ServiceType::Grid, "set_priority") => {
            "Set the power priority of a critical infrastructure site".to_string()
        }
        (ServiceType::Grid, "report_status") => "Report load, stability and status of grid zones".to_string(),
        (ServiceType::Emergency, "assign_drone") => "Dispatch a drone to an incident".to_string(),
        (ServiceType::Emergency, "update_incident") => "Change the status of an incident".to_string(),
        (ServiceType::Emergency, "report_status") => {
            "Report incidents, drones and response rates".to_string()
        }
        (ServiceType::Traffic, "redirect") => "Redirect traffic to reduce congestion in a sector".to_string(),
        (ServiceType::Traffic, "block_route") => "Close a sector's routes, e.g. for an emergency corridor".to_string(),
        (ServiceType::Traffic, "report_conditions") => "Report congestion across traffic sectors".to_string(),
        (service, action) => format!("Run {} on the {} service", action, service),
    }
}

impl ServiceTool {
    pub fn new(service: ServiceType, action: &'static str) -> Result<Self, CommandError> {
        if !service.allows(action) {
            return Err(CommandError::InvalidAction {
                service: service.to_string(),
                action: action.to_string(),
            });
        }
        Ok(Self {
            name: format!("{}_{}", service, action),
            description: action_description(service, action),
            args_schema: action_schema(action),
            service,
            action,
        })
    }

    /// One tool per action of every service.
    pub fn catalogue() -> Vec<ServiceTool> {
        ServiceType::ALL
            .into_iter()
            .flat_map(|service| {
                service
                    .allowed_actions()
                    .iter()
                    .filter_map(move |action| Self::new(service, *action).ok())
            })
            .collect()
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn action(&self) -> &str {
        self.action
    }

    /// Report tools only read state.
    pub fn is_read_only(&self) -> bool {
        matches!(self.action, "report_status" | "report_conditions")
    }

    /// OpenAI function-calling definition.
    pub fn to_function(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.args_schema,
            }
        })
    }

    /// Accept an argument object or its JSON text.
    pub fn parse_args(&self, raw: &Value) -> Result<Map<String, Value>, CommandError> {
        match raw {
            Value::Object(map) => Ok(map.clone()),
            Value::Null => Ok(Map::new()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(CommandError::Malformed(format!(
                    "arguments for {} must be a JSON object",
                    self.name
                ))),
            },
            other => Err(CommandError::Malformed(format!(
                "arguments for {} must be a JSON object, got {}",
                self.name, other
            ))),
        }
    }

    /// Validate the arguments into a command for this tool.
    pub fn command(&self, raw: &Value) -> Result<Command, CommandError> {
        let command = Command::new(self.service, self.action, self.parse_args(raw)?)?;
        command.validate()?;
        Ok(command)
    }

    /// Run the tool.
    ///
    /// Read-only tools store good answers in `cache` and serve the cached
    /// answer when the service is unavailable.
    pub async fn run(&self, executor: &CommandExecutor, cache: &ToolCache, raw: &Value) -> ToolOutcome {
        let command = match self.command(raw) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Rejected {} arguments: {}", self.name, e);
                return ToolOutcome {
                    output: Value::String(format!("Error: {}", e)),
                    result: None,
                    from_cache: false,
                };
            }
        };
        let input = Value::Object(command.parameters.clone()).to_string();
        let result = executor.execute(&command).await;

        if result.is_successful() {
            let output = result.result.clone().unwrap_or(Value::Null);
            if self.is_read_only() {
                cache.add(&self.name, &input, output.clone());
            }
            return ToolOutcome {
                output,
                result: Some(result),
                from_cache: false,
            };
        }

        if result.unavailable {
            tracing::warn!("{} failed, service unavailable: {:?}", self.name, result.error);
            if let Some(cached) = self.is_read_only().then(|| cache.read(&self.name, &input)).flatten() {
                tracing::info!("Using cached {} output", self.name);
                return ToolOutcome {
                    output: cached,
                    result: Some(result),
                    from_cache: true,
                };
            }
        }
        ToolOutcome {
            output: Value::String(format!("Error: {}", result.error.as_deref().unwrap_or("unknown error"))),
            result: Some(result),
            from_cache: false,
        }
    }
}

impl fmt::Display for ServiceTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::spawn;
    use crate::services::{grid_router, GridState};

    fn tool(service: ServiceType, action: &'static str) -> ServiceTool {
        ServiceTool::new(service, action).unwrap()
    }

    #[test]
    fn test_catalogue_covers_every_action() {
        let tools = ServiceTool::catalogue();
        assert_eq!(tools.len(), 9);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"grid_adjust_zone"));
        assert!(names.contains(&"emergency_assign_drone"));
        assert!(names.contains(&"traffic_report_conditions"));
        assert!(ServiceTool::new(ServiceType::Traffic, "assign_drone").is_err());
    }

    #[test]
    fn test_function_definition() {
        let def = tool(ServiceType::Grid, "set_priority").to_function();
        assert_eq!(def["function"]["name"], "grid_set_priority");
        assert_eq!(def["function"]["parameters"]["required"], json!(["infrastructure_id", "level"]));
        assert_eq!(def["function"]["parameters"]["properties"]["level"]["enum"][0], "critical");
    }

    #[test]
    fn test_arguments_as_text_or_object() {
        let t = tool(ServiceType::Emergency, "assign_drone");
        let from_text = t.command(&json!("{\"drone_id\": \"D001\", \"incident_id\": \"E-1001\"}")).unwrap();
        assert_eq!(from_text.param_str("drone_id").as_deref(), Some("D001"));
        assert!(t.command(&json!([1, 2])).is_err());
        assert!(t.command(&json!({"drone_id": "D001"})).is_err());
    }

    #[tokio::test]
    async fn test_validation_error_becomes_tool_output() {
        let executor = CommandExecutor::with_urls("http://127.0.0.1:1", "http://127.0.0.1:1", "http://127.0.0.1:1");
        let outcome = tool(ServiceType::Grid, "adjust_zone")
            .run(&executor, &ToolCache::new(), &json!({"zone_id": "Z001", "capacity": 1.5}))
            .await;
        assert!(outcome.result.is_none());
        assert!(!outcome.is_service_failure());
        let text = outcome.output.as_str().unwrap();
        assert!(text.starts_with("Error: "));
        assert!(text.contains("Capacity"));
    }

    #[tokio::test]
    async fn test_report_served_from_cache_when_service_down() {
        let live = CommandExecutor::with_urls(
            spawn(grid_router(GridState::new(2))).await,
            "http://127.0.0.1:1",
            "http://127.0.0.1:1",
        );
        let cache = ToolCache::new();
        let report = tool(ServiceType::Grid, "report_status");

        let first = report.run(&live, &cache, &json!({})).await;
        assert!(first.is_success());
        assert!(!first.from_cache);
        assert_eq!(cache.len(), 1);

        let down = CommandExecutor::with_urls("http://127.0.0.1:1", "http://127.0.0.1:1", "http://127.0.0.1:1");
        let second = report.run(&down, &cache, &json!({})).await;
        assert!(second.is_service_failure());
        assert!(second.from_cache);
        assert_eq!(second.output, first.output);
    }

    #[tokio::test]
    async fn test_write_failures_are_not_cached() {
        let down = CommandExecutor::with_urls("http://127.0.0.1:1", "http://127.0.0.1:1", "http://127.0.0.1:1");
        let cache = ToolCache::new();
        let outcome = tool(ServiceType::Traffic, "redirect")
            .run(&down, &cache, &json!({"sector_id": "S001", "target_reduction": 0.3}))
            .await;
        assert!(outcome.is_service_failure());
        assert!(!outcome.is_success());
        assert!(cache.is_empty());
    }
}
