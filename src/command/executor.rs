//! HTTP execution of commands against the service simulators.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Method;
use serde_json::{Map, Value};

use super::{validate_parameters, Command, CommandPlan, CommandResult, CommandStatus, ServiceType};
use crate::config::WorkshopConfig;
use crate::error::{CommandError, ConfigError, ExecutorError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP request a command maps onto.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
    /// Parameters left after path substitution.
    pub data: Map<String, Value>,
}

/// Bytes escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Map a command onto its endpoint, moving path parameters out of the body.
/// Path parameters are percent-encoded.
pub fn map_to_endpoint(command: &Command) -> Result<Endpoint, CommandError> {
    let mut data = command.parameters.clone();
    let mut path_param = |key: &str| -> Result<String, CommandError> {
        let raw = match data.remove(key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => {
                return Err(CommandError::params(
                    &command.action,
                    format!("Missing required path parameter: '{}'", key),
                ))
            }
            Some(other) => other.to_string(),
        };
        Ok(utf8_percent_encode(&raw, PATH_SEGMENT).to_string())
    };

    let (method, path) = match (command.service, command.action.as_str()) {
        (ServiceType::Grid, "adjust_zone") => (
            Method::PUT,
            format!("/grid/zones/{}/capacity", path_param("zone_id")?),
        ),
        (ServiceType::Grid, "set_priority") => (
            Method::POST,
            format!(
                "/grid/infrastructure/{}/priority",
                path_param("infrastructure_id")?
            ),
        ),
        (ServiceType::Grid, "report_status") => (Method::GET, "/grid/report_status".to_string()),
        (ServiceType::Emergency, "assign_drone") => (
            Method::POST,
            format!("/emergency/drones/{}/assign", path_param("drone_id")?),
        ),
        (ServiceType::Emergency, "update_incident") => (
            Method::POST,
            format!("/emergency/incidents/{}", path_param("incident_id")?),
        ),
        (ServiceType::Emergency, "report_status") => {
            (Method::GET, "/emergency/report_status".to_string())
        }
        (ServiceType::Traffic, "redirect") => (Method::POST, "/traffic/redirect".to_string()),
        (ServiceType::Traffic, "report_conditions") => {
            (Method::POST, "/traffic/report_conditions".to_string())
        }
        (ServiceType::Traffic, "block_route") => (Method::POST, "/traffic/block_route".to_string()),
        (service, action) => {
            return Err(CommandError::InvalidAction {
                service: service.to_string(),
                action: action.to_string(),
            })
        }
    };
    Ok(Endpoint { method, path, data })
}

fn query_pairs(data: &Map<String, Value>) -> Vec<(String, String)> {
    data.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Sends commands to the grid, emergency and traffic services.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    client: reqwest::Client,
    urls: BTreeMap<ServiceType, String>,
    log_api_calls: bool,
}

impl CommandExecutor {
    /// Executor pointed at the configured service ports.
    pub fn from_config(config: &WorkshopConfig) -> Result<Self, ConfigError> {
        let mut urls = BTreeMap::new();
        for service in ServiceType::ALL {
            urls.insert(service, config.service_url(service.as_str())?);
        }
        Ok(Self {
            client: build_client(),
            urls,
            log_api_calls: config.should_show(crate::config::DisplayFeature::ApiCalls),
        })
    }

    /// Executor with explicit base URLs, e.g. for services on ephemeral ports.
    pub fn with_urls(grid: impl Into<String>, emergency: impl Into<String>, traffic: impl Into<String>) -> Self {
        let urls = BTreeMap::from([
            (ServiceType::Grid, grid.into()),
            (ServiceType::Emergency, emergency.into()),
            (ServiceType::Traffic, traffic.into()),
        ]);
        Self {
            client: build_client(),
            urls,
            log_api_calls: false,
        }
    }

    /// Base URL of a service.
    pub fn service_url(&self, service: ServiceType) -> Option<&str> {
        self.urls.get(&service).map(String::as_str)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Validate and execute a command. Never fails; errors are reported in
    /// the returned [`CommandResult`].
    pub async fn execute(&self, command: &Command) -> CommandResult {
        if let Err(e) = command.validate() {
            return CommandResult::failed(command.clone(), e.to_string(), 0.0, CommandStatus::Failure);
        }
        self.execute_unchecked(command).await
    }

    /// Execute without re-running parameter validation.
    pub(crate) async fn execute_unchecked(&self, command: &Command) -> CommandResult {
        let Some(base) = self.urls.get(&command.service) else {
            return CommandResult::failed(
                command.clone(),
                format!("Unknown service '{}'", command.service),
                0.0,
                CommandStatus::Failure,
            );
        };
        let endpoint = match map_to_endpoint(command) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                return CommandResult::failed(command.clone(), e.to_string(), 0.0, CommandStatus::Failure)
            }
        };
        let url = format!("{}{}", base, endpoint.path);

        if self.log_api_calls {
            let data = Value::Object(endpoint.data.clone());
            tracing::info!("Executing {} request to {} with data {}", endpoint.method, url, data);
        } else {
            tracing::info!("Executing {} on {} service", command.action, command.service);
        }

        let start = Instant::now();
        let outcome = self.send(&endpoint, &url).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                tracing::debug!("Command successful: {}", result);
                CommandResult::succeeded(command.clone(), result, elapsed)
            }
            Err(err) => {
                tracing::error!("Command failed: {}", err);
                tracing::error!("Request details: {} {}", endpoint.method, url);
                let unavailable = err.is_unavailable();
                let status = match err {
                    ExecutorError::Timeout { .. } => CommandStatus::Timeout,
                    _ => CommandStatus::Failure,
                };
                let message = match err {
                    ExecutorError::Timeout { .. } => "Request timed out".to_string(),
                    other => other.to_string(),
                };
                CommandResult::failed(command.clone(), message, elapsed, status).with_unavailable(unavailable)
            }
        }
    }

    async fn send(&self, endpoint: &Endpoint, url: &str) -> Result<Value, ExecutorError> {
        let request = self.client.request(endpoint.method.clone(), url);
        let request = if endpoint.method == Method::GET {
            request.query(&query_pairs(&endpoint.data))
        } else {
            request.json(&endpoint.data)
        };

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::from_reqwest(url, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::from_reqwest(url, e))?;

        if !status.is_success() {
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "response": text })))
    }

    /// Execute a plan's commands in order.
    pub async fn execute_plan(&self, plan: &CommandPlan) -> Vec<CommandResult> {
        tracing::info!("Executing plan '{}' ({} commands)", plan.name, plan.commands.len());
        let mut results = Vec::with_capacity(plan.commands.len());
        for command in &plan.commands {
            results.push(self.execute(command).await);
        }
        results
    }

    /// Check the parameters of a command without sending it.
    pub fn validate(&self, command: &Command) -> Result<(), CommandError> {
        validate_parameters(&command.action, &command.parameters)
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}
