//! Scenario manager (port 8005).
//!
//! Stores scenario definitions and activates them by pushing each part of
//! the initial state to the grid, emergency and traffic simulators.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{api_error, finish_router, not_found, ApiResult};
use crate::config::WorkshopConfig;
use crate::error::{ConfigError, ExecutorError};
use crate::models::ScenarioDefinition;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const STATE_SET_TIMEOUT: Duration = Duration::from_secs(10);

/// Base URLs of the simulators a scenario is pushed to.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub grid: String,
    pub emergency: String,
    pub traffic: String,
}

impl ServiceEndpoints {
    pub fn from_config(config: &WorkshopConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            grid: config.service_url("grid")?,
            emergency: config.service_url("emergency")?,
            traffic: config.service_url("traffic")?,
        })
    }

    pub(crate) fn iter(&self) -> [(&'static str, &str); 3] {
        [
            ("grid", self.grid.as_str()),
            ("emergency", self.emergency.as_str()),
            ("traffic", self.traffic.as_str()),
        ]
    }
}

/// Shared state of the scenario manager.
#[derive(Clone)]
pub struct ScenarioState {
    scenarios: Arc<DashMap<String, ScenarioDefinition>>,
    endpoints: ServiceEndpoints,
    client: reqwest::Client,
}

impl ScenarioState {
    pub fn new(endpoints: ServiceEndpoints) -> Self {
        Self {
            scenarios: Arc::new(DashMap::new()),
            endpoints,
            client: reqwest::Client::new(),
        }
    }
}

/// Build the scenario manager router.
pub fn scenario_router(state: ScenarioState) -> Router {
    let router = Router::new()
        .route("/", get(root))
        .route("/scenarios", get(list_scenarios).post(create_scenario))
        .route("/scenarios/:scenario_id", get(get_scenario))
        .route("/scenarios/:scenario_id/activate", post(activate_scenario))
        .route("/service/health", get(health_check))
        .route("/service/info", get(service_info))
        .route("/state/reset", post(reset_state))
        .route("/state/get", get(get_state))
        .with_state(state);
    finish_router(router)
}

fn scenario_json(id: &str, scenario: &ScenarioDefinition) -> Value {
    let mut data = json!(scenario);
    if let Value::Object(map) = &mut data {
        map.insert("id".to_string(), json!(id));
    }
    data
}

async fn root() -> Json<Value> {
    Json(json!({"status": "ok", "service": "scenario"}))
}

/// GET /scenarios
async fn list_scenarios(State(state): State<ScenarioState>) -> Json<Value> {
    let scenarios: Vec<Value> = state
        .scenarios
        .iter()
        .map(|entry| {
            json!({
                "id": entry.key(),
                "name": entry.value().name,
                "description": entry.value().description,
            })
        })
        .collect();
    Json(json!({ "scenarios": scenarios }))
}

/// GET /scenarios/:scenario_id
async fn get_scenario(
    State(state): State<ScenarioState>,
    Path(scenario_id): Path<String>,
) -> ApiResult {
    let scenario = state.scenarios.get(&scenario_id).ok_or_else(|| {
        tracing::warn!("Scenario not found: {}", scenario_id);
        not_found(format!("Scenario {} not found", scenario_id))
    })?;
    Ok(Json(scenario_json(&scenario_id, scenario.value())))
}

/// POST /scenarios
async fn create_scenario(
    State(state): State<ScenarioState>,
    Json(scenario): Json<ScenarioDefinition>,
) -> Json<Value> {
    let scenario_id = Uuid::new_v4().to_string();
    tracing::info!("Created scenario: {} (ID: {})", scenario.name, scenario_id);
    let body = scenario_json(&scenario_id, &scenario);
    state.scenarios.insert(scenario_id, scenario);
    Json(body)
}

async fn is_service_available(client: &reqwest::Client, url: &str) -> bool {
    match client
        .get(format!("{}/service/health", url))
        .timeout(HEALTH_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// POST /scenarios/:scenario_id/activate
async fn activate_scenario(
    State(state): State<ScenarioState>,
    Path(scenario_id): Path<String>,
) -> ApiResult {
    tracing::info!("Activating scenario: {}", scenario_id);
    let scenario = state
        .scenarios
        .get(&scenario_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| not_found(format!("Scenario {} not found", scenario_id)))?;

    for (service, url) in state.endpoints.iter() {
        if !is_service_available(&state.client, url).await {
            let message = format!("Service {} is not available at {}", service, url);
            tracing::error!("{}", message);
            return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, message));
        }
    }

    let payloads = [
        ("grid", state.endpoints.grid.as_str(), scenario.grid_payload(), "Grid"),
        (
            "emergency",
            state.endpoints.emergency.as_str(),
            scenario.emergency_payload(),
            "Emergency",
        ),
        (
            "traffic",
            state.endpoints.traffic.as_str(),
            scenario.traffic_payload(),
            "Traffic",
        ),
    ];

    let mut results = Map::new();
    for (service, url, payload, label) in payloads {
        tracing::debug!("Initializing {} service", service);
        let target = format!("{}/state/set", url);
        let response = state
            .client
            .post(&target)
            .json(&payload)
            .timeout(STATE_SET_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                results.insert(
                    service.to_string(),
                    json!({"status": "success", "message": format!("{} state initialized", label)}),
                );
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                tracing::error!("{} service initialization failed: {}", label, status);
                results.insert(
                    service.to_string(),
                    json!({"error": format!("HTTP {}: {}", status, text)}),
                );
            }
            Err(err) => {
                let (status, what) = match ExecutorError::from_reqwest(&target, err) {
                    ExecutorError::Timeout { .. } => ("timeout", "Timeout"),
                    ExecutorError::Connection { .. } => ("connection_error", "Connection error"),
                    _ => ("error", "Unexpected error"),
                };
                let message = format!("{} during scenario activation: {}", what, target);
                tracing::error!("{}", message);
                return Ok(Json(json!({
                    "status": status,
                    "message": message,
                    "results": results,
                })));
            }
        }
    }

    let errors: Vec<&String> = results
        .iter()
        .filter(|(_, r)| r.get("error").is_some())
        .map(|(s, _)| s)
        .collect();
    if !errors.is_empty() {
        let successful: Vec<&String> = results
            .iter()
            .filter(|(_, r)| r.get("error").is_none())
            .map(|(s, _)| s)
            .collect();
        tracing::error!(
            "Failed to initialize services: {}",
            errors.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
        return Ok(Json(json!({
            "status": "partial_success",
            "message": format!("Scenario {} partially activated. Some services failed.", scenario_id),
            "results": results,
            "errors": errors,
            "successful_services": successful,
        })));
    }

    tracing::info!("Scenario {} activated successfully", scenario_id);
    Ok(Json(json!({
        "status": "success",
        "message": format!("Scenario {} activated successfully", scenario_id),
        "services_initialized": results.keys().collect::<Vec<_>>(),
        "results": results,
    })))
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// POST /state/reset
async fn reset_state(State(state): State<ScenarioState>) -> Json<Value> {
    state.scenarios.clear();
    tracing::info!("Scenario service state reset");
    Json(json!({"status": "success", "message": "Scenario service state reset"}))
}

/// GET /state/get
async fn get_state(State(state): State<ScenarioState>) -> Json<Value> {
    let scenarios: Map<String, Value> = state
        .scenarios
        .iter()
        .map(|entry| (entry.key().clone(), json!(entry.value())))
        .collect();
    let ids: Vec<String> = scenarios.keys().cloned().collect();
    Json(json!({
        "total_scenarios": scenarios.len(),
        "scenario_ids": ids,
        "scenarios": scenarios,
    }))
}

/// GET /service/info
async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "scenario",
        "version": crate::VERSION,
        "description": "Sentinel Grid Scenario Management Service",
        "available_actions": [
            "create_scenario",
            "list_scenarios",
            "get_scenario",
            "activate_scenario",
            "reset_state",
            "get_state"
        ],
        "endpoints": {
            "POST /scenarios": "Create a new scenario",
            "GET /scenarios": "List all scenarios",
            "GET /scenarios/{id}": "Get specific scenario",
            "POST /scenarios/{id}/activate": "Activate scenario across all services",
            "GET /state/get": "Get current service state",
            "POST /state/reset": "Reset service state",
            "GET /service/health": "Health check",
            "GET /service/info": "Service information"
        }
    }))
}
