//! Keeps the simulators in step with the scenario being run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::WorkshopConfig;
use crate::error::{ConfigError, ExecutorError};
use crate::models::ScenarioDefinition;
use crate::scenarios::ActualIds;
use crate::services::scenario::ServiceEndpoints;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const ACTIVATE_TIMEOUT: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_ID_COUNT: usize = 5;

/// Resets, seeds and inspects the grid, emergency, traffic and scenario
/// services.
#[derive(Debug, Clone)]
pub struct StateCoordinator {
    endpoints: ServiceEndpoints,
    scenario_url: String,
    client: reqwest::Client,
    /// Pause after a reset so the services settle.
    pub settle_delay: Duration,
}

fn count(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(list)) => list.len(),
        _ => 0,
    }
}

fn keys(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

impl StateCoordinator {
    pub fn new(endpoints: ServiceEndpoints, scenario_url: impl Into<String>) -> Self {
        Self {
            endpoints,
            scenario_url: scenario_url.into(),
            client: reqwest::Client::new(),
            settle_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &WorkshopConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ServiceEndpoints::from_config(config)?,
            config.service_url("scenario")?,
        ))
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    fn all_services(&self) -> [(&'static str, &str); 4] {
        let [grid, emergency, traffic] = self.endpoints.iter();
        [grid, emergency, traffic, ("scenario", self.scenario_url.as_str())]
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, ExecutorError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ExecutorError::from_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response.json().await.map_err(|e| ExecutorError::from_reqwest(url, e))
    }

    async fn post_json(&self, url: &str, body: Option<&Value>, timeout: Duration) -> Result<Value, ExecutorError> {
        let request = self.client.post(url).timeout(timeout);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        let response = request.send().await.map_err(|e| ExecutorError::from_reqwest(url, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ExecutorError::from_reqwest(url, e))?;
        if !status.is_success() {
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    /// Reset every service to its generated state.
    pub async fn reset_all(&self) -> BTreeMap<String, bool> {
        tracing::info!("Resetting all service states");
        let mut results = BTreeMap::new();
        for (service, url) in self.all_services() {
            let ok = match self.post_json(&format!("{}/state/reset", url), None, REQUEST_TIMEOUT).await {
                Ok(_) => {
                    tracing::info!("{} state reset", service.to_uppercase());
                    true
                }
                Err(e) => {
                    tracing::error!("{} reset failed: {}", service.to_uppercase(), e);
                    false
                }
            };
            results.insert(service.to_string(), ok);
        }
        tokio::time::sleep(self.settle_delay).await;
        results
    }

    /// Reset the services and load `scenario` through the scenario manager,
    /// pushing each part of the state directly if that fails.
    pub async fn activate_scenario(&self, scenario: &ScenarioDefinition) -> bool {
        tracing::info!("Activating scenario: {}", scenario.name);
        self.reset_all().await;

        let scenario_body = json!(scenario);
        let scenario_id = match self
            .post_json(&format!("{}/scenarios", self.scenario_url), Some(&scenario_body), REQUEST_TIMEOUT)
            .await
        {
            Ok(created) => {
                let id = created
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("manual_activation")
                    .to_string();
                tracing::info!("Scenario created with ID: {}", id);
                id
            }
            Err(e) => {
                tracing::warn!("Could not create scenario in scenario service: {}", e);
                "manual_activation".to_string()
            }
        };

        let url = format!("{}/scenarios/{}/activate", self.scenario_url, scenario_id);
        match self.post_json(&url, None, ACTIVATE_TIMEOUT).await {
            Ok(activation) => {
                tracing::info!("Scenario '{}' activated", scenario.name);
                if let Some(results) = activation.get("results").and_then(Value::as_object) {
                    for (service, result) in results {
                        match result.get("error") {
                            Some(error) => tracing::error!("{}: {}", service.to_uppercase(), error),
                            None => tracing::info!("{}: state initialized", service.to_uppercase()),
                        }
                    }
                }
                true
            }
            Err(e) => {
                tracing::warn!("Scenario activation failed ({}), setting state manually", e);
                self.manual_activation(scenario).await
            }
        }
    }

    /// Push the scenario's state to each service's `/state/set`.
    ///
    /// True when at least one service accepted its part.
    pub async fn manual_activation(&self, scenario: &ScenarioDefinition) -> bool {
        tracing::info!("Manually setting state for: {}", scenario.name);
        let payloads = [
            ("grid", self.endpoints.grid.as_str(), scenario.grid_payload()),
            ("emergency", self.endpoints.emergency.as_str(), scenario.emergency_payload()),
            ("traffic", self.endpoints.traffic.as_str(), scenario.traffic_payload()),
        ];
        let mut accepted = 0;
        for (service, url, payload) in &payloads {
            match self
                .post_json(&format!("{}/state/set", url), Some(payload), REQUEST_TIMEOUT)
                .await
            {
                Ok(_) => {
                    accepted += 1;
                    tracing::info!("{} state set", service.to_uppercase());
                }
                Err(e) => tracing::error!("{} state set failed: {}", service.to_uppercase(), e),
            }
        }
        if accepted == payloads.len() {
            tracing::info!("Manual state activation complete: {}/{} services", accepted, payloads.len());
        } else {
            tracing::warn!("Partial state activation: {}/{} services", accepted, payloads.len());
        }
        accepted > 0
    }

    /// Check that each service holds at least as many records as the
    /// scenario defines.
    pub async fn verify_scenario_state(&self, scenario: &ScenarioDefinition) -> bool {
        tracing::info!("Verifying scenario state: {}", scenario.name);
        let initial = &scenario.initial_state;
        let mut verified = BTreeMap::new();

        let grid = match self.get_json(&format!("{}/state/get", self.endpoints.grid), STATUS_TIMEOUT).await {
            Ok(data) => {
                let zones = count(data.get("zones"));
                tracing::info!("Grid: {} zones (expected >={})", zones, initial.zones.len());
                zones >= initial.zones.len()
            }
            Err(e) => {
                tracing::error!("Grid state check failed: {}", e);
                false
            }
        };
        verified.insert("grid", grid);

        let emergency = match self
            .get_json(&format!("{}/state/get", self.endpoints.emergency), STATUS_TIMEOUT)
            .await
        {
            Ok(data) => {
                let (incidents, drones) = (count(data.get("incidents")), count(data.get("drones")));
                tracing::info!("Emergency: {} incidents, {} drones", incidents, drones);
                incidents >= initial.incidents.len() && drones >= initial.drones.len()
            }
            Err(e) => {
                tracing::error!("Emergency state check failed: {}", e);
                false
            }
        };
        verified.insert("emergency", emergency);

        let traffic = match self
            .get_json(&format!("{}/state/get", self.endpoints.traffic), STATUS_TIMEOUT)
            .await
        {
            Ok(data) => {
                let sectors = count(data.get("sectors"));
                tracing::info!("Traffic: {} sectors (expected >={})", sectors, initial.traffic.len());
                sectors >= initial.traffic.len()
            }
            Err(e) => {
                tracing::error!("Traffic state check failed: {}", e);
                false
            }
        };
        verified.insert("traffic", traffic);

        let passed = verified.values().filter(|ok| **ok).count();
        if passed == verified.len() {
            tracing::info!("Scenario verification complete: all {} services ready", passed);
        } else {
            tracing::warn!("Partial verification: {}/{} services verified", passed, verified.len());
        }
        passed > 0
    }

    /// Ids of the records the simulators currently hold.
    ///
    /// Falls back to numbered ids when a service cannot be reached.
    pub async fn actual_service_ids(&self) -> ActualIds {
        let fallback = ActualIds::numbered(FALLBACK_ID_COUNT);
        let grid = self
            .get_json(&format!("{}/grid/report_status", self.endpoints.grid), STATUS_TIMEOUT)
            .await;
        let emergency = self
            .get_json(&format!("{}/emergency/report_status", self.endpoints.emergency), STATUS_TIMEOUT)
            .await;

        let (grid, emergency) = match (grid, emergency) {
            (Err(e), _) | (_, Err(e)) if e.is_unavailable() => {
                tracing::warn!("Could not get actual service IDs: {}", e);
                return fallback;
            }
            (grid, emergency) => (grid.unwrap_or(Value::Null), emergency.unwrap_or(Value::Null)),
        };

        let traffic_sectors = match self
            .get_json(&format!("{}/state/get", self.endpoints.traffic), STATUS_TIMEOUT)
            .await
        {
            Ok(data) if count(data.get("sectors")) > 0 => keys(data.get("sectors")),
            _ => fallback.traffic_sectors,
        };

        ActualIds {
            grid_zones: keys(grid.get("zones")),
            drones: keys(emergency.get("drones")),
            incidents: keys(emergency.get("incidents")),
            traffic_sectors,
        }
    }

    /// `/state/get` of every service, or an `{"error"}` entry.
    pub async fn system_status(&self) -> BTreeMap<String, Value> {
        let mut status = BTreeMap::new();
        for (service, url) in self.all_services() {
            let entry = match self.get_json(&format!("{}/state/get", url), STATUS_TIMEOUT).await {
                Ok(data) => data,
                Err(ExecutorError::Status { .. }) => json!({"error": "unavailable"}),
                Err(_) => json!({"error": "connection failed"}),
            };
            status.insert(service.to_string(), entry);
        }
        status
    }

    /// Current city state in the flat shape the evaluator reads.
    pub async fn snapshot(&self) -> Value {
        let status = self.system_status().await;
        let part = |service: &str, key: &str| {
            status
                .get(service)
                .and_then(|s| s.get(key))
                .cloned()
                .unwrap_or_else(|| json!({}))
        };
        json!({
            "zones": part("grid", "zones"),
            "infrastructure": part("grid", "infrastructure"),
            "incidents": part("emergency", "incidents"),
            "drones": part("emergency", "drones"),
            "traffic": part("traffic", "sectors"),
        })
    }
}
