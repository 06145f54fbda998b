//! Shared state records exchanged between the simulators, the scenario
//! manager and the evaluator.
//!
//! Ranged fields are clamped by the constructors; deserialized records are
//! trusted as-is, matching the last-write-wins semantics of the services.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScenarioError;

pub mod records;

pub use records::{
    Drone, DroneStatus, GridZone, Incident, IncidentStatus, Infrastructure, PriorityLevel,
    TrafficSector, TrafficStatus, WeatherReport,
};

fn default_online() -> String {
    "online".to_string()
}

fn default_active() -> String {
    "active".to_string()
}

fn default_available() -> String {
    "available".to_string()
}

fn default_speed() -> f64 {
    1.0
}

/// A power grid zone. Capacity, load and stability are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub id: String,
    pub name: String,
    pub capacity: f64,
    pub current_load: f64,
    pub stability: f64,
    #[serde(default = "default_online")]
    pub status: String,
    #[serde(default)]
    pub is_critical: bool,
}

impl ZoneState {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capacity: f64,
        current_load: f64,
        stability: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capacity: capacity.clamp(0.0, 1.0),
            current_load: current_load.clamp(0.0, 1.0),
            stability: stability.clamp(0.0, 1.0),
            status: default_online(),
            is_critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

/// Weather conditions over the city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherState {
    pub condition: String,
    pub temperature: f64,
    pub wind_speed: f64,
    pub precipitation: f64,
    pub severity: f64,
    #[serde(default)]
    pub alerts: Vec<String>,
}

/// An emergency incident awaiting response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentState {
    pub id: String,
    pub description: String,
    pub location: String,
    pub urgency: f64,
    #[serde(default = "default_active")]
    pub status: String,
    #[serde(default)]
    pub assigned_drone: Option<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl IncidentState {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<String>,
        urgency: f64,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            location: location.into(),
            urgency: urgency.clamp(0.0, 1.0),
            status: default_active(),
            assigned_drone: None,
            required_capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.required_capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// A response drone. `speed` is a relative factor in `[0.1, 2.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    pub id: String,
    pub name: String,
    #[serde(default = "default_available")]
    pub status: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub weather_resistant: bool,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

impl DroneState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: &[&str], speed: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: default_available(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            location: None,
            weather_resistant: false,
            speed: speed.clamp(0.1, 2.0),
        }
    }
}

/// Congestion on a traffic sector. `congestion` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficState {
    pub zone_id: String,
    pub congestion: f64,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub description: String,
}

impl TrafficState {
    pub fn new(zone_id: impl Into<String>, congestion: f64, blocked: bool, description: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            congestion: congestion.clamp(0.0, 1.0),
            blocked,
            description: description.into(),
        }
    }
}

/// A snapshot of the whole city used to seed the simulators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneState>,
    #[serde(default)]
    pub weather: Option<WeatherState>,
    #[serde(default)]
    pub incidents: Vec<IncidentState>,
    #[serde(default)]
    pub drones: Vec<DroneState>,
    #[serde(default)]
    pub traffic: BTreeMap<String, TrafficState>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub scenario_name: Option<String>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            zones: BTreeMap::new(),
            weather: None,
            incidents: Vec::new(),
            drones: Vec::new(),
            traffic: BTreeMap::new(),
            timestamp: Utc::now(),
            scenario_name: None,
        }
    }
}

/// What counts as success for a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub time_limit: Option<u64>,
}

/// A full scenario: initial state, success criteria and reference commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub description: String,
    pub initial_state: ServiceState,
    pub success_criteria: SuccessCriteria,
    #[serde(default)]
    pub optimal_commands: Vec<Value>,
    #[serde(default)]
    pub command_weights: BTreeMap<String, f64>,
}

impl ScenarioDefinition {
    /// Load a definition from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ScenarioError::Load(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ScenarioError::Load(e.to_string()))
            }
            _ => serde_json::from_str(&content).map_err(|e| ScenarioError::Load(e.to_string())),
        }
    }

    /// Grid `/state/set` payload for this scenario.
    pub fn grid_payload(&self) -> Value {
        serde_json::json!({ "zones": self.initial_state.zones })
    }

    /// Emergency `/state/set` payload for this scenario.
    pub fn emergency_payload(&self) -> Value {
        serde_json::json!({
            "incidents": self.initial_state.incidents,
            "drones": self.initial_state.drones,
        })
    }

    /// Traffic `/state/set` payload for this scenario.
    pub fn traffic_payload(&self) -> Value {
        serde_json::json!({ "sectors": self.initial_state.traffic })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_clamp_ranges() {
        let zone = ZoneState::new("Z001", "Downtown", 1.4, -0.2, 0.5);
        assert_eq!(zone.capacity, 1.0);
        assert_eq!(zone.current_load, 0.0);
        assert_eq!(zone.status, "online");

        let drone = DroneState::new("D001", "Alpha", &["medical_kit"], 3.0);
        assert_eq!(drone.speed, 2.0);
        assert_eq!(drone.status, "available");
    }

    #[test]
    fn test_incident_defaults_on_deserialize() {
        let incident: IncidentState = serde_json::from_value(serde_json::json!({
            "id": "E-1001",
            "description": "Fire",
            "location": "Z001",
            "urgency": 0.8
        }))
        .unwrap();
        assert_eq!(incident.status, "active");
        assert!(incident.assigned_drone.is_none());
    }

    #[test]
    fn test_definition_loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat.yaml");
        std::fs::write(
            &path,
            r#"
name: Heat Wave
description: Grid under stress
initial_state:
  zones:
    Z001: {id: Z001, name: Downtown, capacity: 1.0, current_load: 0.98, stability: 0.4, is_critical: true}
success_criteria:
  name: Resolve
  description: Keep the grid up
  metrics: {grid_stability: 0.8}
command_weights: {grid: 0.5}
"#,
        )
        .unwrap();

        let def = ScenarioDefinition::from_path(&path).unwrap();
        assert_eq!(def.name, "Heat Wave");
        assert!(def.initial_state.zones["Z001"].is_critical);
        assert_eq!(def.grid_payload()["zones"]["Z001"]["current_load"], 0.98);
    }
}
