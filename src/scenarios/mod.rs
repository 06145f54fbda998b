//! Scenario catalogue: crisis types, run presets and evaluation definitions.
//!
//! A [`ScenarioEvaluation`] says which metrics count for a scenario, what
//! targets they must reach and which commands an expert would issue. The
//! evaluator scores agent commands against it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ScenarioError;

pub mod workshop;

pub use workshop::{workshop_scenarios, ActualIds};

/// The crisis types the agent system can be asked to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScenarioType {
    #[serde(rename = "grid_surge_heat_wave")]
    GridSurge,
    #[serde(rename = "medical_emergency_festival")]
    MedicalEmergency,
    #[serde(rename = "drone_capacity_crisis")]
    DroneCapacity,
    #[serde(rename = "flood_advisory_disruption")]
    FloodDisruption,
    #[serde(rename = "city_wide_drill")]
    CityWideDrill,
}

impl ScenarioType {
    pub const ALL: [ScenarioType; 5] = [
        ScenarioType::GridSurge,
        ScenarioType::MedicalEmergency,
        ScenarioType::DroneCapacity,
        ScenarioType::FloodDisruption,
        ScenarioType::CityWideDrill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GridSurge => "grid_surge_heat_wave",
            Self::MedicalEmergency => "medical_emergency_festival",
            Self::DroneCapacity => "drone_capacity_crisis",
            Self::FloodDisruption => "flood_advisory_disruption",
            Self::CityWideDrill => "city_wide_drill",
        }
    }

    /// The run preset for this type, if it has one.
    pub fn preset(&self) -> Option<ScenarioPreset> {
        match self {
            Self::GridSurge => Some(heat_wave_preset()),
            Self::FloodDisruption => Some(storm_preset()),
            Self::MedicalEmergency => Some(festival_preset()),
            Self::DroneCapacity => Some(drone_crisis_preset()),
            Self::CityWideDrill => None,
        }
    }

    /// Narrative shown to the planner for this type.
    pub fn description(&self) -> String {
        match self.preset() {
            Some(preset) => preset.description,
            None => "A city-wide drill exercising grid, emergency and traffic coordination \
                     across every district of NeoCatalis."
                .to_string(),
        }
    }

    /// Key of the workshop scenario used to stage and evaluate this type.
    pub fn workshop_scenario(&self) -> &'static str {
        match self {
            Self::GridSurge => "heat_wave",
            Self::MedicalEmergency => "festival",
            Self::DroneCapacity => "earthquake",
            Self::FloodDisruption | Self::CityWideDrill => "complex_crisis",
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioType {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| ScenarioError::UnknownType(s.to_string()))
    }
}

/// How a metric's target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Must reach a value.
    Threshold,
    /// Must stay within `[min, max]`.
    Range,
    Trend,
    Comparison,
}

/// A metric evaluated for a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// A number for thresholds, `[min, max]` for ranges.
    pub target: Value,
    pub weight: f64,
    pub service: String,
    /// Name of the calculator that produces the value.
    pub calculation: String,
}

impl MetricDefinition {
    /// A threshold metric whose calculator shares its name.
    pub fn threshold(name: &str, description: &str, target: f64, weight: f64, service: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            metric_type: MetricType::Threshold,
            target: json!(target),
            weight: weight.clamp(0.0, 1.0),
            service: service.to_string(),
            calculation: name.to_string(),
        }
    }

    pub fn target_value(&self) -> f64 {
        self.target.as_f64().unwrap_or(0.0)
    }

    /// `(min, max)` for range metrics.
    pub fn target_range(&self) -> Option<(f64, f64)> {
        let bounds = self.target.as_array()?;
        match bounds.as_slice() {
            [min, max] => Some((min.as_f64()?, max.as_f64()?)),
            _ => None,
        }
    }
}

/// The expected effect of an expert command on the metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandImpact {
    pub command: Value,
    pub affected_metrics: Vec<String>,
    pub expected_impact: BTreeMap<String, f64>,
}

impl CommandImpact {
    fn new(command: Value, impacts: &[(&str, f64)]) -> Self {
        Self {
            command,
            affected_metrics: impacts.iter().map(|(m, _)| m.to_string()).collect(),
            expected_impact: impacts.iter().map(|(m, v)| (m.to_string(), *v)).collect(),
        }
    }
}

/// Complete evaluation configuration for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEvaluation {
    pub name: String,
    pub description: String,
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub optimal_commands: Vec<CommandImpact>,
    #[serde(default)]
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
}

/// A runnable scenario: its type, narrative and operating constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPreset {
    pub name: String,
    #[serde(rename = "type")]
    pub scenario_type: Option<ScenarioType>,
    pub description: String,
    pub constraints: Map<String, Value>,
}

fn constraints(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn heat_wave_preset() -> ScenarioPreset {
    ScenarioPreset {
        name: "heat_wave".to_string(),
        scenario_type: Some(ScenarioType::GridSurge),
        description: "A severe heat wave is causing increased power demand across the city. \
                      Grid zones are approaching capacity and temperatures continue to rise."
            .to_string(),
        constraints: constraints(json!({
            "available_drones": 5,
            "grid_stability_threshold": 0.7,
            "weather_condition": "heat_wave",
            "max_temperature": 40.2,
            "traffic_congestion_level": 0.6,
        })),
    }
}

pub fn storm_preset() -> ScenarioPreset {
    ScenarioPreset {
        name: "storm".to_string(),
        scenario_type: Some(ScenarioType::FloodDisruption),
        description: "A severe storm is causing flooding and disruptions across the city. \
                      Multiple sectors are affected and emergency resources must be prioritized."
            .to_string(),
        constraints: constraints(json!({
            "available_drones": 4,
            "grid_stability_threshold": 0.6,
            "weather_condition": "severe_storm",
            "flooded_sectors": ["Downtown", "East Side", "River District"],
            "traffic_congestion_level": 0.8,
            "drone_speed_reduction": 0.7,
        })),
    }
}

pub fn festival_preset() -> ScenarioPreset {
    ScenarioPreset {
        name: "festival".to_string(),
        scenario_type: Some(ScenarioType::MedicalEmergency),
        description: "A festival has led to multiple medical emergencies across downtown. \
                      High traffic congestion is delaying response times and resources are stretched thin."
            .to_string(),
        constraints: constraints(json!({
            "available_drones": 5,
            "grid_stability_threshold": 0.8,
            "weather_condition": "clear",
            "traffic_congestion_level": 0.9,
            "incident_concentration": "Downtown",
            "incident_count": 12,
        })),
    }
}

pub fn drone_crisis_preset() -> ScenarioPreset {
    ScenarioPreset {
        name: "drone_crisis".to_string(),
        scenario_type: Some(ScenarioType::DroneCapacity),
        description: "Multiple emergencies have stretched drone resources to their limits. \
                      With only 2 operational drones, you must prioritize critical incidents."
            .to_string(),
        constraints: constraints(json!({
            "available_drones": 2,
            "grid_stability_threshold": 0.75,
            "weather_condition": "clear",
            "traffic_congestion_level": 0.5,
            "incident_count": 8,
            "priority_sectors": ["Hospital District", "Government Center"],
        })),
    }
}

/// Cascading failure preset. It has no agent scenario type of its own.
pub fn infrastructure_collapse_preset() -> ScenarioPreset {
    ScenarioPreset {
        name: "infrastructure_collapse".to_string(),
        scenario_type: None,
        description: "Critical infrastructure is failing, causing cascading effects across the city. \
                      Power outages, traffic gridlock, and communications issues require coordinated response."
            .to_string(),
        constraints: constraints(json!({
            "available_drones": 3,
            "grid_stability_threshold": 0.3,
            "weather_condition": "rain",
            "traffic_congestion_level": 0.95,
            "failed_infrastructure": ["Main Power Plant", "Central Bridge", "Water Treatment"],
            "affected_zones": ["Downtown", "Industrial Zone", "West Side", "North Side"],
            "communication_delay": 30,
        })),
    }
}

/// Every preset, in catalogue order.
pub fn presets() -> Vec<ScenarioPreset> {
    vec![
        heat_wave_preset(),
        storm_preset(),
        festival_preset(),
        drone_crisis_preset(),
        infrastructure_collapse_preset(),
    ]
}

/// Metrics used to evaluate the heat wave scenario.
pub fn heat_wave_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::threshold("grid_stability", "Overall stability of the power grid", 0.8, 0.4, "grid"),
        MetricDefinition::threshold("power_conservation", "Amount of power conserved", 0.2, 0.3, "grid"),
        MetricDefinition::threshold(
            "incident_response",
            "Percentage of incidents responded to",
            0.9,
            0.3,
            "emergency",
        ),
    ]
}

/// Expert commands for the heat wave scenario.
pub fn heat_wave_optimal_commands() -> Vec<CommandImpact> {
    vec![
        CommandImpact::new(
            json!({"service": "grid", "action": "adjust_zone", "parameters": {"zone_id": "zone_a", "capacity": 0.8}}),
            &[("grid_stability", 0.1), ("power_conservation", 0.05)],
        ),
        CommandImpact::new(
            json!({"service": "grid", "action": "adjust_zone", "parameters": {"zone_id": "zone_b", "capacity": 0.7}}),
            &[("grid_stability", 0.08), ("power_conservation", 0.07)],
        ),
        CommandImpact::new(
            json!({"service": "emergency", "action": "assign_drone", "parameters": {"drone_id": "drone_1", "incident_id": "incident_1"}}),
            &[("incident_response", 0.2)],
        ),
    ]
}

pub fn heat_wave_evaluation() -> ScenarioEvaluation {
    let preset = heat_wave_preset();
    ScenarioEvaluation {
        name: "Heat Wave Crisis".to_string(),
        description: "A severe heat wave is causing grid stress".to_string(),
        metrics: heat_wave_metrics(),
        optimal_commands: heat_wave_optimal_commands(),
        time_limit: Some(30),
        constraints: preset.constraints,
    }
}
