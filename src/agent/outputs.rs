//! Structured plan and report shapes the planner is asked to produce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scenarios::ScenarioType;

/// Grid part of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridManagementPlan {
    /// Items with `zone_id`, `capacity` and an optional `reason`.
    #[serde(default)]
    pub zone_adjustments: Vec<Value>,
    /// Items with `infrastructure_id` and `level`.
    #[serde(default)]
    pub priority_settings: Vec<Value>,
    #[serde(default)]
    pub stability_forecast: BTreeMap<String, f64>,
    #[serde(default)]
    pub coordination_notes: String,
}

/// Emergency part of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyResponsePlan {
    /// Items with `drone_id` and `incident_id`.
    #[serde(default)]
    pub drone_assignments: Vec<Value>,
    /// Items with `incident_id` and `status`.
    #[serde(default)]
    pub incident_updates: Vec<Value>,
    #[serde(default)]
    pub resource_allocation: BTreeMap<String, Value>,
    #[serde(default)]
    pub coordination_notes: String,
}

/// Traffic part of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficManagementPlan {
    /// Items with `sector_id` and `target_reduction`.
    #[serde(default)]
    pub traffic_redirections: Vec<Value>,
    /// Items with `sector_id`, `duration_minutes` and an optional `reason`.
    #[serde(default)]
    pub route_blocks: Vec<Value>,
    #[serde(default)]
    pub emergency_corridors: Vec<Value>,
    #[serde(default)]
    pub coordination_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSurgeOutput {
    /// Zone id to load percentage.
    pub critical_zones: BTreeMap<String, f64>,
    /// Zone id to percentage load reduction applied.
    pub load_reduction_actions: BTreeMap<String, f64>,
    /// Infrastructure to protection status.
    pub priority_infrastructure: BTreeMap<String, String>,
    pub weather_impact: String,
    pub emergency_readiness: String,
    pub action_plan: String,
    #[serde(default)]
    pub executed_commands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalEmergencyOutput {
    /// Count per priority level (critical, severe, moderate, minor).
    pub incidents_by_priority: BTreeMap<String, u32>,
    /// Drone id to incident id.
    pub drone_assignments: BTreeMap<String, String>,
    /// Incident id to minutes.
    pub estimated_response_times: BTreeMap<String, f64>,
    pub traffic_conditions: String,
    pub action_plan: String,
    #[serde(default)]
    pub executed_commands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneCapacityOutput {
    /// Drone id to capabilities.
    pub available_drones: BTreeMap<String, String>,
    /// Incident id to priority score.
    pub prioritized_incidents: BTreeMap<String, i64>,
    /// Drone id to new incident.
    pub reassignment_plan: BTreeMap<String, String>,
    /// Incident id to downgrade reason.
    pub downgraded_incidents: BTreeMap<String, String>,
    pub action_plan: String,
    #[serde(default)]
    pub executed_commands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodDisruptionOutput {
    pub flood_risk_areas: BTreeMap<String, String>,
    pub affected_grid_zones: BTreeMap<String, String>,
    pub blocked_routes: BTreeMap<String, String>,
    /// Affected route to detour.
    pub detour_routes: BTreeMap<String, String>,
    pub weather_forecast: String,
    pub action_plan: String,
    #[serde(default)]
    pub executed_commands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityWideDrillOutput {
    pub grid_status: BTreeMap<String, String>,
    pub emergency_incidents: BTreeMap<String, String>,
    pub traffic_disruptions: BTreeMap<String, String>,
    pub communication_status: BTreeMap<String, String>,
    /// Priority action to responsible team.
    pub priority_actions: BTreeMap<String, String>,
    pub action_plan: String,
    #[serde(default)]
    pub executed_commands: Vec<Value>,
}

/// The report shape expected for a scenario type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioOutput {
    GridSurge(GridSurgeOutput),
    MedicalEmergency(MedicalEmergencyOutput),
    DroneCapacity(DroneCapacityOutput),
    FloodDisruption(FloodDisruptionOutput),
    CityWideDrill(CityWideDrillOutput),
}

impl ScenarioOutput {
    /// Parse `output` as the report for `scenario_type`.
    pub fn parse(scenario_type: ScenarioType, output: &Value) -> Result<Self, serde_json::Error> {
        let value = output.clone();
        Ok(match scenario_type {
            ScenarioType::GridSurge => Self::GridSurge(serde_json::from_value(value)?),
            ScenarioType::MedicalEmergency => Self::MedicalEmergency(serde_json::from_value(value)?),
            ScenarioType::DroneCapacity => Self::DroneCapacity(serde_json::from_value(value)?),
            ScenarioType::FloodDisruption => Self::FloodDisruption(serde_json::from_value(value)?),
            ScenarioType::CityWideDrill => Self::CityWideDrill(serde_json::from_value(value)?),
        })
    }

    /// Field names the report for `scenario_type` must carry.
    pub fn required_fields(scenario_type: ScenarioType) -> &'static [&'static str] {
        match scenario_type {
            ScenarioType::GridSurge => &[
                "critical_zones",
                "load_reduction_actions",
                "priority_infrastructure",
                "weather_impact",
                "emergency_readiness",
                "action_plan",
            ],
            ScenarioType::MedicalEmergency => &[
                "incidents_by_priority",
                "drone_assignments",
                "estimated_response_times",
                "traffic_conditions",
                "action_plan",
            ],
            ScenarioType::DroneCapacity => &[
                "available_drones",
                "prioritized_incidents",
                "reassignment_plan",
                "downgraded_incidents",
                "action_plan",
            ],
            ScenarioType::FloodDisruption => &[
                "flood_risk_areas",
                "affected_grid_zones",
                "blocked_routes",
                "detour_routes",
                "weather_forecast",
                "action_plan",
            ],
            ScenarioType::CityWideDrill => &[
                "grid_status",
                "emergency_incidents",
                "traffic_disruptions",
                "communication_status",
                "priority_actions",
                "action_plan",
            ],
        }
    }
}

/// Check a structured report against its scenario's schema.
///
/// A missing report or a mismatch is logged, never fatal.
pub fn validate_scenario_output(scenario_type: ScenarioType, output: Option<&Value>) -> bool {
    let Some(output) = output else {
        tracing::warn!("No structured output provided for scenario {}", scenario_type);
        return false;
    };
    match ScenarioOutput::parse(scenario_type, output) {
        Ok(_) => {
            tracing::info!("Structured output for {} is valid", scenario_type);
            true
        }
        Err(e) => {
            tracing::error!("Invalid structured output for {}: {}", scenario_type, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grid_surge_output_validates() {
        let output = json!({
            "critical_zones": {"Z001": 0.96},
            "load_reduction_actions": {"Z001": 20.0},
            "priority_infrastructure": {"hospital": "protected"},
            "weather_impact": "40C peak",
            "emergency_readiness": "ready",
            "action_plan": "shed load in Z001"
        });
        assert!(validate_scenario_output(ScenarioType::GridSurge, Some(&output)));
        match ScenarioOutput::parse(ScenarioType::GridSurge, &output).unwrap() {
            ScenarioOutput::GridSurge(report) => assert!(report.executed_commands.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_wrong_output_is_invalid() {
        assert!(!validate_scenario_output(ScenarioType::FloodDisruption, None));
        let partial = json!({"flood_risk_areas": {}, "action_plan": "wait"});
        assert!(!validate_scenario_output(ScenarioType::FloodDisruption, Some(&partial)));
    }

    #[test]
    fn test_required_fields_match_schemas() {
        for scenario_type in ScenarioType::ALL {
            let mut output = serde_json::Map::new();
            for field in ScenarioOutput::required_fields(scenario_type) {
                let value = if [
                    "action_plan",
                    "weather_impact",
                    "emergency_readiness",
                    "traffic_conditions",
                    "weather_forecast",
                ]
                .contains(field)
                {
                    json!("text")
                } else {
                    json!({})
                };
                output.insert(field.to_string(), value);
            }
            assert!(
                validate_scenario_output(scenario_type, Some(&Value::Object(output))),
                "{}",
                scenario_type
            );
        }
    }

    #[test]
    fn test_plans_default_missing_sections() {
        let plan: EmergencyResponsePlan =
            serde_json::from_value(json!({"drone_assignments": [{"drone_id": "D001", "incident_id": "E-1001"}]}))
                .unwrap();
        assert_eq!(plan.drone_assignments.len(), 1);
        assert!(plan.incident_updates.is_empty());
        assert!(plan.coordination_notes.is_empty());
    }
}
