//! The five workshop evaluation scenarios.
//!
//! Each definition is built against the ids the running simulators actually
//! use, so agents see zone, drone and incident ids they can act on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    DroneState, IncidentState, ScenarioDefinition, ServiceState, SuccessCriteria, TrafficState, ZoneState,
};

/// Record ids currently held by the simulators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualIds {
    pub grid_zones: Vec<String>,
    pub drones: Vec<String>,
    pub incidents: Vec<String>,
    pub traffic_sectors: Vec<String>,
}

fn numbered(prefix: &str, start: usize, count: usize, width: usize) -> Vec<String> {
    (start..start + count)
        .map(|i| format!("{}{:0width$}", prefix, i, width = width))
        .collect()
}

impl Default for ActualIds {
    /// The ids a freshly seeded city starts with.
    fn default() -> Self {
        Self {
            grid_zones: numbered("Z", 1, 3, 3),
            drones: numbered("D", 1, 4, 3),
            incidents: numbered("E-", 1001, 4, 4),
            traffic_sectors: numbered("S", 1, 3, 3),
        }
    }
}

impl ActualIds {
    /// `count` numbered ids of every kind, for when the simulators cannot
    /// be asked.
    pub fn numbered(count: usize) -> Self {
        Self {
            grid_zones: numbered("Z", 1, count, 3),
            drones: numbered("D", 1, count, 3),
            incidents: numbered("E-", 1001, count, 4),
            traffic_sectors: numbered("S", 1, count, 3),
        }
    }

    /// Fill empty lists from the defaults.
    pub fn or_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.grid_zones.is_empty() {
            self.grid_zones = defaults.grid_zones;
        }
        if self.drones.is_empty() {
            self.drones = defaults.drones;
        }
        if self.incidents.is_empty() {
            self.incidents = defaults.incidents;
        }
        if self.traffic_sectors.is_empty() {
            self.traffic_sectors = defaults.traffic_sectors;
        }
        self
    }

    fn zone(&self, i: usize) -> String {
        pick(&self.grid_zones, i, &format!("Z{:03}", i + 1))
    }

    fn drone(&self, i: usize) -> String {
        pick(&self.drones, i, &format!("D{:03}", i + 1))
    }

    fn incident(&self, i: usize) -> String {
        pick(&self.incidents, i, &format!("E-{}", 1001 + i))
    }

    fn sector(&self, i: usize) -> String {
        pick(&self.traffic_sectors, i, &format!("S{:03}", i + 1))
    }
}

fn pick(ids: &[String], i: usize, fallback: &str) -> String {
    ids.get(i).cloned().unwrap_or_else(|| fallback.to_string())
}

fn map<V>(entries: Vec<(String, V)>) -> BTreeMap<String, V> {
    entries.into_iter().collect()
}

fn numbers(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn criteria(name: &str, description: &str, metrics: &[(&str, f64)], thresholds: &[(&str, f64)]) -> SuccessCriteria {
    SuccessCriteria {
        name: name.to_string(),
        description: description.to_string(),
        metrics: numbers(metrics),
        thresholds: numbers(thresholds),
        time_limit: None,
    }
}

fn state(
    zones: Vec<ZoneState>,
    incidents: Vec<IncidentState>,
    drones: Vec<DroneState>,
    traffic: Vec<TrafficState>,
    scenario: &str,
) -> ServiceState {
    ServiceState {
        zones: map(zones.into_iter().map(|z| (z.id.clone(), z)).collect()),
        incidents,
        drones,
        traffic: map(traffic.into_iter().map(|t| (t.zone_id.clone(), t)).collect()),
        scenario_name: Some(scenario.to_string()),
        ..ServiceState::default()
    }
}

fn heat_wave(ids: &ActualIds) -> ScenarioDefinition {
    let zone = ids.zone(0);
    ScenarioDefinition {
        name: "Heat Wave Crisis".to_string(),
        description: "An extreme heat wave causing severe grid stress".to_string(),
        initial_state: state(
            vec![ZoneState::new(&zone, "Downtown", 1.0, 0.98, 0.4).critical()],
            vec![IncidentState::new(
                ids.incident(0),
                "Major power outage affecting hospital",
                &zone,
                0.99,
            )],
            vec![DroneState::new(ids.drone(0), "Alpha", &["medical", "surveillance"], 1.5)],
            vec![TrafficState::new(
                ids.sector(0),
                0.9,
                false,
                "Severe traffic congestion in downtown",
            )],
            "heat_wave",
        ),
        success_criteria: criteria(
            "Heat Wave Resolution",
            "Resolve heat wave crisis",
            &[("grid_stability", 0.8), ("incident_response", 0.9)],
            &[("max_temperature", 46.0), ("min_power", 0.7)],
        ),
        optimal_commands: Vec::new(),
        command_weights: numbers(&[("grid", 0.5), ("emergency", 0.4), ("traffic", 0.1)]),
    }
}

fn cyber_attack(ids: &ActualIds) -> ScenarioDefinition {
    let (zone_a, zone_b) = (ids.zone(0), ids.zone(1));
    ScenarioDefinition {
        name: "Cyber Attack on Infrastructure".to_string(),
        description: "Coordinated cyber attack targeting power grid systems".to_string(),
        initial_state: state(
            vec![
                ZoneState::new(&zone_a, "Financial District", 1.0, 0.85, 0.2).critical(),
                ZoneState::new(&zone_b, "Tech Hub", 1.0, 0.90, 0.3),
            ],
            vec![
                IncidentState::new(
                    ids.incident(0),
                    "Critical infrastructure systems compromised",
                    &zone_a,
                    0.95,
                ),
                IncidentState::new(ids.incident(1), "Data center power grid under attack", &zone_b, 0.9),
            ],
            vec![
                DroneState::new(ids.drone(0), "Security Alpha", &["surveillance", "cyber"], 1.8),
                DroneState::new(ids.drone(1), "Patrol Beta", &["surveillance", "power"], 1.4),
            ],
            vec![TrafficState::new(
                ids.sector(0),
                0.6,
                false,
                "Increased security checkpoints causing delays",
            )],
            "cyber_attack",
        ),
        success_criteria: criteria(
            "Cyber Attack Mitigation",
            "Secure grid and restore stability",
            &[("grid_stability", 0.85), ("incident_response", 0.95), ("security", 0.9)],
            &[("min_power", 0.8), ("max_response_time", 180.0)],
        ),
        optimal_commands: Vec::new(),
        command_weights: numbers(&[("grid", 0.6), ("emergency", 0.35), ("traffic", 0.05)]),
    }
}

fn earthquake(ids: &ActualIds) -> ScenarioDefinition {
    let zone = ids.zone(0);
    ScenarioDefinition {
        name: "Major Earthquake Response".to_string(),
        description: "7.2 magnitude earthquake causing infrastructure damage".to_string(),
        initial_state: state(
            vec![ZoneState::new(&zone, "Central District", 0.6, 0.95, 0.1).critical()],
            vec![IncidentState::new(
                ids.incident(0),
                "Building collapse with trapped victims",
                &zone,
                1.0,
            )],
            vec![DroneState::new(ids.drone(0), "Rescue Alpha", &["search_rescue", "medical"], 1.2)],
            vec![TrafficState::new(
                ids.sector(0),
                0.95,
                true,
                "Road closures due to earthquake damage",
            )],
            "earthquake",
        ),
        success_criteria: criteria(
            "Earthquake Recovery",
            "Save lives and restore basic services",
            &[("incident_response", 0.95), ("grid_stability", 0.6)],
            &[("max_response_time", 120.0), ("min_power", 0.5)],
        ),
        optimal_commands: Vec::new(),
        command_weights: numbers(&[("emergency", 0.6), ("grid", 0.25), ("traffic", 0.15)]),
    }
}

fn festival(ids: &ActualIds) -> ScenarioDefinition {
    let zone = ids.zone(0);
    ScenarioDefinition {
        name: "Large Festival Emergency".to_string(),
        description: "Major music festival with multiple emergencies".to_string(),
        initial_state: state(
            vec![ZoneState::new(&zone, "Festival Grounds", 1.0, 0.95, 0.7)],
            vec![IncidentState::new(
                ids.incident(0),
                "Stage collapse with multiple injuries",
                &zone,
                0.98,
            )],
            vec![DroneState::new(ids.drone(0), "MedEvac Alpha", &["medical", "transport"], 2.0)],
            vec![TrafficState::new(
                ids.sector(0),
                0.95,
                false,
                "Festival evacuees causing congestion",
            )],
            "festival",
        ),
        success_criteria: criteria(
            "Festival Emergency Response",
            "Manage crowd safety and medical emergencies",
            &[("incident_response", 0.9), ("crowd_safety", 0.95)],
            &[("max_response_time", 60.0), ("max_casualties", 0.0)],
        ),
        optimal_commands: Vec::new(),
        command_weights: numbers(&[("emergency", 0.7), ("traffic", 0.25), ("grid", 0.05)]),
    }
}

fn complex_crisis(ids: &ActualIds) -> ScenarioDefinition {
    let zone = ids.zone(0);
    ScenarioDefinition {
        name: "Multi-Service Complex Crisis".to_string(),
        description: "Simultaneous grid failure, chemical spill, traffic system malfunction".to_string(),
        initial_state: state(
            vec![ZoneState::new(&zone, "Industrial Complex", 0.8, 0.95, 0.2).critical()],
            vec![IncidentState::new(
                ids.incident(0),
                "Chemical plant explosion and toxic gas leak",
                &zone,
                1.0,
            )],
            vec![DroneState::new(ids.drone(0), "HazMat Alpha", &["hazmat", "surveillance"], 1.4)],
            vec![TrafficState::new(
                ids.sector(0),
                0.99,
                true,
                "Traffic system malfunction causing gridlock",
            )],
            "complex_crisis",
        ),
        success_criteria: criteria(
            "Complex Crisis Management",
            "Coordinate response across multiple crises",
            &[("incident_response", 0.85), ("grid_stability", 0.7)],
            &[("max_response_time", 90.0), ("min_power", 0.6)],
        ),
        optimal_commands: Vec::new(),
        command_weights: numbers(&[("emergency", 0.4), ("grid", 0.35), ("traffic", 0.25)]),
    }
}

/// All workshop scenarios keyed by short name.
pub fn workshop_scenarios(ids: &ActualIds) -> BTreeMap<String, ScenarioDefinition> {
    let scenarios: BTreeMap<String, ScenarioDefinition> = [
        ("heat_wave", heat_wave(ids)),
        ("cyber_attack", cyber_attack(ids)),
        ("earthquake", earthquake(ids)),
        ("festival", festival(ids)),
        ("complex_crisis", complex_crisis(ids)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    tracing::debug!("Created {} workshop scenarios", scenarios.len());
    scenarios
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ids() {
        let ids = ActualIds::default();
        assert_eq!(ids.grid_zones, vec!["Z001", "Z002", "Z003"]);
        assert_eq!(ids.incidents[0], "E-1001");
        assert_eq!(ids.drones.len(), 4);
    }

    #[test]
    fn test_numbered_ids() {
        let ids = ActualIds::numbered(5);
        assert_eq!(ids.grid_zones.last().unwrap(), "Z005");
        assert_eq!(ids.drones[4], "D005");
        assert_eq!(ids.incidents, vec!["E-1001", "E-1002", "E-1003", "E-1004", "E-1005"]);
        assert_eq!(ids.traffic_sectors[0], "S001");
    }

    #[test]
    fn test_scenarios_use_actual_ids() {
        let ids = ActualIds {
            grid_zones: vec!["Z007".into()],
            drones: vec!["D009".into()],
            incidents: vec!["E-1042".into()],
            traffic_sectors: vec!["S005".into()],
        };
        let scenarios = workshop_scenarios(&ids);
        assert_eq!(scenarios.len(), 5);

        let heat = &scenarios["heat_wave"];
        assert!(heat.initial_state.zones["Z007"].is_critical);
        assert_eq!(heat.initial_state.incidents[0].location, "Z007");
        assert_eq!(heat.initial_state.drones[0].id, "D009");

        // The second cyber attack zone falls back to a generated id.
        let cyber = &scenarios["cyber_attack"];
        assert!(cyber.initial_state.zones.contains_key("Z002"));
        assert_eq!(cyber.initial_state.incidents[1].id, "E-1002");
    }

    #[test]
    fn test_weights_and_criteria() {
        let scenarios = workshop_scenarios(&ActualIds::default());
        let festival = &scenarios["festival"];
        assert_eq!(festival.command_weights["emergency"], 0.7);
        assert_eq!(festival.success_criteria.metrics["crowd_safety"], 0.95);
        for def in scenarios.values() {
            let total: f64 = def.command_weights.values().sum();
            assert!((total - 1.0).abs() < 1e-9, "{}", def.name);
        }
    }

    #[test]
    fn test_or_defaults_fills_gaps() {
        let ids = ActualIds {
            grid_zones: vec!["Z010".into()],
            drones: vec![],
            incidents: vec![],
            traffic_sectors: vec![],
        }
        .or_defaults();
        assert_eq!(ids.grid_zones, vec!["Z010"]);
        assert_eq!(ids.traffic_sectors[0], "S001");
    }
}
