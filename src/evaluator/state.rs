//! A uniform view of city state for the metric calculators.
//!
//! Input may be a [`ServiceState`] snapshot, the combined `/state/get`
//! responses of the simulators, or records nested under `grid`,
//! `emergency` and `traffic_management`. Records may be keyed maps or
//! lists, and both the simulator field names (`capacity_kw`,
//! `congestion_level`, `is_blocked`) and the snapshot names (`capacity`,
//! `congestion`, `blocked`) are accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::as_number;
use crate::models::ServiceState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneView {
    pub zone_id: String,
    pub stability: f64,
    pub capacity_kw: f64,
    pub current_load_kw: f64,
    pub is_critical: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentView {
    pub id: String,
    pub status: String,
    pub assigned_drone: Option<String>,
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneView {
    pub id: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub assigned_incident: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorView {
    pub sector_id: String,
    pub congestion_level: f64,
    pub is_blocked: bool,
}

/// Normalized city state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationState {
    pub zones: BTreeMap<String, ZoneView>,
    pub incidents: Vec<IncidentView>,
    pub drones: Vec<DroneView>,
    pub traffic: BTreeMap<String, SectorView>,
    /// Infrastructure id to priority level.
    pub infrastructure: BTreeMap<String, String>,
}

fn num(record: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(as_number))
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

fn text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn flag(record: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| record.get(*k).and_then(Value::as_bool).unwrap_or(false))
}

/// `(id, record)` pairs from a keyed map or an id-carrying list.
fn entries<'a>(collection: Option<&'a Value>, id_keys: &[&str]) -> Vec<(String, &'a Value)> {
    match collection {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| v.is_object())
            .map(|(k, v)| (k.clone(), v))
            .collect(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|v| text(v, id_keys).map(|id| (id, v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn section<'a>(state: &'a Value, key: &str, parents: &[&str]) -> Option<&'a Value> {
    state
        .get(key)
        .or_else(|| parents.iter().find_map(|p| state.get(*p).and_then(|s| s.get(key))))
}

impl EvaluationState {
    /// Normalize a loosely shaped JSON state.
    pub fn from_value(state: &Value) -> Self {
        let zones = entries(section(state, "zones", &["grid"]), &["id", "zone_id"])
            .into_iter()
            .map(|(id, z)| {
                let view = ZoneView {
                    zone_id: id.clone(),
                    stability: z.get("stability").and_then(as_number).unwrap_or(0.0),
                    capacity_kw: num(z, &["capacity_kw", "capacity"]),
                    current_load_kw: num(z, &["current_load_kw", "current_load"]),
                    is_critical: flag(z, &["is_critical"]),
                    status: text(z, &["status"]).unwrap_or_else(|| "normal".to_string()),
                };
                (id, view)
            })
            .collect();

        let incidents = entries(section(state, "incidents", &["emergency"]), &["id", "incident_id"])
            .into_iter()
            .map(|(id, i)| IncidentView {
                id,
                status: text(i, &["status"]).unwrap_or_else(|| "active".to_string()),
                assigned_drone: text(i, &["assigned_drone"]),
                zone: text(i, &["zone", "location"]),
            })
            .collect();

        let drones = entries(section(state, "drones", &["emergency"]), &["id", "drone_id"])
            .into_iter()
            .map(|(id, d)| DroneView {
                id,
                status: text(d, &["status"]).unwrap_or_else(|| "available".to_string()),
                capabilities: d
                    .get("capabilities")
                    .and_then(Value::as_array)
                    .map(|caps| caps.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                assigned_incident: text(d, &["assigned_incident"]),
            })
            .collect();

        let traffic_section = state
            .get("traffic")
            .or_else(|| state.get("traffic_management"))
            .or_else(|| state.get("sectors"));
        let traffic = entries(traffic_section, &["id", "zone_id", "sector_id"])
            .into_iter()
            .map(|(id, s)| {
                let view = SectorView {
                    sector_id: id.clone(),
                    congestion_level: num(s, &["congestion_level", "congestion"]),
                    is_blocked: flag(s, &["is_blocked", "blocked"]),
                };
                (id, view)
            })
            .collect();

        let infrastructure = entries(
            section(state, "infrastructure", &["grid"]),
            &["infrastructure_id", "id"],
        )
        .into_iter()
        .filter_map(|(id, r)| text(r, &["level"]).map(|level| (id, level.to_lowercase())))
        .collect();

        Self {
            zones,
            incidents,
            drones,
            traffic,
            infrastructure,
        }
    }

    pub fn critical_zones(&self) -> impl Iterator<Item = &ZoneView> {
        self.zones.values().filter(|z| z.is_critical)
    }

    pub fn avg_congestion(&self) -> f64 {
        if self.traffic.is_empty() {
            return 0.0;
        }
        self.traffic.values().map(|s| s.congestion_level).sum::<f64>() / self.traffic.len() as f64
    }

    pub fn blocked_ratio(&self) -> f64 {
        if self.traffic.is_empty() {
            return 0.0;
        }
        self.traffic.values().filter(|s| s.is_blocked).count() as f64 / self.traffic.len() as f64
    }

    /// Incidents whose status is one of `statuses`.
    pub fn incidents_in(&self, statuses: &[&str]) -> usize {
        self.incidents
            .iter()
            .filter(|i| statuses.contains(&i.status.as_str()))
            .count()
    }
}

impl From<&ServiceState> for EvaluationState {
    fn from(state: &ServiceState) -> Self {
        match serde_json::to_value(state) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_responses_normalize() {
        let state = json!({
            "grid": {
                "zones": {"Z001": {"zone_id": "Z001", "capacity_kw": 100.0, "current_load_kw": 80.0, "stability": 0.7, "is_critical": true}},
                "infrastructure": {"hospital": {"infrastructure_id": "hospital", "level": "critical"}}
            },
            "emergency": {
                "incidents": [{"incident_id": "E-1001", "status": "assigned", "assigned_drone": "D001", "zone": "Z001"}],
                "drones": {"D001": {"drone_id": "D001", "status": "en_route"}}
            },
            "traffic": {"S001": {"sector_id": "S001", "congestion_level": 0.6, "is_blocked": true}}
        });
        let view = EvaluationState::from_value(&state);
        assert_eq!(view.zones["Z001"].capacity_kw, 100.0);
        assert_eq!(view.critical_zones().count(), 1);
        assert_eq!(view.infrastructure["hospital"], "critical");
        assert_eq!(view.incidents[0].assigned_drone.as_deref(), Some("D001"));
        assert_eq!(view.drones[0].status, "en_route");
        assert!(view.traffic["S001"].is_blocked);
        assert_eq!(view.blocked_ratio(), 1.0);
    }

    #[test]
    fn test_snapshot_field_names() {
        let state = json!({
            "zones": [{"id": "zone_a", "capacity": 1.0, "current_load": 0.9, "stability": 0.4}],
            "incidents": [{"id": "incident_1", "location": "zone_a"}],
            "traffic": {"S1": {"congestion": 0.8, "blocked": false}}
        });
        let view = EvaluationState::from_value(&state);
        assert_eq!(view.zones["zone_a"].current_load_kw, 0.9);
        assert_eq!(view.incidents[0].status, "active");
        assert_eq!(view.incidents[0].zone.as_deref(), Some("zone_a"));
        assert_eq!(view.avg_congestion(), 0.8);
    }

    #[test]
    fn test_from_service_state() {
        let def = crate::scenarios::workshop_scenarios(&Default::default());
        let view = EvaluationState::from(&def["earthquake"].initial_state);
        assert_eq!(view.zones["Z001"].capacity_kw, 0.6);
        assert!(view.traffic["S001"].is_blocked);
        assert_eq!(view.drones.len(), 1);
    }
}
