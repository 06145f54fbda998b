//! Emergency response simulator (port 8003): drones and incidents.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{
    bad_request, body_object, field, finish_router, get_health, not_found, read_lock, set_health,
    simulate_degradation, write_lock, ApiResult, HealthState, Params, Simulated,
};
use crate::models::{Drone, DroneStatus, Incident, IncidentStatus};
use crate::seed::{DaySeedGenerator, DEFAULT_DRONES, DEFAULT_INCIDENTS};

#[derive(Debug, Default)]
struct EmergencyData {
    incidents: BTreeMap<String, Incident>,
    drones: BTreeMap<String, Drone>,
}

impl EmergencyData {
    fn generate(generator: &DaySeedGenerator) -> Self {
        Self {
            incidents: generator
                .generate_emergency_incidents(DEFAULT_INCIDENTS)
                .into_iter()
                .map(|i| (i.incident_id.clone(), i))
                .collect(),
            drones: generator.generate_drone_fleet(DEFAULT_DRONES),
        }
    }
}

/// Shared state of the emergency simulator.
#[derive(Clone)]
pub struct EmergencyState {
    generator: DaySeedGenerator,
    data: Arc<RwLock<EmergencyData>>,
    health: Arc<RwLock<HealthState>>,
}

impl EmergencyState {
    pub fn new(day: u32) -> Self {
        let generator = DaySeedGenerator::new(day);
        let data = EmergencyData::generate(&generator);
        Self {
            generator,
            data: Arc::new(RwLock::new(data)),
            health: Arc::new(RwLock::new(HealthState::default())),
        }
    }
}

impl Simulated for EmergencyState {
    const NAME: &'static str = "Emergency";

    fn health(&self) -> &Arc<RwLock<HealthState>> {
        &self.health
    }
}

/// Build the emergency router.
pub fn emergency_router(state: EmergencyState) -> Router {
    let router = Router::new()
        .route("/emergency/drones/:drone_id/assign", post(assign_drone))
        .route("/emergency/incidents/:incident_id", post(update_incident))
        .route("/emergency/report_status", get(report_status))
        .route(
            "/service/health",
            get(get_health::<EmergencyState>).post(set_health::<EmergencyState>),
        )
        .route("/state/set", post(set_state))
        .route("/state/get", get(get_state))
        .route("/state/reset", post(reset_state))
        .with_state(state);
    finish_router(router)
}

/// POST /emergency/drones/:drone_id/assign
async fn assign_drone(
    State(state): State<EmergencyState>,
    Path(drone_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;
    tracing::debug!("Assigning drone {}", drone_id);

    let incident_id = Params::new(query, &body)
        .str("incident_id")
        .ok_or_else(|| bad_request("incident_id is required"))?;

    let mut data = write_lock(&state.data)?;
    let EmergencyData { incidents, drones } = &mut *data;
    let drone = drones
        .get_mut(&drone_id)
        .ok_or_else(|| not_found(format!("Drone {} not found", drone_id)))?;
    let incident = incidents
        .get_mut(&incident_id)
        .ok_or_else(|| not_found(format!("Incident {} not found", incident_id)))?;

    if drone.status != DroneStatus::Available {
        return Err(bad_request(format!(
            "Drone {} is not available (current status: {})",
            drone_id, drone.status
        )));
    }
    if incident.status != IncidentStatus::Active {
        return Err(bad_request(format!(
            "Incident {} is not active (current status: {})",
            incident_id, incident.status
        )));
    }

    drone.status = DroneStatus::Assigned;
    drone.assigned_incident = Some(incident_id.clone());
    incident.status = IncidentStatus::Assigned;
    incident.assigned_drone = Some(drone_id.clone());

    let eta: u32 = rand::thread_rng().gen_range(5..=20);
    tracing::info!("Drone {} assigned to incident {}", drone_id, incident_id);

    Ok(Json(json!({
        "success": true,
        "drone_id": drone_id,
        "incident_id": incident_id,
        "estimated_arrival_minutes": eta,
        "estimated_completion_minutes": eta.saturating_add(incident.estimated_resolution_minutes),
        "drone_capabilities": drone.capabilities,
        "incident_type": incident.incident_type,
        "incident_urgency": incident.urgency,
    })))
}

/// POST /emergency/incidents/:incident_id
async fn update_incident(
    State(state): State<EmergencyState>,
    Path(incident_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;

    let status = Params::new(query, &body)
        .str("status")
        .ok_or_else(|| bad_request("status is required"))?;

    let mut data = write_lock(&state.data)?;
    let EmergencyData { incidents, drones } = &mut *data;
    let incident = incidents
        .get_mut(&incident_id)
        .ok_or_else(|| not_found(format!("Incident {} not found", incident_id)))?;
    let new_status: IncidentStatus = status.parse().map_err(|_| {
        bad_request(format!("Status must be one of: {:?}", IncidentStatus::names()))
    })?;

    let old_status = incident.status;
    incident.status = new_status;

    match new_status {
        IncidentStatus::Resolved | IncidentStatus::Canceled => {
            if let Some(drone) = incident
                .assigned_drone
                .as_ref()
                .and_then(|id| drones.get_mut(id))
            {
                drone.status = DroneStatus::Available;
                drone.assigned_incident = None;
                incident.assigned_drone = None;
            }
        }
        IncidentStatus::InProgress => {
            if let Some(drone) = incident
                .assigned_drone
                .as_ref()
                .and_then(|id| drones.get_mut(id))
            {
                drone.status = DroneStatus::OnSite;
            }
        }
        _ => {}
    }

    tracing::info!(
        "Incident {} status updated from {} to {}",
        incident_id,
        old_status,
        new_status
    );

    Ok(Json(json!({
        "success": true,
        "incident_id": incident_id,
        "old_status": old_status,
        "new_status": new_status,
        "assigned_drone": incident.assigned_drone,
        "type": incident.incident_type,
        "urgency": incident.urgency,
        "location": incident.zone,
    })))
}

/// GET /emergency/report_status
async fn report_status(State(state): State<EmergencyState>) -> ApiResult {
    simulate_degradation(&state).await?;
    let data = read_lock(&state.data)?;

    let incident_counts: BTreeMap<&str, usize> = IncidentStatus::ALL
        .iter()
        .map(|s| (s.as_str(), data.incidents.values().filter(|i| i.status == *s).count()))
        .collect();
    let drone_counts: BTreeMap<&str, usize> = DroneStatus::ALL
        .iter()
        .map(|s| (s.as_str(), data.drones.values().filter(|d| d.status == *s).count()))
        .collect();
    let count = |map: &BTreeMap<&str, usize>, key: &str| map.get(key).copied().unwrap_or(0);

    let total_incidents = data.incidents.len();
    let responded = count(&incident_counts, "assigned")
        + count(&incident_counts, "in_progress")
        + count(&incident_counts, "resolved");
    let response_rate = if total_incidents > 0 {
        responded as f64 / total_incidents as f64
    } else {
        0.0
    };

    let active_drones = count(&drone_counts, "assigned")
        + count(&drone_counts, "en_route")
        + count(&drone_counts, "on_site");
    let operational = data.drones.len() - count(&drone_counts, "disabled");
    let drone_utilization = if operational > 0 {
        active_drones as f64 / operational as f64
    } else {
        0.0
    };

    let incidents: serde_json::Map<String, Value> = data
        .incidents
        .iter()
        .map(|(id, i)| {
            (
                id.clone(),
                json!({
                    "status": i.status,
                    "type": i.incident_type,
                    "urgency": i.urgency,
                    "assigned_drone": i.assigned_drone,
                    "location": i.zone,
                }),
            )
        })
        .collect();
    let drones: serde_json::Map<String, Value> = data
        .drones
        .iter()
        .map(|(id, d)| {
            (
                id.clone(),
                json!({
                    "status": d.status,
                    "capabilities": d.capabilities,
                    "assigned_incident": d.assigned_incident,
                    "location": d.current_location,
                }),
            )
        })
        .collect();

    Ok(Json(json!({
        "total_incidents": total_incidents,
        "incident_counts": incident_counts,
        "active_incidents": count(&incident_counts, "active"),
        "response_rate": response_rate,
        "total_drones": data.drones.len(),
        "drone_counts": drone_counts,
        "available_drones": count(&drone_counts, "available"),
        "drone_utilization": drone_utilization,
        "incidents": incidents,
        "drones": drones,
    })))
}

/// Map a fractional urgency onto the service's urgency labels.
fn urgency_label(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            let u = n.as_f64().unwrap_or(0.5);
            if u >= 0.9 {
                "critical"
            } else if u >= 0.7 {
                "high"
            } else if u >= 0.4 {
                "medium"
            } else {
                "low"
            }
            .to_string()
        }
        _ => "medium".to_string(),
    }
}

fn parse_status<T: DeserializeOwned>(raw: &Value, default: T) -> T {
    raw.get("status")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or(default)
}

fn normalize_incident(id: &str, raw: &Value) -> Incident {
    Incident {
        incident_id: id.to_string(),
        incident_type: raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        urgency: raw.get("urgency").map(urgency_label).unwrap_or_else(|| "medium".into()),
        zone: field(raw, "location", "zone")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        estimated_resolution_minutes: raw
            .get("estimated_resolution_minutes")
            .and_then(Value::as_u64)
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(30),
        required_capabilities: string_list(raw.get("required_capabilities")),
        status: parse_status(raw, IncidentStatus::Active),
        assigned_drone: raw
            .get("assigned_drone")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn normalize_drone(id: &str, raw: &Value) -> Drone {
    Drone {
        drone_id: id.to_string(),
        version: raw.get("version").and_then(Value::as_str).map(String::from),
        capabilities: string_list(raw.get("capabilities")),
        speed_kph: field(raw, "speed", "speed_kph")
            .and_then(Value::as_f64)
            .unwrap_or(50.0),
        status: parse_status(raw, DroneStatus::Available),
        current_location: field(raw, "current_location", "location")
            .and_then(Value::as_str)
            .unwrap_or("base")
            .to_string(),
        assigned_incident: raw
            .get("assigned_incident")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    raw.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a list or id-keyed map of records.
fn normalize_records<T>(
    raw: Option<&Value>,
    id_key: &str,
    normalize: impl Fn(&str, &Value) -> T,
) -> BTreeMap<String, T> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let id = field(item, "id", id_key)?.as_str()?;
                Some((id.to_string(), normalize(id, item)))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(id, item)| (id.clone(), normalize(id, item)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// POST /state/set
async fn set_state(State(state): State<EmergencyState>, body: Bytes) -> ApiResult {
    let payload = Value::Object(body_object(&body)?);
    tracing::debug!("Setting emergency state from scenario");

    let incidents = normalize_records(payload.get("incidents"), "incident_id", normalize_incident);
    let drones = normalize_records(payload.get("drones"), "drone_id", normalize_drone);

    let mut data = write_lock(&state.data)?;
    if !incidents.is_empty() {
        data.incidents = incidents;
    }
    if !drones.is_empty() {
        data.drones = drones;
    }

    Ok(Json(json!({
        "success": true,
        "incidents_updated": data.incidents.len(),
        "drones_updated": data.drones.len(),
    })))
}

/// GET /state/get
async fn get_state(State(state): State<EmergencyState>) -> ApiResult {
    let data = read_lock(&state.data)?;
    Ok(Json(json!({
        "incidents": data.incidents,
        "drones": data.drones,
    })))
}

/// POST /state/reset
async fn reset_state(State(state): State<EmergencyState>) -> ApiResult {
    let mut data = write_lock(&state.data)?;
    *data = EmergencyData::generate(&state.generator);
    Ok(Json(json!({"success": true, "message": "Emergency state reset to initial values"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::send;
    use axum::http::Method;

    async fn seeded_app() -> Router {
        let app = emergency_router(EmergencyState::new(1));
        let (status, _) = send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({
                "incidents": [
                    {"id": "E-1001", "type": "medical", "urgency": 0.99, "location": "Z001",
                     "required_capabilities": ["medical_kit"]},
                    {"incident_id": "E-1002", "type": "fire", "urgency": "high", "zone": "Z002", "status": "resolved"}
                ],
                "drones": [
                    {"id": "D001", "capabilities": ["medical_kit"], "speed": 1.5},
                    {"drone_id": "D002", "status": "maintenance"}
                ]
            })),
        )
        .await;
        assert_eq!(status, 200);
        app
    }

    #[tokio::test]
    async fn test_assign_then_resolve_frees_drone() {
        let app = seeded_app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/emergency/drones/D001/assign",
            Some(json!({"incident_id": "E-1001"})),
        )
        .await;
        assert_eq!(status, 200);
        let eta = body["estimated_arrival_minutes"].as_u64().unwrap();
        assert!((5..=20).contains(&eta));
        assert_eq!(body["estimated_completion_minutes"].as_u64().unwrap(), eta + 30);
        assert_eq!(body["incident_urgency"], "critical");

        let (_, body) = send(
            &app,
            Method::POST,
            "/emergency/incidents/E-1001?status=in_progress",
            None,
        )
        .await;
        assert_eq!(body["old_status"], "assigned");
        assert_eq!(body["location"], "Z001");

        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["drones"]["D001"]["status"], "on_site");

        let (_, body) = send(
            &app,
            Method::POST,
            "/emergency/incidents/E-1001",
            Some(json!({"status": "resolved"})),
        )
        .await;
        assert_eq!(body["assigned_drone"], Value::Null);

        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["drones"]["D001"]["status"], "available");
        assert_eq!(state["drones"]["D001"]["assigned_incident"], Value::Null);
    }

    #[tokio::test]
    async fn test_assign_rejections() {
        let app = seeded_app().await;
        let (status, body) = send(&app, Method::POST, "/emergency/drones/D001/assign", None).await;
        assert_eq!(status, 400);
        assert_eq!(body["detail"], "incident_id is required");

        let (status, _) = send(
            &app,
            Method::POST,
            "/emergency/drones/D404/assign?incident_id=E-1001",
            None,
        )
        .await;
        assert_eq!(status, 404);

        let (status, body) = send(
            &app,
            Method::POST,
            "/emergency/drones/D002/assign?incident_id=E-1001",
            None,
        )
        .await;
        assert_eq!(status, 400);
        assert!(body["detail"].as_str().unwrap().contains("maintenance"));

        let (status, body) = send(
            &app,
            Method::POST,
            "/emergency/drones/D001/assign?incident_id=E-1002",
            None,
        )
        .await;
        assert_eq!(status, 400);
        assert!(body["detail"].as_str().unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_assign_with_huge_resolution_time_saturates() {
        let app = emergency_router(EmergencyState::new(1));
        let (status, _) = send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({
                "incidents": [
                    {"id": "E-2001", "type": "fire", "estimated_resolution_minutes": 10_000_000_000u64},
                    {"id": "E-2002", "type": "fire", "estimated_resolution_minutes": u32::MAX}
                ],
                "drones": [{"id": "D009"}, {"id": "D010"}]
            })),
        )
        .await;
        assert_eq!(status, 200);

        for (drone, incident) in [("D009", "E-2001"), ("D010", "E-2002")] {
            let uri = format!("/emergency/drones/{}/assign?incident_id={}", drone, incident);
            let (status, body) = send(&app, Method::POST, &uri, None).await;
            assert_eq!(status, 200);
            assert_eq!(body["estimated_completion_minutes"].as_u64().unwrap(), u64::from(u32::MAX));
        }

        let (status, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(status, 200);
        assert_eq!(state["incidents"]["E-2001"]["estimated_resolution_minutes"], u32::MAX);
    }

    #[tokio::test]
    async fn test_update_incident_validation_order() {
        let app = seeded_app().await;
        let (status, _) = send(&app, Method::POST, "/emergency/incidents/E-1001", None).await;
        assert_eq!(status, 400);

        let (status, _) = send(&app, Method::POST, "/emergency/incidents/E-9999?status=bogus", None).await;
        assert_eq!(status, 404);

        let (status, _) = send(&app, Method::POST, "/emergency/incidents/E-1001?status=bogus", None).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_report_rates() {
        let app = seeded_app().await;
        send(
            &app,
            Method::POST,
            "/emergency/drones/D001/assign?incident_id=E-1001",
            None,
        )
        .await;
        let (_, report) = send(&app, Method::GET, "/emergency/report_status", None).await;
        assert_eq!(report["total_incidents"], 2);
        assert_eq!(report["response_rate"], json!(1.0));
        assert_eq!(report["drone_utilization"], json!(0.5));
        assert_eq!(report["drones"]["D002"]["location"], "base");
        assert_eq!(report["incident_counts"]["canceled"], 0);
    }

    #[tokio::test]
    async fn test_empty_set_keeps_existing_records() {
        let app = emergency_router(EmergencyState::new(2));
        let (_, body) = send(&app, Method::POST, "/state/set", Some(json!({"incidents": []}))).await;
        assert_eq!(body["incidents_updated"], DEFAULT_INCIDENTS);
        assert_eq!(body["drones_updated"], DEFAULT_DRONES);
    }
}
