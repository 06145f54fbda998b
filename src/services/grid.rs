//! Power grid simulator (port 8002).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use super::{
    bad_request, body_object, field, finish_router, get_health, not_found, read_lock, set_health,
    simulate_degradation, write_lock, ApiResult, HealthState, Params, Simulated,
};
use crate::models::records::DEFAULT_STABILITY;
use crate::models::{GridZone, Infrastructure, PriorityLevel};
use crate::seed::{DaySeedGenerator, DEFAULT_ZONES};

/// Infrastructure priorities a fresh grid starts with.
pub fn default_infrastructure() -> BTreeMap<String, Infrastructure> {
    [
        Infrastructure::new("hospital", PriorityLevel::High, 5000.0),
        Infrastructure::new("police", PriorityLevel::Medium, 3000.0),
        Infrastructure::new("water_treatment", PriorityLevel::Medium, 4000.0),
        Infrastructure::new("data_center", PriorityLevel::Low, 8000.0),
        Infrastructure::new("emergency_shelter", PriorityLevel::Low, 2000.0),
    ]
    .into_iter()
    .map(|infra| (infra.infrastructure_id.clone(), infra))
    .collect()
}

#[derive(Debug)]
struct GridData {
    zones: BTreeMap<String, GridZone>,
    infrastructure: BTreeMap<String, Infrastructure>,
}

/// Shared state of the grid simulator.
#[derive(Clone)]
pub struct GridState {
    generator: DaySeedGenerator,
    data: Arc<RwLock<GridData>>,
    health: Arc<RwLock<HealthState>>,
}

impl GridState {
    pub fn new(day: u32) -> Self {
        let generator = DaySeedGenerator::new(day);
        let data = GridData {
            zones: generator.generate_grid_data(DEFAULT_ZONES),
            infrastructure: default_infrastructure(),
        };
        Self {
            generator,
            data: Arc::new(RwLock::new(data)),
            health: Arc::new(RwLock::new(HealthState::default())),
        }
    }
}

impl Simulated for GridState {
    const NAME: &'static str = "Grid";

    fn health(&self) -> &Arc<RwLock<HealthState>> {
        &self.health
    }
}

/// Build the grid router.
pub fn grid_router(state: GridState) -> Router {
    let router = Router::new()
        .route("/grid/zones/:zone_id/capacity", put(adjust_zone_capacity))
        .route("/grid/infrastructure/:infrastructure_id/priority", post(set_priority))
        .route("/grid/report_status", get(report_status))
        .route(
            "/service/health",
            get(get_health::<GridState>).post(set_health::<GridState>),
        )
        .route("/state/set", post(set_state))
        .route("/state/get", get(get_state))
        .route("/state/reset", post(reset_state))
        .with_state(state);
    finish_router(router)
}

/// PUT /grid/zones/:zone_id/capacity
async fn adjust_zone_capacity(
    State(state): State<GridState>,
    Path(zone_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;
    tracing::debug!("Adjusting capacity for zone: {}", zone_id);

    let mut data = write_lock(&state.data)?;
    let zone = data
        .zones
        .get_mut(&zone_id)
        .ok_or_else(|| not_found(format!("Zone {} not found", zone_id)))?;

    let capacity = Params::new(query, &body)
        .f64("capacity")?
        .ok_or_else(|| bad_request("Capacity parameter is required"))?;
    if !(0.0..=1.0).contains(&capacity) {
        return Err(bad_request("Capacity must be between 0.0 and 1.0"));
    }

    let old_capacity = zone.capacity_kw;
    let max_capacity = zone.max_capacity_kw.unwrap_or(old_capacity);
    let new_capacity = max_capacity * capacity;
    zone.capacity_kw = new_capacity;

    let load_ratio = if new_capacity > 0.0 {
        zone.current_load_kw / new_capacity
    } else {
        1.0
    };
    let stability = zone.stability();
    let (stability, status) = if load_ratio > 1.0 {
        ((stability - 0.3).max(0.1), "overloaded")
    } else if load_ratio > 0.9 {
        ((stability - 0.1).max(0.3), "degraded")
    } else {
        ((stability + 0.2).min(1.0), "online")
    };
    zone.stability = Some(stability);
    zone.status = status.to_string();

    tracing::info!(
        "Zone {} capacity adjusted to {:.1}% ({}kW)",
        zone_id,
        capacity * 100.0,
        new_capacity
    );

    Ok(Json(json!({
        "success": true,
        "zone_id": zone_id,
        "old_capacity_kw": old_capacity,
        "new_capacity_kw": new_capacity,
        "capacity_percentage": capacity,
        "current_load_kw": zone.current_load_kw,
        "load_ratio": load_ratio,
        "stability": stability,
        "status": status,
    })))
}

/// POST /grid/infrastructure/:infrastructure_id/priority
async fn set_priority(
    State(state): State<GridState>,
    Path(infrastructure_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;

    let level = Params::new(query, &body)
        .str("level")
        .ok_or_else(|| bad_request("Priority level is required"))?;
    let level: PriorityLevel = level.parse().map_err(|_| {
        bad_request(format!(
            "Priority level must be one of: {:?}",
            PriorityLevel::names()
        ))
    })?;

    let mut data = write_lock(&state.data)?;
    let infra = data
        .infrastructure
        .entry(infrastructure_id.clone())
        .or_insert_with(|| Infrastructure::new(&infrastructure_id, PriorityLevel::Medium, 1000.0));
    let old_level = infra.level;
    infra.level = level;
    let estimated_load_kw = infra.estimated_load_kw;

    let mut affected_zones = Vec::new();
    for (zone_id, zone) in data.zones.iter_mut().filter(|(_, z)| z.is_critical) {
        if level == PriorityLevel::Critical {
            zone.stability = Some((zone.stability() + 0.1).min(1.0));
            affected_zones.push(zone_id.clone());
        } else if old_level == PriorityLevel::Critical {
            zone.stability = Some((zone.stability() - 0.1).max(0.1));
            affected_zones.push(zone_id.clone());
        }
    }

    tracing::info!("Infrastructure {} priority set to {}", infrastructure_id, level);

    Ok(Json(json!({
        "success": true,
        "infrastructure_id": infrastructure_id,
        "old_level": old_level,
        "new_level": level,
        "estimated_load_kw": estimated_load_kw,
        "affected_zones": affected_zones,
    })))
}

/// GET /grid/report_status?zone_id=
async fn report_status(
    State(state): State<GridState>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    simulate_degradation(&state).await?;
    let data = read_lock(&state.data)?;

    if let Some(zone_id) = query.get("zone_id").filter(|z| !z.is_empty()) {
        let zone = data
            .zones
            .get(zone_id)
            .ok_or_else(|| not_found(format!("Zone {} not found", zone_id)))?;
        return Ok(Json(json!({
            "zone_id": zone_id,
            "status": zone.status,
            "capacity_kw": zone.capacity_kw,
            "current_load_kw": zone.current_load_kw,
            "load_ratio": zone.load_ratio(),
            "stability": zone.stability(),
            "is_critical": zone.is_critical,
        })));
    }

    let total_capacity: f64 = data.zones.values().map(|z| z.capacity_kw).sum();
    let total_load: f64 = data.zones.values().map(|z| z.current_load_kw).sum();
    let average_stability = if data.zones.is_empty() {
        0.0
    } else {
        data.zones.values().map(GridZone::stability).sum::<f64>() / data.zones.len() as f64
    };
    let ids_where = |pred: &dyn Fn(&GridZone) -> bool| -> Vec<&String> {
        data.zones
            .iter()
            .filter(|(_, z)| pred(z))
            .map(|(id, _)| id)
            .collect()
    };
    let zones: serde_json::Map<String, Value> = data
        .zones
        .iter()
        .map(|(id, z)| {
            (
                id.clone(),
                json!({
                    "status": z.status,
                    "capacity_kw": z.capacity_kw,
                    "current_load_kw": z.current_load_kw,
                    "stability": z.stability(),
                    "is_critical": z.is_critical,
                }),
            )
        })
        .collect();

    Ok(Json(json!({
        "total_zones": data.zones.len(),
        "total_capacity_kw": total_capacity,
        "total_load_kw": total_load,
        "overall_load_ratio": if total_capacity > 0.0 { total_load / total_capacity } else { 0.0 },
        "average_stability": average_stability,
        "critical_zones": ids_where(&|z| z.is_critical),
        "offline_zones": ids_where(&|z| z.status == "offline"),
        "overloaded_zones": ids_where(&|z| z.status == "overloaded"),
        "critical_infrastructure": data.infrastructure.keys().collect::<Vec<_>>(),
        "zones": zones,
    })))
}

/// Turn a scenario zone payload into a grid zone, accepting both the
/// fractional (`capacity`, `current_load`) and the kW field names.
fn normalize_zone(zone_id: &str, raw: &Value) -> GridZone {
    let num = |primary: &str, alias: &str, default: f64| {
        field(raw, primary, alias)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    };
    let capacity_kw = num("capacity", "capacity_kw", 1000.0);
    GridZone {
        zone_id: zone_id.to_string(),
        status: raw
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("online")
            .to_string(),
        capacity_kw,
        current_load_kw: num("current_load", "current_load_kw", 500.0),
        is_critical: raw.get("is_critical").and_then(Value::as_bool).unwrap_or(false),
        stability: Some(num("stability", "stability", DEFAULT_STABILITY).clamp(0.0, 1.0)),
        max_capacity_kw: Some(raw.get("max_capacity_kw").and_then(Value::as_f64).unwrap_or(capacity_kw)),
    }
}

/// Zone payloads arrive either keyed by id or as a list of objects.
fn normalize_zones(zones: &Value) -> BTreeMap<String, GridZone> {
    match zones {
        Value::Object(map) => map
            .iter()
            .map(|(id, raw)| (id.clone(), normalize_zone(id, raw)))
            .collect(),
        Value::Array(list) => list
            .iter()
            .filter_map(|raw| {
                let id = field(raw, "id", "zone_id")?.as_str()?.to_string();
                Some((id.clone(), normalize_zone(&id, raw)))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// POST /state/set
async fn set_state(State(state): State<GridState>, body: Bytes) -> ApiResult {
    let payload = body_object(&body)?;
    tracing::debug!("Setting grid state from scenario");

    let mut data = write_lock(&state.data)?;
    if let Some(zones) = payload.get("zones") {
        data.zones = normalize_zones(zones);
    }
    if let Some(Value::Object(infra)) = payload.get("infrastructure") {
        for (id, raw) in infra {
            match serde_json::from_value::<Infrastructure>(raw.clone()) {
                Ok(entry) => {
                    data.infrastructure.insert(id.clone(), entry);
                }
                Err(e) => tracing::warn!("Skipping infrastructure {}: {}", id, e),
            }
        }
    }

    Ok(Json(json!({"success": true, "zones_updated": data.zones.len()})))
}

/// GET /state/get
async fn get_state(State(state): State<GridState>) -> ApiResult {
    let data = read_lock(&state.data)?;
    Ok(Json(json!({
        "zones": data.zones,
        "infrastructure": data.infrastructure,
    })))
}

/// POST /state/reset
async fn reset_state(State(state): State<GridState>) -> ApiResult {
    let mut data = write_lock(&state.data)?;
    data.zones = state.generator.generate_grid_data(DEFAULT_ZONES);
    data.infrastructure = default_infrastructure();
    Ok(Json(json!({"success": true, "message": "Grid state reset to initial values"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::send;
    use axum::http::Method;

    fn app_with_zone(capacity: f64, load: f64, critical: bool) -> Router {
        let state = GridState::new(1);
        {
            let mut data = state.data.write().unwrap();
            data.zones = normalize_zones(&json!({
                "Z001": {"capacity_kw": capacity, "current_load_kw": load, "is_critical": critical}
            }));
        }
        grid_router(state)
    }

    #[tokio::test]
    async fn test_adjust_capacity_overloads_zone() {
        let app = app_with_zone(100.0, 80.0, false);
        let (status, body) = send(
            &app,
            Method::PUT,
            "/grid/zones/Z001/capacity",
            Some(json!({"capacity": 0.5})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["new_capacity_kw"], json!(50.0));
        assert_eq!(body["status"], "overloaded");
        assert!((body["stability"].as_f64().unwrap() - 0.2).abs() < 1e-9);

        // read-your-write through the report endpoint
        let (_, report) = send(&app, Method::GET, "/grid/report_status?zone_id=Z001", None).await;
        assert_eq!(report["capacity_kw"], json!(50.0));
        assert_eq!(report["status"], "overloaded");
    }

    #[tokio::test]
    async fn test_adjust_capacity_validation() {
        let app = app_with_zone(100.0, 50.0, false);
        let (status, body) = send(&app, Method::PUT, "/grid/zones/Z001/capacity", None).await;
        assert_eq!(status, 400);
        assert_eq!(body["detail"], "Capacity parameter is required");

        let (status, _) = send(&app, Method::PUT, "/grid/zones/Z001/capacity?capacity=1.5", None).await;
        assert_eq!(status, 400);

        let (status, _) = send(&app, Method::PUT, "/grid/zones/Z999/capacity?capacity=0.5", None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_zero_capacity_counts_as_full_load() {
        let app = app_with_zone(100.0, 50.0, false);
        let (_, body) = send(&app, Method::PUT, "/grid/zones/Z001/capacity?capacity=0", None).await;
        assert_eq!(body["load_ratio"], json!(1.0));
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_priority_affects_critical_zones() {
        let app = app_with_zone(100.0, 50.0, true);
        let (status, body) = send(
            &app,
            Method::POST,
            "/grid/infrastructure/hospital/priority",
            Some(json!({"level": "critical"})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["old_level"], "high");
        assert_eq!(body["affected_zones"], json!(["Z001"]));

        let (_, body) = send(
            &app,
            Method::POST,
            "/grid/infrastructure/hospital/priority?level=low",
            None,
        )
        .await;
        assert_eq!(body["old_level"], "critical");
        assert_eq!(body["affected_zones"], json!(["Z001"]));

        let (_, report) = send(&app, Method::GET, "/grid/report_status?zone_id=Z001", None).await;
        assert!((report["stability"].as_f64().unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_infrastructure_is_created() {
        let app = app_with_zone(100.0, 50.0, false);
        let (_, body) = send(
            &app,
            Method::POST,
            "/grid/infrastructure/stadium/priority?level=high",
            None,
        )
        .await;
        assert_eq!(body["old_level"], "medium");
        assert_eq!(body["estimated_load_kw"], json!(1000.0));

        let (status, _) = send(
            &app,
            Method::POST,
            "/grid/infrastructure/stadium/priority?level=urgent",
            None,
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_state_set_accepts_fractional_zones() {
        let app = grid_router(GridState::new(3));
        let (_, body) = send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({"zones": {"Z001": {"id": "Z001", "capacity": 1.0, "current_load": 0.98, "stability": 0.4, "is_critical": true}}})),
        )
        .await;
        assert_eq!(body["zones_updated"], 1);

        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["zones"]["Z001"]["max_capacity_kw"], json!(1.0));
        assert_eq!(state["zones"]["Z001"]["stability"], json!(0.4));
        assert_eq!(state["infrastructure"]["hospital"]["level"], "high");

        let (_, overview) = send(&app, Method::GET, "/grid/report_status", None).await;
        assert_eq!(overview["critical_zones"], json!(["Z001"]));

        send(&app, Method::POST, "/state/reset", None).await;
        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["zones"].as_object().unwrap().len(), DEFAULT_ZONES);
    }

    #[tokio::test]
    async fn test_state_set_clamps_stability() {
        let app = grid_router(GridState::new(3));
        let (status, _) = send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({"zones": [
                {"id": "Z001", "capacity": 1.0, "current_load": 0.5, "stability": 7.5},
                {"id": "Z002", "capacity": 1.0, "current_load": 0.5, "stability": -0.3}
            ]})),
        )
        .await;
        assert_eq!(status, 200);

        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["zones"]["Z001"]["stability"], json!(1.0));
        assert_eq!(state["zones"]["Z002"]["stability"], json!(0.0));
    }

    #[tokio::test]
    async fn test_health_bounds_and_failures() {
        let app = app_with_zone(100.0, 50.0, false);
        let (status, _) = send(&app, Method::POST, "/service/health?latency=11", None).await;
        assert_eq!(status, 400);

        let (status, body) = send(
            &app,
            Method::POST,
            "/service/health?status=degraded&latency=0&error_rate=1.0",
            None,
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "degraded");

        let (status, body) = send(&app, Method::GET, "/grid/report_status", None).await;
        assert_eq!(status, 500);
        assert_eq!(body["detail"], "Grid service temporarily unavailable");

        let (_, health) = send(&app, Method::GET, "/service/health", None).await;
        assert_eq!(health["error_rate"], json!(1.0));
    }
}
