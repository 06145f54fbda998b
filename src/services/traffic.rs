//! Traffic simulator (port 8004): congestion, redirection and route blocks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::{
    bad_request, body_object, field, finish_router, get_health, not_found, read_lock, set_health,
    simulate_degradation, write_lock, ApiResult, HealthState, Params, Simulated,
};
use crate::models::records::{travel_multiplier, BLOCKED_MULTIPLIER};
use crate::models::{TrafficSector, TrafficStatus};
use crate::seed::{DaySeedGenerator, DEFAULT_SECTORS};

/// Shared state of the traffic simulator.
#[derive(Clone)]
pub struct TrafficState {
    generator: DaySeedGenerator,
    sectors: Arc<RwLock<BTreeMap<String, TrafficSector>>>,
    health: Arc<RwLock<HealthState>>,
}

impl TrafficState {
    pub fn new(day: u32) -> Self {
        let generator = DaySeedGenerator::new(day);
        let sectors = generator.generate_traffic_data(DEFAULT_SECTORS);
        Self {
            generator,
            sectors: Arc::new(RwLock::new(sectors)),
            health: Arc::new(RwLock::new(HealthState::default())),
        }
    }
}

impl Simulated for TrafficState {
    const NAME: &'static str = "Traffic";

    fn health(&self) -> &Arc<RwLock<HealthState>> {
        &self.health
    }
}

/// Build the traffic router.
pub fn traffic_router(state: TrafficState) -> Router {
    let router = Router::new()
        .route("/traffic/redirect", post(redirect_traffic))
        .route("/traffic/block_route", post(block_route))
        .route("/traffic/report_conditions", post(report_conditions))
        .route(
            "/service/health",
            get(get_health::<TrafficState>).post(set_health::<TrafficState>),
        )
        .route("/state/set", post(set_state))
        .route("/state/get", get(get_state))
        .route("/state/reset", post(reset_state))
        .with_state(state);
    finish_router(router)
}

/// POST /traffic/redirect
async fn redirect_traffic(
    State(state): State<TrafficState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;
    let params = Params::new(query, &body);

    let target_reduction = params.f64("target_reduction")?.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&target_reduction) {
        return Err(bad_request("target_reduction must be between 0.0 and 1.0"));
    }
    let sector_id = params
        .str("sector_id")
        .ok_or_else(|| bad_request("sector_id is required"))?;
    tracing::debug!("Redirecting traffic in sector {}", sector_id);

    let mut sectors = write_lock(&state.sectors)?;
    let sector = sectors
        .get_mut(&sector_id)
        .ok_or_else(|| not_found(format!("Sector {} not found", sector_id)))?;
    if sector.is_blocked {
        return Err(bad_request(format!(
            "Cannot redirect traffic in blocked sector {}",
            sector_id
        )));
    }

    let old_congestion = sector.congestion_level;
    let new_congestion = (old_congestion * (1.0 - target_reduction)).max(0.0);
    sector.congestion_level = new_congestion;
    sector.travel_time_multiplier = travel_multiplier(new_congestion);
    sector.status = TrafficStatus::from_congestion(new_congestion);

    let actual_reduction = if old_congestion > 0.0 {
        (old_congestion - new_congestion) / old_congestion
    } else {
        0.0
    };

    tracing::info!(
        "Traffic redirected in sector {}: {:.2} -> {:.2}",
        sector_id,
        old_congestion,
        new_congestion
    );

    Ok(Json(json!({
        "success": true,
        "sector_id": sector_id,
        "old_congestion": old_congestion,
        "new_congestion": new_congestion,
        "target_reduction": target_reduction,
        "actual_reduction": actual_reduction,
        "new_status": sector.status,
        "travel_time_multiplier": sector.travel_time_multiplier,
    })))
}

/// POST /traffic/block_route
async fn block_route(
    State(state): State<TrafficState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    simulate_degradation(&state).await?;
    let params = Params::new(query, &body);

    let sector_id = params
        .str("sector")
        .ok_or_else(|| bad_request("Sector parameter is required"))?;
    let reason = params
        .str("reason")
        .ok_or_else(|| bad_request("Reason parameter is required"))?;
    let duration_minutes = params
        .f64("duration_minutes")?
        .filter(|d| *d > 0.0)
        .map(|d| d as u32);
    tracing::debug!("Blocking route in sector: {}", sector_id);

    let mut sectors = write_lock(&state.sectors)?;
    let sector = sectors
        .get_mut(&sector_id)
        .ok_or_else(|| not_found(format!("Sector {} not found", sector_id)))?;

    let old_status = sector.status;
    sector.status = TrafficStatus::Blocked;
    sector.is_blocked = true;
    sector.block_reason = Some(reason.clone());
    sector.travel_time_multiplier = BLOCKED_MULTIPLIER;
    if let Some(minutes) = duration_minutes {
        sector.block_duration_minutes = Some(minutes);
        sector.block_end_time = Some(chrono::Utc::now().timestamp() + i64::from(minutes) * 60);
    }

    let spillover = sector.congestion_level * 0.3;
    for (id, other) in sectors.iter_mut() {
        if *id == sector_id || other.is_blocked {
            continue;
        }
        other.congestion_level = (other.congestion_level + spillover * 0.1).min(1.0);
        other.travel_time_multiplier = travel_multiplier(other.congestion_level);
    }

    tracing::info!("Route blocked in sector {}: {}", sector_id, reason);

    Ok(Json(json!({
        "success": true,
        "sector": sector_id,
        "old_status": old_status,
        "new_status": TrafficStatus::Blocked,
        "reason": reason,
        "duration_minutes": duration_minutes,
        "travel_time_multiplier": BLOCKED_MULTIPLIER,
        "spillover_effect": format!(
            "Increased congestion in neighboring sectors by {:.2}",
            spillover * 0.1
        ),
    })))
}

fn overall_flow(avg_congestion: f64) -> &'static str {
    if avg_congestion < 0.3 {
        "excellent"
    } else if avg_congestion < 0.5 {
        "good"
    } else if avg_congestion < 0.7 {
        "moderate"
    } else if avg_congestion < 0.9 {
        "poor"
    } else {
        "critical"
    }
}

/// POST /traffic/report_conditions?description=
async fn report_conditions(
    State(state): State<TrafficState>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    simulate_degradation(&state).await?;
    let sectors = read_lock(&state.sectors)?;

    let status_counts: BTreeMap<&str, usize> = TrafficStatus::ALL
        .iter()
        .map(|s| (s.as_str(), sectors.values().filter(|x| x.status == *s).count()))
        .collect();
    let active: Vec<&TrafficSector> = sectors.values().filter(|s| !s.is_blocked).collect();
    let (avg_congestion, avg_multiplier) = if active.is_empty() {
        (0.0, 1.0)
    } else {
        let n = active.len() as f64;
        (
            active.iter().map(|s| s.congestion_level).sum::<f64>() / n,
            active.iter().map(|s| s.travel_time_multiplier).sum::<f64>() / n,
        )
    };

    let mut most_congested: Vec<&TrafficSector> = active
        .iter()
        .copied()
        .filter(|s| s.congestion_level > 0.7)
        .collect();
    most_congested.sort_by(|a, b| b.congestion_level.total_cmp(&a.congestion_level));
    let most_congested: Vec<Value> = most_congested
        .into_iter()
        .take(5)
        .map(|s| json!({"sector_id": s.sector_id, "congestion": s.congestion_level}))
        .collect();

    let description = query
        .get("description")
        .filter(|d| !d.is_empty())
        .cloned()
        .unwrap_or_else(|| {
            format!(
                "Traffic conditions as of {}",
                chrono::Local::now().format("%H:%M")
            )
        });

    let sector_map: serde_json::Map<String, Value> = sectors
        .iter()
        .map(|(id, s)| {
            (
                id.clone(),
                json!({
                    "status": s.status,
                    "congestion_level": s.congestion_level,
                    "is_blocked": s.is_blocked,
                    "travel_time_multiplier": s.travel_time_multiplier,
                    "block_reason": s.block_reason,
                }),
            )
        })
        .collect();

    Ok(Json(json!({
        "total_sectors": sectors.len(),
        "blocked_sectors": sectors.len() - active.len(),
        "active_sectors": active.len(),
        "status_counts": status_counts,
        "average_congestion": avg_congestion,
        "average_travel_multiplier": avg_multiplier,
        "overall_flow": overall_flow(avg_congestion),
        "most_congested": most_congested,
        "description": description,
        "sectors": sector_map,
    })))
}

fn normalize_sector(id: &str, raw: &Value) -> TrafficSector {
    TrafficSector {
        sector_id: id.to_string(),
        status: raw
            .get("status")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or(TrafficStatus::Clear),
        congestion_level: field(raw, "congestion", "congestion_level")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        is_blocked: field(raw, "blocked", "is_blocked")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        travel_time_multiplier: raw
            .get("travel_time_multiplier")
            .and_then(Value::as_f64)
            .unwrap_or(1.0),
        block_reason: raw.get("block_reason").and_then(Value::as_str).map(String::from),
        block_duration_minutes: None,
        block_end_time: None,
    }
}

fn normalize_sectors(raw: &Value) -> BTreeMap<String, TrafficSector> {
    match raw {
        Value::Object(map) => map
            .iter()
            .map(|(id, s)| (id.clone(), normalize_sector(id, s)))
            .collect(),
        Value::Array(list) => list
            .iter()
            .filter_map(|s| {
                let id = ["id", "sector_id", "zone_id"]
                    .iter()
                    .find_map(|k| s.get(*k).and_then(Value::as_str))?;
                Some((id.to_string(), normalize_sector(id, s)))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// POST /state/set
async fn set_state(State(state): State<TrafficState>, body: Bytes) -> ApiResult {
    let payload = body_object(&body)?;
    tracing::debug!("Setting traffic state from scenario");

    let normalized = payload
        .get("traffic")
        .or_else(|| payload.get("sectors"))
        .map(normalize_sectors)
        .unwrap_or_default();

    let mut sectors = write_lock(&state.sectors)?;
    if !normalized.is_empty() {
        *sectors = normalized;
    }
    Ok(Json(json!({"success": true, "sectors_updated": sectors.len()})))
}

/// GET /state/get
async fn get_state(State(state): State<TrafficState>) -> ApiResult {
    let sectors = read_lock(&state.sectors)?;
    Ok(Json(json!({ "sectors": *sectors })))
}

/// POST /state/reset
async fn reset_state(State(state): State<TrafficState>) -> ApiResult {
    let mut sectors = write_lock(&state.sectors)?;
    *sectors = state.generator.generate_traffic_data(DEFAULT_SECTORS);
    Ok(Json(json!({"success": true, "message": "Traffic state reset to initial values"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::send;
    use axum::http::Method;

    async fn seeded_app() -> Router {
        let app = traffic_router(TrafficState::new(1));
        send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({"sectors": {
                "S001": {"congestion": 0.8, "status": "heavy"},
                "S002": {"congestion_level": 0.5},
                "S003": {"congestion": 0.9, "blocked": true, "status": "blocked"}
            }})),
        )
        .await;
        app
    }

    #[tokio::test]
    async fn test_redirect_reduces_congestion() {
        let app = seeded_app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/traffic/redirect",
            Some(json!({"sector_id": "S001", "target_reduction": 0.5})),
        )
        .await;
        assert_eq!(status, 200);
        assert!((body["new_congestion"].as_f64().unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(body["new_status"], "moderate");
        assert!((body["actual_reduction"].as_f64().unwrap() - 0.5).abs() < 1e-9);
        assert!((body["travel_time_multiplier"].as_f64().unwrap() - 1.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_redirect_rejections() {
        let app = seeded_app().await;
        let (status, _) = send(&app, Method::POST, "/traffic/redirect", None).await;
        assert_eq!(status, 400);
        let (status, _) = send(&app, Method::POST, "/traffic/redirect?sector_id=S404", None).await;
        assert_eq!(status, 404);
        let (status, body) = send(&app, Method::POST, "/traffic/redirect?sector_id=S003", None).await;
        assert_eq!(status, 400);
        assert!(body["detail"].as_str().unwrap().contains("blocked sector"));
        let (status, _) = send(
            &app,
            Method::POST,
            "/traffic/redirect?sector_id=S001&target_reduction=2",
            None,
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_block_route_spills_over() {
        let app = seeded_app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/traffic/block_route",
            Some(json!({"sector": "S001", "reason": "flooding", "duration_minutes": 30})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["old_status"], "heavy");
        assert_eq!(body["new_status"], "blocked");
        assert_eq!(body["spillover_effect"], "Increased congestion in neighboring sectors by 0.02");

        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        let s001 = &state["sectors"]["S001"];
        assert_eq!(s001["travel_time_multiplier"], json!(5.0));
        assert_eq!(s001["block_duration_minutes"], 30);
        assert!(s001["block_end_time"].as_i64().is_some());

        let s002 = &state["sectors"]["S002"];
        assert!((s002["congestion_level"].as_f64().unwrap() - 0.524).abs() < 1e-9);
        // label is left alone on spillover
        assert_eq!(s002["status"], "clear");
        // blocked neighbours are untouched
        assert_eq!(state["sectors"]["S003"]["congestion_level"], json!(0.9));
    }

    #[tokio::test]
    async fn test_block_route_requires_reason() {
        let app = seeded_app().await;
        let (status, body) = send(&app, Method::POST, "/traffic/block_route?sector=S001", None).await;
        assert_eq!(status, 400);
        assert_eq!(body["detail"], "Reason parameter is required");
    }

    #[tokio::test]
    async fn test_report_conditions() {
        let app = seeded_app().await;
        let (_, report) = send(
            &app,
            Method::POST,
            "/traffic/report_conditions?description=rush%20hour",
            None,
        )
        .await;
        assert_eq!(report["total_sectors"], 3);
        assert_eq!(report["blocked_sectors"], 1);
        assert!((report["average_congestion"].as_f64().unwrap() - 0.65).abs() < 1e-9);
        assert_eq!(report["overall_flow"], "moderate");
        assert_eq!(report["most_congested"], json!([{"sector_id": "S001", "congestion": 0.8}]));
        assert_eq!(report["description"], "rush hour");
    }

    #[tokio::test]
    async fn test_list_payload_uses_zone_id() {
        let app = traffic_router(TrafficState::new(1));
        let (_, body) = send(
            &app,
            Method::POST,
            "/state/set",
            Some(json!({"traffic": [{"zone_id": "Z001", "congestion": 0.99, "blocked": true}]})),
        )
        .await;
        assert_eq!(body["sectors_updated"], 1);
        let (_, state) = send(&app, Method::GET, "/state/get", None).await;
        assert_eq!(state["sectors"]["Z001"]["is_blocked"], true);
    }
}
