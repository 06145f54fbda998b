//! HTTP simulators for the city services.
//!
//! Each simulator is an axum [`Router`] over in-memory state:
//!
//! - [`grid`] (port 8002): zone capacity, infrastructure priority
//! - [`emergency`] (port 8003): drone dispatch, incident lifecycle
//! - [`traffic`] (port 8004): congestion redirect, route blocking
//! - [`scenario`] (port 8005): scenario storage and activation
//!
//! All of them share the `/service/health` fault injection and the
//! `/state/{set,get,reset}` endpoints used by scenario activation.

pub mod emergency;
pub mod grid;
pub mod scenario;
pub mod traffic;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json, Router,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use emergency::{emergency_router, EmergencyState};
pub use grid::{grid_router, GridState};
pub use scenario::{scenario_router, ScenarioState};
pub use traffic::{traffic_router, TrafficState};

/// Error response used by every handler: a status plus `{"detail": ...}`.
pub type ApiError = (StatusCode, Json<Value>);

/// Handler result alias.
pub type ApiResult = Result<Json<Value>, ApiError>;

pub(crate) fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(json!({ "detail": detail.into() })))
}

pub(crate) fn bad_request(detail: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, detail)
}

pub(crate) fn not_found(detail: impl Into<String>) -> ApiError {
    api_error(StatusCode::NOT_FOUND, detail)
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, ApiError> {
    lock.read()
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "State lock poisoned"))
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, ApiError> {
    lock.write()
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "State lock poisoned"))
}

/// Simulated health of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: String,
    pub latency: f64,
    pub error_rate: f64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            latency: 0.1,
            error_rate: 0.0,
        }
    }
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// State types that carry a health record and a display name.
pub trait Simulated: Clone + Send + Sync + 'static {
    /// Human-readable name used in error messages, e.g. `"Grid"`.
    const NAME: &'static str;

    fn health(&self) -> &Arc<RwLock<HealthState>>;
}

/// Apply the configured fault injection before an operational endpoint runs.
///
/// While the service is not healthy, a request fails with probability
/// `error_rate`; otherwise it is delayed by `latency` seconds.
pub(crate) async fn simulate_degradation<S: Simulated>(state: &S) -> Result<(), ApiError> {
    let health = read_lock(state.health())?.clone();
    if health.is_healthy() {
        return Ok(());
    }
    if rand::thread_rng().gen::<f64>() < health.error_rate {
        tracing::error!("{} service temporarily unavailable (simulated error)", S::NAME);
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{} service temporarily unavailable", S::NAME),
        ));
    }
    tokio::time::sleep(Duration::from_secs_f64(health.latency)).await;
    Ok(())
}

/// GET /service/health
pub(crate) async fn get_health<S: Simulated>(State(state): State<S>) -> ApiResult {
    let health = read_lock(state.health())?;
    Ok(Json(json!(*health)))
}

/// POST /service/health?status=&latency=&error_rate=
pub(crate) async fn set_health<S: Simulated>(
    State(state): State<S>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let status = query
        .get("status")
        .cloned()
        .unwrap_or_else(|| "healthy".to_string());
    let latency = parse_query_f64(&query, "latency")?.unwrap_or(0.0);
    let error_rate = parse_query_f64(&query, "error_rate")?.unwrap_or(0.0);

    if !(0.0..=10.0).contains(&latency) {
        return Err(bad_request("latency must be between 0.0 and 10.0"));
    }
    if !(0.0..=1.0).contains(&error_rate) {
        return Err(bad_request("error_rate must be between 0.0 and 1.0"));
    }

    let mut health = write_lock(state.health())?;
    *health = HealthState {
        status,
        latency,
        error_rate,
    };
    tracing::info!(
        "{} health set: status={}, latency={}, error_rate={}",
        S::NAME,
        health.status,
        health.latency,
        health.error_rate
    );
    Ok(Json(json!(*health)))
}

fn parse_query_f64(query: &HashMap<String, String>, key: &str) -> Result<Option<f64>, ApiError> {
    query
        .get(key)
        .map(|raw| {
            raw.parse::<f64>()
                .map_err(|_| bad_request(format!("{} must be a number", key)))
        })
        .transpose()
}

/// Request parameters merged from the query string and an optional JSON body.
///
/// Query values take precedence over body values.
#[derive(Debug, Default, Clone)]
pub(crate) struct Params {
    query: HashMap<String, String>,
    body: Map<String, Value>,
}

impl Params {
    pub(crate) fn new(query: HashMap<String, String>, body: &Bytes) -> Self {
        let body = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
        Self { query, body }
    }

    pub(crate) fn str(&self, key: &str) -> Option<String> {
        if let Some(v) = self.query.get(key) {
            return Some(v.clone());
        }
        match self.body.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// A numeric parameter. A present but non-numeric value is a 400.
    pub(crate) fn f64(&self, key: &str) -> Result<Option<f64>, ApiError> {
        if let Some(raw) = self.query.get(key) {
            return raw
                .parse::<f64>()
                .map(Some)
                .map_err(|_| bad_request(format!("{} must be a number", key)));
        }
        match self.body.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .parse::<f64>()
                .map(Some)
                .map_err(|_| bad_request(format!("{} must be a number", key))),
            Some(_) => Err(bad_request(format!("{} must be a number", key))),
        }
    }
}

/// Decode a JSON request body into an object, treating an empty body as `{}`.
pub(crate) fn body_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(bad_request("Request body must be a JSON object")),
        Err(e) => Err(bad_request(format!("Invalid JSON body: {}", e))),
    }
}

/// Field lookup with an alias, e.g. `capacity` falling back to `capacity_kw`.
pub(crate) fn field<'a>(obj: &'a Value, primary: &str, alias: &str) -> Option<&'a Value> {
    obj.get(primary)
        .filter(|v| !v.is_null())
        .or_else(|| obj.get(alias).filter(|v| !v.is_null()))
}

/// Attach the shared layers to a service router.
pub(crate) fn finish_router(router: Router) -> Router {
    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve a router on `0.0.0.0:{port}` until the process is stopped.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", bind_addr);
    axum::serve(listener, router).await
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_prefer_query() {
        let mut query = HashMap::new();
        query.insert("capacity".to_string(), "0.4".to_string());
        let body = Bytes::from(r#"{"capacity": 0.9, "level": "high"}"#);
        let params = Params::new(query, &body);
        assert_eq!(params.f64("capacity").unwrap(), Some(0.4));
        assert_eq!(params.str("level").as_deref(), Some("high"));
        assert_eq!(params.str("missing"), None);
    }

    #[test]
    fn test_params_reject_non_numeric() {
        let body = Bytes::from(r#"{"capacity": "lots"}"#);
        let params = Params::new(HashMap::new(), &body);
        let err = params.f64("capacity").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_field_alias() {
        let obj = json!({"capacity_kw": 900});
        assert_eq!(field(&obj, "capacity", "capacity_kw"), Some(&json!(900)));
        assert_eq!(field(&obj, "load", "current_load"), None);
    }

    #[test]
    fn test_body_object_empty_is_ok() {
        assert!(body_object(&Bytes::new()).unwrap().is_empty());
        assert!(body_object(&Bytes::from("[1,2]")).is_err());
    }
}
