//! Metric calculators. Each maps an [`EvaluationState`] to a score in `[0, 1]`.

use super::state::EvaluationState;

pub type Calculator = fn(&EvaluationState) -> f64;

const ACTIVE_DRONE: [&str; 3] = ["assigned", "en_route", "on_site"];

/// Look up a calculator by name.
pub fn calculator(name: &str) -> Option<Calculator> {
    let calc: Calculator = match name {
        "grid_stability" => grid_stability,
        "power_conservation" => power_conservation,
        "critical_infrastructure" => critical_infrastructure,
        "incident_response" => incident_response,
        "incident_resolution" => incident_resolution,
        "drone_utilization" => drone_utilization,
        "response_time" => response_time,
        "traffic_flow" => traffic_flow,
        "emergency_routing" => emergency_routing,
        "congestion_management" => congestion_management,
        "overall_coordination" => overall_coordination,
        "resource_efficiency" => resource_efficiency,
        _ => return None,
    };
    Some(calc)
}

/// Names of every known calculator.
pub const CALCULATORS: [&str; 12] = [
    "grid_stability",
    "power_conservation",
    "critical_infrastructure",
    "incident_response",
    "incident_resolution",
    "drone_utilization",
    "response_time",
    "traffic_flow",
    "emergency_routing",
    "congestion_management",
    "overall_coordination",
    "resource_efficiency",
];

/// Mean stability, critical zones counting double.
pub fn grid_stability(state: &EvaluationState) -> f64 {
    if state.zones.is_empty() {
        return 0.0;
    }
    let (total, weight) = state.zones.values().fold((0.0, 0.0), |(total, weight), zone| {
        let w = if zone.is_critical { 2.0 } else { 1.0 };
        (total + zone.stability * w, weight + w)
    });
    total / weight
}

/// Load efficiency: best between 60% and 85% utilisation.
pub fn power_conservation(state: &EvaluationState) -> f64 {
    if state.zones.is_empty() {
        return 0.0;
    }
    let capacity: f64 = state.zones.values().map(|z| z.capacity_kw).sum();
    let load: f64 = state.zones.values().map(|z| z.current_load_kw).sum();
    if capacity == 0.0 {
        return 0.0;
    }
    let r = load / capacity;
    let score = if r <= 0.6 {
        0.6 + (0.6 - r) * 0.5
    } else if r <= 0.85 {
        0.9 + (0.85 - r) * 0.4
    } else if r <= 0.95 {
        0.9 - (r - 0.85) * 3.0
    } else {
        (0.6 - (r - 0.95) * 6.0).max(0.0)
    };
    score.clamp(0.0, 1.0)
}

pub fn critical_infrastructure(state: &EvaluationState) -> f64 {
    if state.zones.is_empty() {
        return 0.0;
    }
    let critical: Vec<_> = state.critical_zones().collect();
    let zone_stability = if critical.is_empty() {
        0.8
    } else {
        critical.iter().map(|z| z.stability).sum::<f64>() / critical.len() as f64
    };

    let priority_score = if state.infrastructure.is_empty() {
        0.5
    } else {
        let critical_count = state.infrastructure.values().filter(|l| *l == "critical").count() as f64;
        let high_count = state.infrastructure.values().filter(|l| *l == "high").count() as f64;
        (critical_count + high_count * 0.7) / state.infrastructure.len() as f64
    };

    let mut emergency_impact = 1.0;
    if !state.incidents.is_empty() {
        let unresolved = state
            .incidents
            .iter()
            .filter(|i| {
                i.zone
                    .as_deref()
                    .is_some_and(|zone| critical.iter().any(|z| z.zone_id == zone))
                    && matches!(i.status.as_str(), "active" | "assigned")
            })
            .count();
        if unresolved > 0 {
            let ratio = unresolved as f64 / state.incidents.len() as f64;
            emergency_impact = (1.0 - ratio * 0.4).max(0.5);
        }
    }

    zone_stability * 0.4 + priority_score * 0.4 + emergency_impact * 0.2
}

pub fn incident_response(state: &EvaluationState) -> f64 {
    if state.incidents.is_empty() {
        return 1.0;
    }
    let n = state.incidents.len() as f64;
    let assigned = state.incidents.iter().filter(|i| i.assigned_drone.is_some()).count() as f64;
    let in_progress = state.incidents_in(&["in_progress"]) as f64;
    let penalty = state.blocked_ratio() * 0.1;
    (assigned / n + in_progress / n * 0.2 - penalty).clamp(0.0, 1.0)
}

pub fn incident_resolution(state: &EvaluationState) -> f64 {
    if state.incidents.is_empty() {
        return 1.0;
    }
    let resolved = state.incidents_in(&["resolved"]) as f64;
    let in_progress = state.incidents_in(&["in_progress"]) as f64;
    (resolved + in_progress * 0.5) / state.incidents.len() as f64
}

fn utilization(state: &EvaluationState) -> Option<f64> {
    let active = state
        .drones
        .iter()
        .filter(|d| ACTIVE_DRONE.contains(&d.status.as_str()))
        .count();
    let available = state.drones.iter().filter(|d| d.status != "disabled").count();
    (available > 0).then(|| active as f64 / available as f64)
}

pub fn drone_utilization(state: &EvaluationState) -> f64 {
    utilization(state).unwrap_or(0.0)
}

pub fn response_time(state: &EvaluationState) -> f64 {
    if state.incidents.is_empty() {
        return 1.0;
    }
    if !state.incidents.iter().any(|i| i.assigned_drone.is_some()) {
        return 0.0;
    }
    if state.traffic.is_empty() {
        0.8
    } else {
        (0.8 - state.avg_congestion() * 0.3).max(0.2)
    }
}

pub fn traffic_flow(state: &EvaluationState) -> f64 {
    if state.traffic.is_empty() {
        return 0.7;
    }
    let total: f64 = state
        .traffic
        .values()
        .map(|s| {
            if s.is_blocked {
                0.1
            } else {
                (1.0 - s.congestion_level.powf(1.5)).max(0.1)
            }
        })
        .sum();
    let mut score = total / state.traffic.len() as f64;
    if state.incidents_in(&["assigned", "in_progress"]) > 0 {
        score += (score * 0.2).min(0.1);
    }
    score.min(1.0)
}

pub fn emergency_routing(state: &EvaluationState) -> f64 {
    if state.traffic.is_empty() {
        return 0.5;
    }
    if state.incidents.is_empty() {
        return 0.9;
    }
    let mut score = (1.0 - state.avg_congestion() * 0.8).max(0.2);
    score = (score - state.blocked_ratio() * 0.3).max(0.1);
    let active = state.incidents_in(&["assigned", "in_progress"]);
    if active > 0 {
        score += active as f64 / state.incidents.len() as f64 * 0.2;
    }
    score.min(1.0)
}

pub fn congestion_management(state: &EvaluationState) -> f64 {
    if state.traffic.is_empty() {
        return 0.5;
    }
    let total: f64 = state
        .traffic
        .values()
        .map(|s| match s.congestion_level {
            c if c <= 0.2 => 1.0,
            c if c <= 0.4 => 0.8,
            c if c <= 0.6 => 0.6,
            c if c <= 0.8 => 0.3,
            _ => 0.0,
        })
        .sum();
    let mut score = total / state.traffic.len() as f64;
    if !state.incidents.is_empty() {
        let active = state.incidents_in(&["active", "assigned", "in_progress"]);
        if active > 0 {
            score += (active as f64 / state.incidents.len() as f64 * 0.15).min(0.1);
        }
    }
    score.min(1.0)
}

pub fn overall_coordination(state: &EvaluationState) -> f64 {
    let mut factors = Vec::with_capacity(3);

    if !state.zones.is_empty() && !state.incidents.is_empty() {
        let critical: Vec<_> = state.critical_zones().collect();
        if critical.is_empty() {
            factors.push(0.7);
        } else {
            let hit: Vec<_> = critical
                .iter()
                .filter(|z| state.incidents.iter().any(|i| i.zone.as_deref() == Some(z.zone_id.as_str())))
                .collect();
            if hit.is_empty() {
                factors.push(0.9);
            } else {
                factors.push(hit.iter().map(|z| z.stability).sum::<f64>() / hit.len() as f64);
            }
        }
    }

    if !state.traffic.is_empty() && !state.incidents.is_empty() {
        if state.incidents_in(&["assigned", "in_progress"]) > 0 {
            factors.push((1.0 - state.avg_congestion() * 0.7).max(0.3));
        } else {
            factors.push(0.8);
        }
    }

    if !state.zones.is_empty() && !state.traffic.is_empty() {
        let stability = state.zones.values().map(|z| z.stability).sum::<f64>() / state.zones.len() as f64;
        factors.push(stability * 0.6 + (1.0 - state.avg_congestion()) * 0.4);
    }

    if factors.is_empty() {
        return 0.5;
    }
    factors.iter().sum::<f64>() / factors.len() as f64
}

pub fn resource_efficiency(state: &EvaluationState) -> f64 {
    let mut factors = Vec::with_capacity(3);
    if let Some(u) = utilization(state) {
        let drone_efficiency = if u <= 0.7 {
            u / 0.7 * 0.8
        } else if u <= 0.9 {
            0.8 + (u - 0.7)
        } else {
            (1.0 - (u - 0.9) * 2.0).max(0.7)
        };
        factors.push(drone_efficiency);
    }
    factors.push(power_conservation(state));
    factors.push(traffic_flow(state));
    factors.iter().sum::<f64>() / factors.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: serde_json::Value) -> EvaluationState {
        EvaluationState::from_value(&value)
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_grid_stability_weights_critical_zones() {
        let s = state(json!({"zones": {
            "Z1": {"stability": 0.4, "is_critical": true},
            "Z2": {"stability": 1.0}
        }}));
        approx(grid_stability(&s), (0.8 + 1.0) / 3.0);
        approx(grid_stability(&EvaluationState::default()), 0.0);
    }

    #[test]
    fn test_power_conservation_bands() {
        let at = |load: f64| {
            power_conservation(&state(json!({"zones": {"Z1": {"capacity_kw": 100.0, "current_load_kw": load}}})))
        };
        approx(at(50.0), 0.65);
        approx(at(75.0), 0.94);
        approx(at(90.0), 0.75);
        approx(at(100.0), 0.3);
        approx(at(150.0), 0.0);
        approx(
            power_conservation(&state(json!({"zones": {"Z1": {"capacity_kw": 0.0}}}))),
            0.0,
        );
    }

    #[test]
    fn test_critical_infrastructure_combines_factors() {
        let s = state(json!({
            "zones": {"Z1": {"stability": 0.5, "is_critical": true}},
            "infrastructure": {"hospital": {"level": "critical"}, "school": {"level": "high"}},
            "incidents": [{"id": "E1", "zone": "Z1", "status": "active"}, {"id": "E2", "status": "resolved"}]
        }));
        let expected = 0.5 * 0.4 + (1.7 / 2.0) * 0.4 + (1.0 - 0.5 * 0.4) * 0.2;
        approx(critical_infrastructure(&s), expected);
    }

    #[test]
    fn test_incident_metrics() {
        let s = state(json!({
            "incidents": [
                {"id": "E1", "assigned_drone": "D1", "status": "in_progress"},
                {"id": "E2", "status": "resolved"},
                {"id": "E3", "status": "active"},
                {"id": "E4", "status": "active"}
            ],
            "traffic": {"S1": {"congestion_level": 0.5, "is_blocked": true}, "S2": {"congestion_level": 0.5}}
        }));
        approx(incident_response(&s), 0.25 + 0.05 - 0.05);
        approx(incident_resolution(&s), 1.5 / 4.0);
        approx(response_time(&s), 0.8 - 0.15);
        approx(incident_response(&EvaluationState::default()), 1.0);
    }

    #[test]
    fn test_drone_utilization_ignores_disabled() {
        let s = state(json!({"drones": [
            {"id": "D1", "status": "en_route"},
            {"id": "D2", "status": "available"},
            {"id": "D3", "status": "disabled"}
        ]}));
        approx(drone_utilization(&s), 0.5);
    }

    #[test]
    fn test_traffic_metrics() {
        let s = state(json!({
            "traffic": {"S1": {"congestion_level": 0.0}, "S2": {"congestion_level": 0.9, "is_blocked": true}},
            "incidents": [{"id": "E1", "status": "assigned"}]
        }));
        approx(traffic_flow(&s), 0.55 + 0.1);
        approx(emergency_routing(&s), (1.0 - 0.45 * 0.8) - 0.15 + 0.2);
        approx(congestion_management(&s), 0.5 + 0.1);
        approx(traffic_flow(&EvaluationState::default()), 0.7);
        approx(emergency_routing(&EvaluationState::default()), 0.5);
    }

    #[test]
    fn test_coordination_and_efficiency() {
        approx(overall_coordination(&EvaluationState::default()), 0.5);
        let s = state(json!({
            "zones": {"Z1": {"stability": 0.6, "is_critical": true}},
            "incidents": [{"id": "E1", "zone": "Z1", "status": "assigned"}],
            "traffic": {"S1": {"congestion_level": 0.5}}
        }));
        let expected = (0.6 + (1.0 - 0.35) + (0.36 + 0.2)) / 3.0;
        approx(overall_coordination(&s), expected);

        let empty = EvaluationState::default();
        approx(resource_efficiency(&empty), (0.0 + 0.7) / 2.0);
    }

    #[test]
    fn test_every_name_resolves() {
        for name in CALCULATORS {
            assert!(calculator(name).is_some(), "{}", name);
        }
        assert!(calculator("security").is_none());
    }
}
