//! Command evaluator.
//!
//! Scores a batch of agent commands against a [`ScenarioEvaluation`]: the
//! metric calculators measure the resulting city state, each command is
//! matched against the expert commands or given an estimated impact, and
//! the two are blended into an overall score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::as_number;
use crate::models::ScenarioDefinition;
use crate::scenarios::{CommandImpact, MetricDefinition, MetricType, ScenarioEvaluation, ScenarioType};

pub mod calculators;
pub mod state;

pub use calculators::{calculator, Calculator, CALCULATORS};
pub use state::EvaluationState;

/// Share of the overall score driven by metric progress.
pub const METRIC_SHARE: f64 = 0.85;
/// Share driven by matching expert commands.
pub const OPTIMAL_SHARE: f64 = 0.15;

/// Progress of one metric towards its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricProgress {
    pub current: f64,
    pub target: Value,
    pub achieved: bool,
    pub progress: f64,
}

/// Estimated effect of a command that matched no expert command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub affected_metrics: Vec<String>,
    pub expected_impact: BTreeMap<String, f64>,
    pub relevance_score: f64,
}

/// How one command was judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAssessment {
    pub command: Value,
    pub optimal_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<CommandImpact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_analysis: Option<ImpactAnalysis>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalMatch {
    pub optimal: Value,
    pub executed: Option<Value>,
    #[serde(rename = "match")]
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalComparison {
    pub matches: Vec<OptimalMatch>,
    pub match_count: usize,
    pub total_optimal: usize,
    pub score: f64,
}

/// Full evaluation of a command batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub current_metrics: BTreeMap<String, f64>,
    pub command_impacts: Vec<CommandAssessment>,
    pub metric_progress: BTreeMap<String, MetricProgress>,
    pub optimal_comparison: OptimalComparison,
    pub overall_score: f64,
}

fn parameters(command: &Value) -> Option<&Map<String, Value>> {
    command.get("parameters").and_then(Value::as_object)
}

fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

/// Whether an executed command counts as the expert command `expected`.
///
/// Service and action must be equal. If either side carries no parameters
/// the commands match; otherwise every shared key must agree, numbers
/// within 20% and everything else case-insensitively.
pub fn commands_match(executed: &Value, expected: &Value) -> bool {
    if executed.get("service") != expected.get("service") || executed.get("action") != expected.get("action") {
        return false;
    }
    let (actual, wanted) = match (parameters(executed), parameters(expected)) {
        (Some(a), Some(w)) if !a.is_empty() && !w.is_empty() => (a, w),
        _ => return true,
    };
    wanted.iter().all(|(key, want)| match actual.get(key) {
        None => true,
        Some(have) => match (have, want) {
            (Value::Number(_), Value::Number(_)) => {
                let (a, b) = (as_number(have).unwrap_or(0.0), as_number(want).unwrap_or(0.0));
                (a - b).abs() / b.abs().max(0.1) <= 0.2
            }
            _ => loose_string(have) == loose_string(want),
        },
    })
}

/// Impacts and relevance for a specific action, as `(metric, impact)` overrides.
fn action_profile(action: &str) -> Option<(&'static [(&'static str, f64)], f64)> {
    let profile: (&'static [(&'static str, f64)], f64) = match action {
        "adjust_zone" => (&[("grid_stability", 0.25), ("power_conservation", 0.3)], 0.95),
        "set_priority" => (&[("critical_infrastructure", 0.35), ("grid_stability", 0.2)], 0.9),
        "assign_drone" => (
            &[("incident_response", 0.35), ("response_time", 0.25), ("drone_utilization", 0.4)],
            0.98,
        ),
        "update_incident" => (&[("incident_response", 0.25), ("incident_resolution", 0.3)], 0.85),
        "redirect" => (
            &[("traffic_flow", 0.3), ("emergency_routing", 0.25), ("congestion_management", 0.35)],
            0.95,
        ),
        "block_route" => (&[("emergency_routing", 0.3), ("congestion_management", 0.25)], 0.8),
        _ => return None,
    };
    Some(profile)
}

/// Evaluates commands against one scenario configuration.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    config: ScenarioEvaluation,
}

impl CommandEvaluator {
    pub fn new(config: ScenarioEvaluation) -> Self {
        tracing::debug!("CommandEvaluator initialized with config: {}", config.name);
        Self { config }
    }

    pub fn config(&self) -> &ScenarioEvaluation {
        &self.config
    }

    pub fn evaluate_commands(&self, commands: &[Value], state: &EvaluationState) -> EvaluationReport {
        tracing::debug!("Evaluating {} commands", commands.len());
        let current_metrics = self.current_metrics(state);
        let command_impacts = commands.iter().map(|cmd| self.assess(cmd)).collect();
        let metric_progress = self.metric_progress(&current_metrics);
        let optimal_comparison = self.compare_with_optimal(commands);
        let overall_score = self.overall_score(&metric_progress, &optimal_comparison);
        tracing::info!("Evaluation complete - Overall score: {:.2}", overall_score);

        EvaluationReport {
            current_metrics,
            command_impacts,
            metric_progress,
            optimal_comparison,
            overall_score,
        }
    }

    /// Current value of every configured metric. Unknown calculators yield 0.
    pub fn current_metrics(&self, state: &EvaluationState) -> BTreeMap<String, f64> {
        self.config
            .metrics
            .iter()
            .map(|metric| {
                let value = match calculator(&metric.calculation) {
                    Some(calc) => {
                        let value = calc(state);
                        tracing::debug!(
                            "Metric {}: {:.3} (target: {})",
                            metric.name,
                            value,
                            metric.target
                        );
                        value
                    }
                    None => {
                        tracing::warn!("No calculator found for metric: {}", metric.name);
                        0.0
                    }
                };
                (metric.name.clone(), value)
            })
            .collect()
    }

    pub fn metric_progress(&self, current: &BTreeMap<String, f64>) -> BTreeMap<String, MetricProgress> {
        let mut progress = BTreeMap::new();
        for metric in &self.config.metrics {
            let value = current.get(&metric.name).copied().unwrap_or(0.0);
            let entry = match metric.metric_type {
                MetricType::Threshold => {
                    let target = metric.target_value();
                    MetricProgress {
                        current: value,
                        target: metric.target.clone(),
                        achieved: value >= target,
                        progress: if target != 0.0 { (value / target).min(1.0) } else { 0.0 },
                    }
                }
                MetricType::Range => {
                    let in_range = metric
                        .target_range()
                        .is_some_and(|(min, max)| (min..=max).contains(&value));
                    MetricProgress {
                        current: value,
                        target: metric.target.clone(),
                        achieved: in_range,
                        progress: if in_range { 1.0 } else { 0.0 },
                    }
                }
                MetricType::Trend | MetricType::Comparison => continue,
            };
            progress.insert(metric.name.clone(), entry);
        }
        progress
    }

    pub fn compare_with_optimal(&self, commands: &[Value]) -> OptimalComparison {
        let matches: Vec<OptimalMatch> = self
            .config
            .optimal_commands
            .iter()
            .map(|optimal| {
                let executed = commands.iter().find(|cmd| commands_match(cmd, &optimal.command));
                OptimalMatch {
                    optimal: optimal.command.clone(),
                    executed: executed.cloned(),
                    matched: executed.is_some(),
                }
            })
            .collect();
        let match_count = matches.iter().filter(|m| m.matched).count();
        let total_optimal = matches.len();
        OptimalComparison {
            matches,
            match_count,
            total_optimal,
            score: if total_optimal > 0 {
                match_count as f64 / total_optimal as f64
            } else {
                0.0
            },
        }
    }

    /// `0.85 × weighted metric progress + 0.15 × optimal match score`.
    pub fn overall_score(&self, progress: &BTreeMap<String, MetricProgress>, optimal: &OptimalComparison) -> f64 {
        let (mut score, mut weight) = (0.0, 0.0);
        for metric in &self.config.metrics {
            if let Some(p) = progress.get(&metric.name) {
                score += p.progress * metric.weight;
                weight += metric.weight;
            }
        }
        if weight > 0.0 {
            score /= weight;
        }
        METRIC_SHARE * score + OPTIMAL_SHARE * optimal.score
    }

    fn assess(&self, command: &Value) -> CommandAssessment {
        if let Some(optimal) = self
            .config
            .optimal_commands
            .iter()
            .find(|opt| commands_match(command, &opt.command))
        {
            let service = command.get("service").and_then(Value::as_str).unwrap_or("unknown");
            let action = command.get("action").and_then(Value::as_str).unwrap_or("unknown");
            tracing::info!("Command {}.{} matches optimal command", service, action);
            return CommandAssessment {
                command: command.clone(),
                optimal_match: true,
                matched: Some(optimal.clone()),
                impact_analysis: None,
                score: 1.0,
            };
        }
        let analysis = self.analyze_command_impact(command);
        CommandAssessment {
            command: command.clone(),
            optimal_match: false,
            matched: None,
            score: analysis.relevance_score,
            impact_analysis: Some(analysis),
        }
    }

    /// Estimate a command's effect on the metrics of its service.
    pub fn analyze_command_impact(&self, command: &Value) -> ImpactAnalysis {
        let service = command.get("service").and_then(Value::as_str).unwrap_or("");
        let action = command.get("action").and_then(Value::as_str).unwrap_or("");
        let service_metrics: Vec<String> = self
            .config
            .metrics
            .iter()
            .filter(|m| m.service == service)
            .map(|m| m.name.clone())
            .collect();

        let mut expected_impact: BTreeMap<String, f64> =
            service_metrics.iter().map(|m| (m.clone(), 0.15)).collect();
        let mut relevance_score = 0.75;

        if let Some((overrides, relevance)) = action_profile(action) {
            let service_ok = crate::command::ServiceType::ALL
                .iter()
                .any(|s| s.as_str() == service && s.allows(action));
            if service_ok {
                for (metric, impact) in overrides {
                    if let Some(slot) = expected_impact.get_mut(*metric) {
                        *slot = *impact;
                    }
                }
                relevance_score = relevance;
            }
        }

        ImpactAnalysis {
            affected_metrics: service_metrics,
            expected_impact,
            relevance_score,
        }
    }
}

fn infer_service(metric: &str) -> &'static str {
    let has = |words: &[&str]| words.iter().any(|w| metric.contains(w));
    if has(&["grid", "power", "stability"]) {
        "grid"
    } else if has(&["incident", "emergency", "drone"]) {
        "emergency"
    } else if has(&["traffic", "routing", "congestion"]) {
        "traffic"
    } else {
        "system"
    }
}

impl ScenarioEvaluation {
    /// Build an evaluation from a scenario's success criteria.
    ///
    /// Every criterion becomes a threshold metric weighted by its service's
    /// command weight; expert commands impact the metrics of their service.
    pub fn from_definition(definition: &ScenarioDefinition, constraints: Map<String, Value>) -> Self {
        let metrics: Vec<MetricDefinition> = definition
            .success_criteria
            .metrics
            .iter()
            .map(|(name, target)| {
                let service = infer_service(name);
                let weight = if service == "system" {
                    0.2
                } else {
                    definition.command_weights.get(service).copied().unwrap_or(1.0)
                };
                MetricDefinition::threshold(
                    name,
                    &format!("Evaluation of {} for {}", name, definition.name),
                    *target,
                    weight,
                    service,
                )
            })
            .collect();

        let optimal_commands = definition
            .optimal_commands
            .iter()
            .filter_map(|command| {
                let service = command.get("service").and_then(Value::as_str).unwrap_or("unknown");
                let affected: Vec<&MetricDefinition> = metrics
                    .iter()
                    .filter(|m| {
                        m.service == service
                            || (service == "grid" && m.name.contains("grid"))
                            || (service == "emergency" && (m.name.contains("incident") || m.name.contains("emergency")))
                            || (service == "traffic" && (m.name.contains("traffic") || m.name.contains("routing")))
                    })
                    .collect();
                (!affected.is_empty()).then(|| CommandImpact {
                    command: command.clone(),
                    affected_metrics: affected.iter().map(|m| m.name.clone()).collect(),
                    expected_impact: affected
                        .iter()
                        .map(|m| (m.name.clone(), (m.weight * 0.5).min(0.3)))
                        .collect(),
                })
            })
            .collect();

        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            metrics,
            optimal_commands,
            time_limit: definition.success_criteria.time_limit,
            constraints,
        }
    }

    /// Generic evaluation for a scenario type without a definition.
    pub fn for_type(scenario_type: ScenarioType, constraints: Map<String, Value>) -> Self {
        let metrics = match scenario_type {
            ScenarioType::GridSurge => vec![
                MetricDefinition::threshold("grid_stability", "Overall grid stability during crisis", 0.7, 0.3, "grid"),
                MetricDefinition::threshold(
                    "incident_response",
                    "Emergency incident response effectiveness",
                    0.8,
                    0.4,
                    "emergency",
                ),
                MetricDefinition::threshold("traffic_flow", "Maintaining traffic flow during crisis", 0.6, 0.3, "traffic"),
            ],
            ScenarioType::MedicalEmergency => vec![
                MetricDefinition::threshold("incident_response", "Response to medical incidents", 0.9, 0.5, "emergency"),
                MetricDefinition::threshold("emergency_routing", "Clear routes for medical response", 0.8, 0.5, "traffic"),
            ],
            _ => vec![MetricDefinition::threshold(
                "overall_coordination",
                "General system coordination",
                0.7,
                1.0,
                "system",
            )],
        };
        Self {
            name: format!("{} Scenario", scenario_type),
            description: format!("Evaluation for {}", scenario_type),
            metrics,
            optimal_commands: Vec::new(),
            time_limit: None,
            constraints,
        }
    }
}

/// Evaluate commands for a scenario, preferring its definition when given.
pub fn evaluate_scenario_commands(
    commands: &[Value],
    scenario_type: ScenarioType,
    definition: Option<&ScenarioDefinition>,
    constraints: Option<Map<String, Value>>,
    current_state: &Value,
) -> EvaluationReport {
    let constraints = constraints.unwrap_or_default();
    let config = match definition {
        Some(def) => ScenarioEvaluation::from_definition(def, constraints),
        None => ScenarioEvaluation::for_type(scenario_type, constraints),
    };
    let state = EvaluationState::from_value(current_state);
    CommandEvaluator::new(config).evaluate_commands(commands, &state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{heat_wave_evaluation, workshop_scenarios, ActualIds};
    use serde_json::json;

    fn cmd(service: &str, action: &str, params: Value) -> Value {
        json!({"service": service, "action": action, "parameters": params})
    }

    #[test]
    fn test_commands_match_tolerances() {
        let optimal = cmd("grid", "adjust_zone", json!({"zone_id": "zone_a", "capacity": 0.8}));
        assert!(commands_match(&cmd("grid", "adjust_zone", json!({"zone_id": "ZONE_A", "capacity": 0.75})), &optimal));
        assert!(!commands_match(&cmd("grid", "adjust_zone", json!({"zone_id": "zone_a", "capacity": 0.5})), &optimal));
        assert!(!commands_match(&cmd("grid", "adjust_zone", json!({"zone_id": "zone_b", "capacity": 0.8})), &optimal));
        assert!(commands_match(&cmd("grid", "adjust_zone", json!({})), &optimal));
        assert!(!commands_match(&cmd("grid", "set_priority", json!({})), &optimal));
    }

    #[test]
    fn test_heat_wave_evaluation_scores() {
        let evaluator = CommandEvaluator::new(heat_wave_evaluation());
        let commands = vec![
            cmd("grid", "adjust_zone", json!({"zone_id": "zone_a", "capacity": 0.75})),
            cmd("grid", "set_priority", json!({"infrastructure_id": "hospital", "level": "critical"})),
            cmd("emergency", "assign_drone", json!({"drone_id": "drone_1", "incident_id": "incident_1"})),
        ];
        let state = EvaluationState::from_value(&json!({
            "zones": {
                "zone_a": {"stability": 0.7, "capacity": 1.0, "current_load": 0.8},
                "zone_b": {"stability": 0.6, "capacity": 1.0, "current_load": 0.7}
            },
            "incidents": [{"id": "incident_1"}, {"id": "incident_2"}],
            "traffic": {"zone_a": {"congestion": 0.8}, "zone_b": {"congestion": 0.5}}
        }));
        let report = evaluator.evaluate_commands(&commands, &state);

        assert!((report.current_metrics["grid_stability"] - 0.65).abs() < 1e-9);
        assert_eq!(report.current_metrics["incident_response"], 0.0);
        assert_eq!(report.optimal_comparison.match_count, 2);
        assert!(report.command_impacts[0].optimal_match);
        let analysis = report.command_impacts[1].impact_analysis.as_ref().unwrap();
        assert_eq!(analysis.relevance_score, 0.9);
        assert_eq!(analysis.expected_impact["grid_stability"], 0.2);
        assert_eq!(analysis.expected_impact["power_conservation"], 0.15);

        let progress = &report.metric_progress;
        assert!(progress["power_conservation"].achieved);
        let metric = (progress["grid_stability"].progress * 0.4 + 1.0 * 0.3 + 0.0) / 1.0;
        let expected = 0.85 * metric + 0.15 * (2.0 / 3.0);
        assert!((report.overall_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_calculator_yields_zero() {
        let def = &workshop_scenarios(&ActualIds::default())["festival"];
        let config = ScenarioEvaluation::from_definition(def, Map::new());
        let crowd = config.metrics.iter().find(|m| m.name == "crowd_safety").unwrap();
        assert_eq!(crowd.service, "system");
        assert_eq!(crowd.weight, 0.2);
        let incident = config.metrics.iter().find(|m| m.name == "incident_response").unwrap();
        assert_eq!(incident.weight, 0.7);

        let metrics = CommandEvaluator::new(config).current_metrics(&EvaluationState::default());
        assert_eq!(metrics["crowd_safety"], 0.0);
        assert_eq!(metrics["incident_response"], 1.0);
    }

    #[test]
    fn test_definition_optimal_commands_get_impacts() {
        let mut def = workshop_scenarios(&ActualIds::default())["heat_wave"].clone();
        def.optimal_commands = vec![cmd("grid", "adjust_zone", json!({"zone_id": "Z001", "capacity": 0.8}))];
        let config = ScenarioEvaluation::from_definition(&def, Map::new());
        let impact = &config.optimal_commands[0];
        assert_eq!(impact.affected_metrics, vec!["grid_stability"]);
        assert_eq!(impact.expected_impact["grid_stability"], 0.25);
    }

    #[test]
    fn test_fallback_configs_by_type() {
        let report = evaluate_scenario_commands(
            &[],
            ScenarioType::MedicalEmergency,
            None,
            None,
            &json!({}),
        );
        assert_eq!(report.current_metrics.len(), 2);
        assert_eq!(report.optimal_comparison.score, 0.0);
        assert_eq!(report.current_metrics["emergency_routing"], 0.5);

        let drill = ScenarioEvaluation::for_type(ScenarioType::CityWideDrill, Map::new());
        assert_eq!(drill.metrics[0].name, "overall_coordination");
        assert_eq!(drill.name, "city_wide_drill Scenario");
    }

    #[test]
    fn test_range_progress() {
        let mut config = heat_wave_evaluation();
        config.metrics[0].metric_type = MetricType::Range;
        config.metrics[0].target = json!([0.5, 0.9]);
        let evaluator = CommandEvaluator::new(config);
        let current: BTreeMap<String, f64> = [("grid_stability".to_string(), 0.6)].into();
        let progress = evaluator.metric_progress(&current);
        assert_eq!(progress["grid_stability"].progress, 1.0);
        assert!(!progress["incident_response"].achieved);
    }
}
