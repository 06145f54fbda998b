//! Multi-dimensional evaluation of agent runs.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::LlmJudge;
use crate::agent::ScenarioResult;
use crate::command::{Command, CommandResult, ServiceType};
use crate::evaluator::evaluate_scenario_commands;
use crate::models::ScenarioDefinition;
use crate::scenarios::ScenarioType;

/// Response time at which the response-time component reaches zero.
const RESPONSE_TIME_CEILING_MS: f64 = 10_000.0;
const DEFAULT_ADAPTABILITY: f64 = 0.7;
const DEFAULT_SATISFACTION: f64 = 0.75;

/// Scores of one evaluated run. Everything but `response_time_ms` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub decision_quality: f64,
    pub response_time_ms: f64,
    pub execution_efficiency: f64,
    pub adaptability_score: f64,
    pub coordination_quality: f64,
    pub user_satisfaction: f64,
}

impl EvaluationMetrics {
    /// Response time mapped to `[0, 1]`, higher is faster.
    pub fn normalized_response_time(&self) -> f64 {
        (1.0 - self.response_time_ms / RESPONSE_TIME_CEILING_MS).max(0.0)
    }

    pub fn overall_score(&self) -> f64 {
        0.3 * self.decision_quality
            + 0.15 * self.normalized_response_time()
            + 0.15 * self.execution_efficiency
            + 0.2 * self.adaptability_score
            + 0.15 * self.coordination_quality
            + 0.05 * self.user_satisfaction
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    pub scenario: String,
    pub metrics: EvaluationMetrics,
    pub commands_count: usize,
}

fn services_used(commands: &[Command]) -> HashSet<ServiceType> {
    commands.iter().map(|c| c.service).collect()
}

/// Drone usage relative to the fleet: the share of available drones that
/// were assigned, capped at 1. 0.5 when the fleet size is unknown.
pub fn resource_efficiency(commands: &[Command], available_drones: usize) -> f64 {
    if commands.is_empty() {
        return 0.0;
    }
    if available_drones == 0 {
        return 0.5;
    }
    let assignments = commands.iter().filter(|c| c.action == "assign_drone").count();
    (assignments as f64 / available_drones as f64).min(1.0)
}

/// Rule-based quality of a command set: service coverage, ordering and
/// resource use.
pub fn decision_patterns(commands: &[Command], available_drones: usize) -> f64 {
    if commands.is_empty() {
        return 0.0;
    }
    let used = services_used(commands);
    let coverage = used.len() as f64 / ServiceType::ALL.len() as f64;
    let sequence = if used.contains(&ServiceType::Grid) && used.contains(&ServiceType::Emergency) {
        0.8
    } else {
        0.5
    };
    coverage * 0.4 + sequence * 0.3 + resource_efficiency(commands, available_drones) * 0.3
}

/// Conflicts between commands over the same resource: a drone assigned
/// twice scores 0.2, a zone adjusted twice 0.3, otherwise 0.8.
pub fn resource_coordination(commands: &[Command]) -> f64 {
    if commands.is_empty() {
        return 0.0;
    }
    let conflict = |action: &str, key: &str| {
        let mut seen = HashSet::new();
        commands
            .iter()
            .filter(|c| c.action == action)
            .filter_map(|c| c.param_str(key))
            .any(|id| !seen.insert(id))
    };
    if conflict("assign_drone", "drone_id") {
        0.2
    } else if conflict("adjust_zone", "zone_id") {
        0.3
    } else {
        0.8
    }
}

/// Coordination across several agents' command sets. A single agent has
/// nothing to coordinate with and scores 0.5.
pub fn coordination_quality(agent_commands: &[Vec<Command>]) -> f64 {
    if agent_commands.len() < 2 {
        return 0.5;
    }
    let all: Vec<Command> = agent_commands.iter().flatten().cloned().collect();
    if all.is_empty() {
        return 0.0;
    }
    let balance = services_used(&all).len() as f64 / ServiceType::ALL.len() as f64;
    (balance * 0.6 + resource_coordination(&all) * 0.4).min(1.0)
}

/// Success rate of executed commands blended with their resource use.
pub fn execution_efficiency(results: &[CommandResult], available_drones: usize) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let succeeded = results.iter().filter(|r| r.is_successful()).count();
    let commands: Vec<Command> = results.iter().map(|r| r.command.clone()).collect();
    let success_rate = succeeded as f64 / results.len() as f64;
    success_rate * 0.7 + resource_efficiency(&commands, available_drones) * 0.3
}

/// Run `task` and report how long it took in milliseconds.
pub async fn measure_response_time<F: Future>(task: F) -> (F::Output, f64) {
    let start = Instant::now();
    let output = task.await;
    (output, start.elapsed().as_secs_f64() * 1000.0)
}

/// Combines the judge with rule-based analysis and keeps a history.
#[derive(Debug)]
pub struct EvaluationFramework {
    judge: LlmJudge,
    history: Vec<EvaluationRecord>,
}

impl EvaluationFramework {
    pub fn new(judge: LlmJudge) -> Self {
        Self {
            judge,
            history: Vec::new(),
        }
    }

    pub fn judge(&self) -> &LlmJudge {
        &self.judge
    }

    pub fn history(&self) -> &[EvaluationRecord] {
        &self.history
    }

    /// Overall scores of every evaluation so far, oldest first.
    pub fn overall_scores(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.metrics.overall_score()).collect()
    }

    /// Half the evaluator score, three tenths the decision patterns and a
    /// fifth the judge's decision score, capped at 1.
    pub async fn decision_quality(
        &mut self,
        commands: &[Command],
        scenario_type: ScenarioType,
        scenario: &ScenarioDefinition,
        current_state: &Value,
        available_drones: usize,
    ) -> f64 {
        if commands.is_empty() {
            return 0.0;
        }
        let as_json: Vec<Value> = commands
            .iter()
            .map(|c| json!({"service": c.service, "action": c.action, "parameters": c.parameters, "success": true}))
            .collect();
        let base = evaluate_scenario_commands(&as_json, scenario_type, Some(scenario), None, current_state)
            .overall_score;
        let patterns = decision_patterns(commands, available_drones);
        let judged = self.judge.assess(scenario, commands).await.decision_score;
        (base * 0.5 + patterns * 0.3 + judged * 0.2).min(1.0)
    }

    /// Evaluate a finished run.
    ///
    /// `user_satisfaction` comes from feedback when there was any.
    pub async fn evaluate(
        &mut self,
        result: &ScenarioResult,
        scenario: &ScenarioDefinition,
        response_time_ms: f64,
        current_state: &Value,
        user_satisfaction: Option<f64>,
    ) -> EvaluationMetrics {
        let available_drones = current_state
            .get("drones")
            .and_then(Value::as_object)
            .map_or(0, |drones| drones.len());
        let commands: Vec<Command> = result.command_results.iter().map(|r| r.command.clone()).collect();

        let metrics = EvaluationMetrics {
            decision_quality: self
                .decision_quality(&commands, result.scenario_type, scenario, current_state, available_drones)
                .await,
            response_time_ms,
            execution_efficiency: execution_efficiency(&result.command_results, available_drones),
            adaptability_score: DEFAULT_ADAPTABILITY,
            coordination_quality: coordination_quality(std::slice::from_ref(&commands)),
            user_satisfaction: user_satisfaction.unwrap_or(DEFAULT_SATISFACTION),
        };
        tracing::info!(
            "Evaluated '{}': overall {:.3} (decision {:.3}, efficiency {:.3})",
            scenario.name,
            metrics.overall_score(),
            metrics.decision_quality,
            metrics.execution_efficiency
        );
        self.history.push(EvaluationRecord {
            timestamp: Utc::now(),
            scenario: scenario.name.clone(),
            metrics: metrics.clone(),
            commands_count: commands.len(),
        });
        metrics
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::CommandStatus;
    use crate::llms::testing::ScriptedLlm;
    use crate::scenarios::{workshop_scenarios, ActualIds};

    fn cmd(service: ServiceType, action: &str, params: Value) -> Command {
        Command::new(service, action, params.as_object().cloned().unwrap_or_default()).unwrap()
    }

    fn zone(id: &str) -> Command {
        cmd(ServiceType::Grid, "adjust_zone", json!({"zone_id": id, "capacity": 0.7}))
    }

    fn drone(id: &str, incident: &str) -> Command {
        cmd(ServiceType::Emergency, "assign_drone", json!({"drone_id": id, "incident_id": incident}))
    }

    #[test]
    fn test_overall_score_weights() {
        let metrics = EvaluationMetrics {
            decision_quality: 1.0,
            response_time_ms: 0.0,
            execution_efficiency: 1.0,
            adaptability_score: 1.0,
            coordination_quality: 1.0,
            user_satisfaction: 1.0,
        };
        assert!((metrics.overall_score() - 1.0).abs() < 1e-9);

        let slow = EvaluationMetrics {
            response_time_ms: 25_000.0,
            ..metrics.clone()
        };
        assert_eq!(slow.normalized_response_time(), 0.0);
        assert!((slow.overall_score() - 0.85).abs() < 1e-9);

        let half = EvaluationMetrics {
            response_time_ms: 5_000.0,
            ..metrics
        };
        assert!((half.normalized_response_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decision_patterns() {
        assert_eq!(decision_patterns(&[], 4), 0.0);
        // grid + emergency: coverage 2/3, sequence .8, 1 of 4 drones
        let score = decision_patterns(&[zone("Z001"), drone("D001", "E-1001")], 4);
        assert!((score - (2.0 / 3.0 * 0.4 + 0.8 * 0.3 + 0.25 * 0.3)).abs() < 1e-9);
        // grid only, unknown fleet
        let score = decision_patterns(&[zone("Z001")], 0);
        assert!((score - (1.0 / 3.0 * 0.4 + 0.5 * 0.3 + 0.5 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_resource_coordination_conflicts() {
        assert_eq!(resource_coordination(&[]), 0.0);
        assert_eq!(resource_coordination(&[zone("Z001"), zone("Z002")]), 0.8);
        assert_eq!(resource_coordination(&[zone("Z001"), zone("Z001")]), 0.3);
        assert_eq!(
            resource_coordination(&[zone("Z001"), zone("Z001"), drone("D001", "E-1"), drone("D001", "E-2")]),
            0.2
        );
    }

    #[test]
    fn test_coordination_quality() {
        assert_eq!(coordination_quality(&[vec![zone("Z001")]]), 0.5);
        assert_eq!(coordination_quality(&[vec![], vec![]]), 0.0);
        let redirect = cmd(ServiceType::Traffic, "redirect", json!({"sector_id": "S001", "target_reduction": 0.3}));
        let score = coordination_quality(&[vec![zone("Z001")], vec![drone("D001", "E-1001"), redirect]]);
        assert!((score - (0.6 + 0.8 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_execution_efficiency() {
        let ok = CommandResult::succeeded(drone("D001", "E-1001"), json!({}), 0.1);
        let failed = CommandResult::failed(zone("Z001"), "boom", 0.1, CommandStatus::Failure);
        let score = execution_efficiency(&[ok, failed], 2);
        assert!((score - (0.5 * 0.7 + 0.5 * 0.3)).abs() < 1e-9);
        assert_eq!(execution_efficiency(&[], 2), 0.0);
    }

    #[tokio::test]
    async fn test_measure_response_time() {
        let (value, ms) = measure_response_time(async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            7
        })
        .await;
        assert_eq!(value, 7);
        assert!(ms >= 20.0);
    }

    #[tokio::test]
    async fn test_evaluate_records_history() {
        let scenario = workshop_scenarios(&ActualIds::default()).remove("heat_wave").unwrap();
        let judge = LlmJudge::new(Arc::new(ScriptedLlm::new(&[])));
        let mut framework = EvaluationFramework::new(judge);

        let mut result = ScenarioResult::new(ScenarioType::GridSurge);
        let command = zone("Z001");
        result.add_command(&command, Some(&CommandResult::succeeded(command.clone(), json!({}), 0.1)));
        let state = json!({"drones": {"D001": {}, "D002": {}}});

        let metrics = framework.evaluate(&result, &scenario, 2_000.0, &state, None).await;
        assert!((0.0..=1.0).contains(&metrics.decision_quality));
        assert_eq!(metrics.coordination_quality, 0.5);
        assert_eq!(metrics.user_satisfaction, 0.75);
        assert!((metrics.execution_efficiency - 0.7).abs() < 1e-9);
        assert_eq!(framework.history().len(), 1);
        assert_eq!(framework.overall_scores().len(), 1);

        let empty = ScenarioResult::new(ScenarioType::GridSurge);
        let metrics = framework.evaluate(&empty, &scenario, 0.0, &state, Some(0.9)).await;
        assert_eq!(metrics.decision_quality, 0.0);
        assert_eq!(metrics.user_satisfaction, 0.9);
    }
}
