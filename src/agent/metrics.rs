//! Performance metrics of one agent run.

use serde::{Deserialize, Serialize};

use crate::command::{CommandResult, ServiceType};
use crate::evaluator::EvaluationState;
use crate::scorer::ScoreRecord;

/// Metrics recorded for a scenario run. Fractions are in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Share of known incidents that were resolved.
    pub incident_coverage: f64,
    /// Mean dispatch-to-resolution time in minutes.
    pub average_eta: f64,
    /// Share of critical power zones that received a capacity adjustment.
    pub power_zone_mitigation: f64,
    /// Share of service failures that were recovered from.
    pub tool_failure_handling: f64,
    /// Share of feedback items that led to improved behavior.
    pub feedback_response: f64,
    pub capability_match: f64,
    /// How well the plan covered the services adverse weather stresses.
    pub weather_adaptation: f64,

    pub latency_seconds: f64,
    pub steps_taken: usize,
    pub final_score: f64,
    pub command_count: usize,
    pub successful_commands: usize,
    pub failed_commands: usize,
    /// Seconds per executed command.
    pub avg_command_execution_time: f64,
}

impl AgentMetrics {
    /// Record one executed command, keeping the execution time average.
    pub fn record_command(&mut self, result: &CommandResult) {
        self.command_count += 1;
        if result.success {
            self.successful_commands += 1;
        } else {
            self.failed_commands += 1;
        }
        let total = self.avg_command_execution_time * (self.command_count - 1) as f64 + result.execution_time;
        self.avg_command_execution_time = total / self.command_count as f64;
    }

    /// Copy the action-log scores into these metrics.
    pub fn apply_score(&mut self, score: &ScoreRecord) {
        self.incident_coverage = score.coverage();
        self.average_eta = score.eta();
        self.capability_match = score.capability_match();
        self.steps_taken = score.steps();
    }
}

/// Failures of services during a run and how many were recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTally {
    pub failures: usize,
    pub recovered: usize,
}

impl FailureTally {
    pub fn record(&mut self, recovered: bool) {
        self.failures += 1;
        if recovered {
            self.recovered += 1;
        }
    }

    /// Recovered share of failures; a run without failures handled all of them.
    pub fn handling_rate(&self) -> f64 {
        match self.failures {
            0 => 1.0,
            n => self.recovered as f64 / n as f64,
        }
    }
}

/// Share of the critical zones in `state` that a successful `adjust_zone`
/// targeted. 1.0 when no zone is critical.
pub fn power_zone_mitigation(state: &EvaluationState, results: &[CommandResult]) -> f64 {
    let critical: Vec<&str> = state.critical_zones().map(|z| z.zone_id.as_str()).collect();
    if critical.is_empty() {
        return 1.0;
    }
    let mitigated = critical
        .iter()
        .filter(|zone| {
            results.iter().any(|r| {
                r.is_successful()
                    && r.command.service == ServiceType::Grid
                    && r.command.action == "adjust_zone"
                    && r.command.param_str("zone_id").as_deref() == Some(**zone)
            })
        })
        .count();
    mitigated as f64 / critical.len() as f64
}

/// Whether a weather condition stresses the grid and the roads.
pub fn is_adverse_weather(condition: &str) -> bool {
    let condition = condition.to_lowercase();
    ["storm", "heat", "flood", "rain", "snow", "wind", "fog"]
        .iter()
        .any(|w| condition.contains(w))
}

/// Half credit each for acting on the grid and on traffic under adverse
/// weather. 1.0 in fair weather.
pub fn weather_adaptation(condition: Option<&str>, results: &[CommandResult]) -> f64 {
    match condition {
        Some(c) if is_adverse_weather(c) => [ServiceType::Grid, ServiceType::Traffic]
            .iter()
            .filter(|service| {
                results
                    .iter()
                    .any(|r| r.is_successful() && r.command.service == **service && !r.command.is_report())
            })
            .count() as f64
            * 0.5,
        _ => 1.0,
    }
}
