//! Workshop leaderboard.
//!
//! [`WorkshopEvaluator`] scores a participant on six weighted components and
//! ranks the entries; [`results`] aggregates scenario run files on disk.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feedback::AgentAdaptation;
use crate::judge::EvaluationMetrics;

pub mod results;

pub use results::{load_results, summarize, ResultsSummary, ResultsWriter, ScenarioRanking};

/// Entries shown on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

/// Latency improvement, in percent, that earns the full latency credit.
const FULL_LATENCY_IMPROVEMENT: f64 = 50.0;
const DEFAULT_CONSISTENCY: f64 = 0.7;

/// Optimization techniques a participant applied, keyed by technique name.
///
/// Recognised keys are `latency_optimization` (with an `improvement`
/// percentage), `caching_enabled`, `model_optimization`,
/// `parallel_processing`, `advanced_feedback` and `custom_metrics`. Any key
/// containing `custom` counts as a custom technique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizationConfig(pub BTreeMap<String, Value>);

impl OptimizationConfig {
    pub fn with(mut self, technique: impl Into<String>, value: Value) -> Self {
        self.0.insert(technique.into(), value);
        self
    }

    pub fn has(&self, technique: &str) -> bool {
        self.0.contains_key(technique)
    }

    pub fn strategies(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Percentage improvement reported for latency optimization.
    pub fn latency_improvement(&self) -> Option<f64> {
        let technique = self.0.get("latency_optimization")?;
        Some(technique.get("improvement").and_then(Value::as_f64).unwrap_or(0.0))
    }
}

/// Baseline run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineResult {
    pub overall_score: f64,
    pub response_time_ms: f64,
    pub decision_quality: f64,
    pub execution_efficiency: f64,
}

impl From<&EvaluationMetrics> for BaselineResult {
    fn from(metrics: &EvaluationMetrics) -> Self {
        Self {
            overall_score: metrics.overall_score(),
            response_time_ms: metrics.response_time_ms,
            decision_quality: metrics.decision_quality,
            execution_efficiency: metrics.execution_efficiency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnovationScore {
    pub score: f64,
    pub factors: Vec<String>,
}

/// Per-component scores of a leaderboard entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub baseline_performance: BaselineResult,
    pub optimization_improvement: f64,
    pub feedback_integration: f64,
    pub innovation_factor: InnovationScore,
    pub consistency_score: f64,
    pub production_system: f64,
}

impl ScoreBreakdown {
    /// Component scores by name.
    pub fn components(&self) -> [(&'static str, f64); 6] {
        [
            ("baseline_performance", self.baseline_performance.overall_score),
            ("optimization_improvement", self.optimization_improvement),
            ("feedback_integration", self.feedback_integration),
            ("innovation_factor", self.innovation_factor.score),
            ("consistency_score", self.consistency_score),
            ("production_system", self.production_system),
        ]
    }

    /// Weighted total, capped at 1.
    pub fn final_score(&self) -> f64 {
        let total = 0.2 * self.baseline_performance.overall_score
            + 0.3 * self.optimization_improvement
            + 0.25 * self.feedback_integration
            + 0.15 * self.innovation_factor.score
            + 0.1 * self.consistency_score
            + 0.1 * self.production_system;
        total.min(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub participant: String,
    pub final_score: f64,
    pub breakdown: ScoreBreakdown,
    pub optimization_strategies: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// The component this entry scored highest on.
    pub fn top_strength(&self) -> &'static str {
        self.breakdown
            .components()
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or("none", |(name, _)| name)
    }
}

/// Evidence gathered about a participant's submission.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    pub participant: &'a str,
    pub baseline: &'a EvaluationMetrics,
    pub optimizations: &'a OptimizationConfig,
    /// Planner adaptations made from feedback; `None` when feedback
    /// integration was never set up.
    pub adaptations: Option<&'a BTreeMap<String, AgentAdaptation>>,
    /// Overall scores of past evaluations.
    pub history: &'a [f64],
    /// Whether the submission handles service and model failures.
    pub production_ready: bool,
}

/// Techniques score their own credit, averaged over the techniques used.
pub fn optimization_score(config: &OptimizationConfig) -> f64 {
    let mut score = 0.0;
    let mut used = 0;
    if let Some(improvement) = config.latency_improvement() {
        score += (improvement / FULL_LATENCY_IMPROVEMENT).min(1.0);
        used += 1;
    }
    for (technique, credit) in [
        ("caching_enabled", 0.2),
        ("model_optimization", 0.15),
        ("parallel_processing", 0.25),
    ] {
        if config.has(technique) {
            score += credit;
            used += 1;
        }
    }
    if used > 0 {
        score /= used as f64;
    }
    score.min(1.0)
}

/// 0.3 for an enhanced goal, 0.4 for added command patterns and 0.3 for
/// prompt enhancements, averaged over adapted planners.
pub fn feedback_integration_score(adaptations: Option<&BTreeMap<String, AgentAdaptation>>) -> f64 {
    let Some(adaptations) = adaptations else {
        return 0.5;
    };
    if adaptations.is_empty() {
        return 0.3;
    }
    let total: f64 = adaptations
        .values()
        .map(|a| {
            let mut score = 0.0;
            if a.goal_enhanced {
                score += 0.3;
            }
            if a.command_patterns_added > 0 {
                score += 0.4;
            }
            if a.prompt_enhancements > 0 {
                score += 0.3;
            }
            score
        })
        .sum();
    (total / adaptations.len() as f64).min(1.0)
}

pub fn innovation_score(config: &OptimizationConfig) -> InnovationScore {
    let mut factors = Vec::new();
    if config.0.len() > 3 {
        factors.push("Multiple optimization techniques combined".to_string());
    }
    if config.0.keys().any(|k| k.to_lowercase().contains("custom")) {
        factors.push("Custom optimization approach".to_string());
    }
    if config.has("advanced_feedback") {
        factors.push("Advanced feedback integration".to_string());
    }
    if config.has("custom_metrics") {
        factors.push("Custom evaluation metrics".to_string());
    }
    InnovationScore {
        score: (factors.len() as f64 * 0.25).min(1.0),
        factors,
    }
}

/// One minus the coefficient of variation of `scores`.
pub fn consistency_score(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return DEFAULT_CONSISTENCY;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let cv = if mean > 0.0 {
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt() / mean
    } else {
        1.0
    };
    (1.0 - cv).max(0.0)
}

pub fn production_score(production_ready: bool) -> f64 {
    if production_ready {
        0.8
    } else {
        0.6
    }
}

/// Running statistics over every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub total_evaluations: usize,
    /// Component name to every score recorded for it.
    pub component_scores: BTreeMap<String, Vec<f64>>,
}

impl EvaluationStats {
    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.component_scores
            .iter()
            .filter(|(_, scores)| !scores.is_empty())
            .map(|(name, scores)| (name.clone(), scores.iter().sum::<f64>() / scores.len() as f64))
            .collect()
    }
}

/// Ranks participants by their weighted workshop score.
#[derive(Debug, Default)]
pub struct WorkshopEvaluator {
    leaderboard: Vec<LeaderboardEntry>,
    stats: EvaluationStats,
}

impl WorkshopEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a submission and place it on the leaderboard.
    pub fn evaluate(&mut self, submission: &Submission<'_>) -> LeaderboardEntry {
        let breakdown = ScoreBreakdown {
            baseline_performance: BaselineResult::from(submission.baseline),
            optimization_improvement: optimization_score(submission.optimizations),
            feedback_integration: feedback_integration_score(submission.adaptations),
            innovation_factor: innovation_score(submission.optimizations),
            consistency_score: consistency_score(submission.history),
            production_system: production_score(submission.production_ready),
        };
        let entry = LeaderboardEntry {
            participant: submission.participant.to_string(),
            final_score: breakdown.final_score(),
            optimization_strategies: submission.optimizations.strategies(),
            breakdown,
            timestamp: Utc::now(),
        };
        tracing::info!("{} scored {:.3}", entry.participant, entry.final_score);

        self.stats.total_evaluations += 1;
        for (name, score) in entry.breakdown.components() {
            self.stats
                .component_scores
                .entry(name.to_string())
                .or_default()
                .push(score);
        }
        self.leaderboard.push(entry.clone());
        self.leaderboard
            .sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        entry
    }

    /// The best entries, highest first.
    pub fn top(&self) -> &[LeaderboardEntry] {
        &self.leaderboard[..self.leaderboard.len().min(LEADERBOARD_SIZE)]
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    pub fn stats(&self) -> &EvaluationStats {
        &self.stats
    }

    pub fn average_final_score(&self) -> f64 {
        if self.leaderboard.is_empty() {
            return 0.0;
        }
        self.leaderboard.iter().map(|e| e.final_score).sum::<f64>() / self.leaderboard.len() as f64
    }

    /// The strategy most participants used, with its count.
    pub fn most_common_strategy(&self) -> Option<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for strategy in self.leaderboard.iter().flat_map(|e| &e.optimization_strategies) {
            *counts.entry(strategy).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(s, count)| (s.to_string(), count))
    }

    /// The component with the highest average score.
    pub fn top_performing_area(&self) -> Option<(String, f64)> {
        self.stats
            .averages()
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn key_learning_insight(&self) -> &'static str {
        let [winner, _, ..] = self.leaderboard.as_slice() else {
            return "More participants needed for meaningful insights";
        };
        if winner.optimization_strategies.len() >= 4 {
            "Comprehensive optimization approaches tend to perform best"
        } else if winner.breakdown.innovation_factor.score > 0.8 {
            "Innovation and creativity are highly rewarded"
        } else if winner.breakdown.feedback_integration > 0.8 {
            "Strong feedback integration leads to better performance"
        } else {
            "Balanced approaches across multiple dimensions work well"
        }
    }

    /// Plain-text leaderboard table.
    pub fn render(&self) -> String {
        if self.leaderboard.is_empty() {
            return "No entries yet".to_string();
        }
        let mut out = format!("{:<6}{:<24}{:>8}  {:<26}{}\n", "Rank", "Participant", "Score", "Top strength", "Strategies");
        for (i, entry) in self.top().iter().enumerate() {
            let mut strategies = entry
                .optimization_strategies
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if entry.optimization_strategies.len() > 2 {
                strategies.push_str(&format!(" +{}", entry.optimization_strategies.len() - 2));
            }
            out.push_str(&format!(
                "{:<6}{:<24}{:>8.3}  {:<26}{}\n",
                format!("#{}", i + 1),
                entry.participant,
                entry.final_score,
                entry.top_strength(),
                strategies
            ));
        }
        out
    }
}
