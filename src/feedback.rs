//! Simulated expert feedback on agent actions.
//!
//! Feedback scores a run on five criteria, adds seeded noise to the weighted
//! total and suggests how the planner should adapt. Suggestions from recent
//! sessions can be folded back into the planner prompt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::command::{Command, ServiceType};

/// Sessions consulted when enhancing a planner.
const RECENT_SESSIONS: usize = 3;

pub const ACTION_APPROPRIATENESS: &str = "action_appropriateness";
pub const SAFETY_PRIORITY: &str = "safety_priority";
pub const RESOURCE_EFFICIENCY: &str = "resource_efficiency";
pub const RESPONSE_SPEED: &str = "response_speed";
pub const COORDINATION_QUALITY: &str = "coordination_quality";

/// How the simulated experts behave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSimulation {
    /// How strongly experts favour safety, 0 to 1.
    pub expert_bias: f64,
    /// How strongly users prefer speed, 0 to 1.
    pub speed_preference: f64,
    /// Width of the noise added to the overall score.
    pub variability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementThresholds {
    pub minimum_score: f64,
    pub target_score: f64,
    pub excellent_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Criterion name to weight.
    pub criteria: BTreeMap<String, f64>,
    pub simulation: FeedbackSimulation,
    pub thresholds: ImprovementThresholds,
    /// Whether feedback may change the planner prompt.
    pub enable_feedback_learning: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            criteria: [
                (ACTION_APPROPRIATENESS, 0.3),
                (SAFETY_PRIORITY, 0.25),
                (RESOURCE_EFFICIENCY, 0.2),
                (RESPONSE_SPEED, 0.15),
                (COORDINATION_QUALITY, 0.1),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            simulation: FeedbackSimulation {
                expert_bias: 0.8,
                speed_preference: 0.6,
                variability: 0.2,
            },
            thresholds: ImprovementThresholds {
                minimum_score: 0.7,
                target_score: 0.85,
                excellent_score: 0.9,
            },
            enable_feedback_learning: true,
        }
    }
}

/// What a planner should change in one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationSuggestion {
    pub emphasis: String,
    pub specific_commands: Vec<String>,
    pub prompt_additions: Vec<String>,
}

fn suggestion(emphasis: &str, commands: [&str; 3], additions: [&str; 3]) -> AdaptationSuggestion {
    AdaptationSuggestion {
        emphasis: emphasis.to_string(),
        specific_commands: commands.iter().map(|s| s.to_string()).collect(),
        prompt_additions: additions.iter().map(|s| s.to_string()).collect(),
    }
}

/// Expert feedback on one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Criterion to score, each in `[0, 1]`.
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub detailed_feedback: Vec<String>,
    /// Keyed by criterion.
    pub adaptation_suggestions: BTreeMap<String, AdaptationSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSession {
    pub scenario: String,
    pub commands_count: usize,
    pub feedback: Feedback,
    pub timestamp: DateTime<Utc>,
}

/// How a planner was changed by feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAdaptation {
    pub goal_enhanced: bool,
    pub command_patterns_added: usize,
    pub prompt_enhancements: usize,
}

/// Averages over every session so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub average_scores: BTreeMap<String, f64>,
    /// Criteria averaging below the target score.
    pub improvement_areas: Vec<String>,
    pub sessions_analyzed: usize,
    pub improving: bool,
}

/// Score every criterion for a set of actions.
pub fn criteria_scores(actions: &[Command], simulation: &FeedbackSimulation) -> BTreeMap<String, f64> {
    let has = |service| actions.iter().any(|c| c.service == service);
    let action_appropriateness = match (has(ServiceType::Grid), has(ServiceType::Emergency)) {
        (true, true) => 0.9,
        (true, false) | (false, true) => 0.7,
        (false, false) => 0.3,
    };
    let safety_actions = actions
        .iter()
        .filter(|c| matches!(c.action.as_str(), "set_priority" | "assign_drone"))
        .count();
    let base_safety = (0.4 + safety_actions as f64 * 0.15).min(0.9);
    let safety_priority =
        base_safety * simulation.expert_bias + base_safety * (1.0 - simulation.expert_bias);
    let resource_efficiency = match actions.len() {
        n if n > 8 => 0.9,
        n if n > 4 => 0.7,
        _ => 0.4,
    };
    let response_speed = 0.8 * simulation.speed_preference + 0.6 * (1.0 - simulation.speed_preference);
    let services = ServiceType::ALL.iter().filter(|s| has(**s)).count();
    let coordination_quality = (services as f64 * 0.3).min(0.9);

    [
        (ACTION_APPROPRIATENESS, action_appropriateness),
        (SAFETY_PRIORITY, safety_priority),
        (RESOURCE_EFFICIENCY, resource_efficiency),
        (RESPONSE_SPEED, response_speed),
        (COORDINATION_QUALITY, coordination_quality),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Suggestions for criteria scoring under their bar.
pub fn adaptation_suggestions(scores: &BTreeMap<String, f64>) -> BTreeMap<String, AdaptationSuggestion> {
    let below = |criterion: &str, bar: f64| scores.get(criterion).is_some_and(|s| *s < bar);
    let mut suggestions = BTreeMap::new();
    if below(SAFETY_PRIORITY, 0.7) {
        suggestions.insert(
            SAFETY_PRIORITY.to_string(),
            suggestion(
                "Emphasize safety actions more strongly",
                [
                    "Always prioritize set_priority commands for critical infrastructure",
                    "Assign drones to highest urgency incidents first",
                    "Include safety justification in every action",
                ],
                [
                    "SAFETY FIRST: Every action must consider safety implications",
                    "When in doubt, choose the safer option",
                    "Emergency response takes priority over efficiency",
                ],
            ),
        );
    }
    if below(RESOURCE_EFFICIENCY, 0.6) {
        suggestions.insert(
            RESOURCE_EFFICIENCY.to_string(),
            suggestion(
                "Optimize resource allocation strategy",
                [
                    "Check resource availability before assignments",
                    "Batch similar operations for efficiency",
                    "Avoid over-allocating resources to single incidents",
                ],
                [
                    "EFFICIENCY FOCUS: Minimize resource waste",
                    "Consider cost-benefit of each action",
                    "Look for opportunities to consolidate operations",
                ],
            ),
        );
    }
    if below(COORDINATION_QUALITY, 0.5) {
        suggestions.insert(
            COORDINATION_QUALITY.to_string(),
            suggestion(
                "Improve inter-agent communication",
                [
                    "Include coordination_notes in all structured outputs",
                    "Reference other agents' actions in decision reasoning",
                    "Avoid conflicting resource assignments",
                ],
                [
                    "COORDINATION: Always consider other agents' actions",
                    "Communication is key to effective response",
                    "Avoid duplicate or conflicting operations",
                ],
            ),
        );
    }
    suggestions
}

fn title_case(criterion: &str) -> String {
    criterion
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Command guidance for a planner specialised on one service.
pub fn command_patterns(service: Option<ServiceType>) -> &'static str {
    match service {
        Some(ServiceType::Grid) => {
            "GRID MANAGEMENT COMMAND PRIORITIES:\n\
             - adjust_zone: Always check load thresholds before adjustments\n\
             - set_priority: Focus on critical infrastructure during high load\n\
             - Coordination: Share grid status with emergency and traffic teams"
        }
        Some(ServiceType::Emergency) => {
            "EMERGENCY RESPONSE COMMAND PRIORITIES:\n\
             - assign_drone: Match drone capabilities to incident requirements\n\
             - update_incident: Keep status current for coordination\n\
             - Coordination: Maintain awareness of grid and traffic constraints"
        }
        Some(ServiceType::Traffic) => {
            "TRAFFIC MANAGEMENT COMMAND PRIORITIES:\n\
             - redirect: Clear emergency corridors first\n\
             - block_route: Minimize civilian impact while enabling response\n\
             - Coordination: Support grid stability and emergency operations"
        }
        None => "Standard command patterns apply",
    }
}

/// Simulates expert reviewers and tracks how planners adapt.
#[derive(Debug)]
pub struct FeedbackSystem {
    config: FeedbackConfig,
    rng: StdRng,
    history: Vec<FeedbackSession>,
    adaptations: BTreeMap<String, AgentAdaptation>,
}

impl FeedbackSystem {
    /// Feedback with noise drawn from a generator seeded with `seed`.
    pub fn new(config: FeedbackConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            history: Vec::new(),
            adaptations: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    pub fn history(&self) -> &[FeedbackSession] {
        &self.history
    }

    pub fn adaptations(&self) -> &BTreeMap<String, AgentAdaptation> {
        &self.adaptations
    }

    fn detailed_feedback(&self, scores: &BTreeMap<String, f64>, overall: f64) -> Vec<String> {
        let thresholds = &self.config.thresholds;
        let verdict = if overall >= thresholds.excellent_score {
            "Excellent performance! This response demonstrates mastery."
        } else if overall >= thresholds.target_score {
            "Good performance with room for minor improvements."
        } else if overall >= thresholds.minimum_score {
            "Acceptable but needs improvement in key areas."
        } else {
            "Performance below standards. Major improvements needed."
        };
        let mut feedback = vec![verdict.to_string()];
        if let Some((criterion, _)) = scores.iter().min_by(|a, b| a.1.total_cmp(b.1)) {
            feedback.push(format!("Focus area: {}", title_case(criterion)));
        }
        feedback
    }

    /// Score a set of actions as a panel of experts would.
    pub fn simulate_expert_feedback(&mut self, actions: &[Command]) -> Feedback {
        let scores = criteria_scores(actions, &self.config.simulation);
        let weighted: f64 = scores
            .iter()
            .map(|(criterion, score)| score * self.config.criteria.get(criterion).copied().unwrap_or(0.0))
            .sum();
        let half = self.config.simulation.variability / 2.0;
        let noise = if half > 0.0 { self.rng.gen_range(-half..=half) } else { 0.0 };
        let overall_score = (weighted + noise).clamp(0.0, 1.0);

        Feedback {
            detailed_feedback: self.detailed_feedback(&scores, overall_score),
            adaptation_suggestions: adaptation_suggestions(&scores),
            overall_score,
            scores,
        }
    }

    /// Collect feedback on a run and keep it in the history.
    pub fn collect_session(&mut self, scenario: &str, actions: &[Command]) -> Feedback {
        let feedback = self.simulate_expert_feedback(actions);
        tracing::info!(
            "Feedback for '{}': {:.2} ({} suggestions)",
            scenario,
            feedback.overall_score,
            feedback.adaptation_suggestions.len()
        );
        self.history.push(FeedbackSession {
            scenario: scenario.to_string(),
            commands_count: actions.len(),
            feedback: feedback.clone(),
            timestamp: Utc::now(),
        });
        feedback
    }

    /// Prompt additions learned from recent sessions, or `None` when
    /// learning is off or nothing was suggested.
    ///
    /// The adaptation is recorded under `agent`.
    pub fn enhance_prompt(&mut self, agent: &str, service: Option<ServiceType>) -> Option<String> {
        if !self.config.enable_feedback_learning {
            return None;
        }
        let start = self.history.len().saturating_sub(RECENT_SESSIONS);
        let mut areas = Vec::new();
        let mut specific = Vec::new();
        let mut additions = Vec::new();
        for session in &self.history[start..] {
            for (area, s) in &session.feedback.adaptation_suggestions {
                if !areas.contains(area) {
                    areas.push(area.clone());
                }
                specific.extend(s.specific_commands.iter().cloned());
                additions.extend(s.prompt_additions.iter().cloned());
            }
        }
        if areas.is_empty() {
            return None;
        }

        let goals: Vec<&str> = areas
            .iter()
            .filter_map(|area| match area.as_str() {
                SAFETY_PRIORITY => Some("prioritize safety in all decisions"),
                RESOURCE_EFFICIENCY => Some("optimize resource utilization"),
                COORDINATION_QUALITY => Some("coordinate closely with other agents"),
                _ => None,
            })
            .collect();
        let patterns = command_patterns(service);
        let focus: Vec<String> = additions.iter().take(3).map(|a| format!("- {}", a)).collect();
        let mut prompt = String::new();
        if !goals.is_empty() {
            prompt.push_str(&format!("While planning, {}.\n\n", goals.join(", ")));
        }
        prompt.push_str(&format!(
            "FEEDBACK-DRIVEN COMMAND PATTERNS:\n{}\n\nSPECIFIC IMPROVEMENT AREAS:\n{}",
            patterns,
            focus.join("\n")
        ));

        self.adaptations.insert(
            agent.to_string(),
            AgentAdaptation {
                goal_enhanced: !goals.is_empty(),
                command_patterns_added: patterns.lines().count() + specific.len(),
                prompt_enhancements: additions.len(),
            },
        );
        Some(prompt)
    }

    /// Average scores and improvement areas over all sessions.
    pub fn analyze_patterns(&self) -> Option<FeedbackAnalysis> {
        let (first, last) = (self.history.first()?, self.history.last()?);
        let sessions = self.history.len() as f64;
        let average_scores: BTreeMap<String, f64> = self
            .config
            .criteria
            .keys()
            .map(|criterion| {
                let total: f64 = self
                    .history
                    .iter()
                    .filter_map(|s| s.feedback.scores.get(criterion))
                    .sum();
                (criterion.clone(), total / sessions)
            })
            .collect();
        let improvement_areas = average_scores
            .iter()
            .filter(|(_, score)| **score < self.config.thresholds.target_score)
            .map(|(criterion, _)| criterion.clone())
            .collect();
        Some(FeedbackAnalysis {
            average_scores,
            improvement_areas,
            sessions_analyzed: self.history.len(),
            improving: self.history.len() > 1 && last.feedback.overall_score > first.feedback.overall_score,
        })
    }

    /// Share of sessions after the first that beat their predecessor.
    pub fn response_rate(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let improved = self
            .history
            .windows(2)
            .filter(|w| w[1].feedback.overall_score > w[0].feedback.overall_score)
            .count();
        improved as f64 / (self.history.len() - 1) as f64
    }
}
