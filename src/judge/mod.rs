//! LLM-as-a-judge assessment of agent decisions.
//!
//! [`LlmJudge`] asks a model to grade the commands an agent issued for a
//! scenario. [`EvaluationFramework`] combines that grade with rule-based
//! decision, efficiency and coordination analysis into [`EvaluationMetrics`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::Command;
use crate::error::LlmError;
use crate::llms::{Llm, LlmMessage, OpenAiCompletion, ResponseFormat};
use crate::models::ScenarioDefinition;

pub mod framework;

pub use framework::{EvaluationFramework, EvaluationMetrics, EvaluationRecord};

/// Model the judge uses unless told otherwise.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o";
pub const JUDGE_TEMPERATURE: f64 = 0.1;

const JUDGE_SYSTEM_PROMPT: &str =
    "You are an expert evaluator of AI agent systems. Provide detailed, structured assessments.";

/// The judge's grading of one set of agent decisions. Scores are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecisionAssessment {
    pub decision_score: f64,
    pub reasoning_quality: f64,
    pub action_appropriateness: f64,
    pub resource_efficiency: f64,
    pub coordination_effectiveness: f64,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub overall_assessment: String,
}

impl AgentDecisionAssessment {
    /// The assessment reported when the judge could not be consulted.
    pub fn neutral() -> Self {
        Self {
            decision_score: 0.5,
            reasoning_quality: 0.5,
            action_appropriateness: 0.5,
            resource_efficiency: 0.5,
            coordination_effectiveness: 0.5,
            improvement_suggestions: vec!["LLM evaluation unavailable".to_string()],
            strengths: vec!["Unable to assess".to_string()],
            overall_assessment: "LLM evaluation failed".to_string(),
        }
    }

    /// Clamp every score into `[0, 1]`; NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        for score in [
            &mut self.decision_score,
            &mut self.reasoning_quality,
            &mut self.action_appropriateness,
            &mut self.resource_efficiency,
            &mut self.coordination_effectiveness,
        ] {
            *score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        }
        self
    }

    /// JSON schema of the reply requested from the model.
    pub fn schema() -> Value {
        let score = json!({"type": "number", "minimum": 0.0, "maximum": 1.0});
        let list = json!({"type": "array", "items": {"type": "string"}});
        json!({
            "type": "object",
            "properties": {
                "decision_score": score,
                "reasoning_quality": score,
                "action_appropriateness": score,
                "resource_efficiency": score,
                "coordination_effectiveness": score,
                "improvement_suggestions": list,
                "strengths": list,
                "overall_assessment": {"type": "string"},
            },
            "required": [
                "decision_score",
                "reasoning_quality",
                "action_appropriateness",
                "resource_efficiency",
                "coordination_effectiveness",
                "improvement_suggestions",
                "strengths",
                "overall_assessment",
            ],
            "additionalProperties": false,
        })
    }
}

/// A past judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub timestamp: DateTime<Utc>,
    pub scenario: String,
    pub assessment: AgentDecisionAssessment,
    pub commands_count: usize,
}

/// Grades agent decisions with a language model.
#[derive(Debug)]
pub struct LlmJudge {
    llm: Arc<dyn Llm>,
    history: Vec<JudgeRecord>,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            history: Vec::new(),
        }
    }

    /// Judge backed by [`DEFAULT_JUDGE_MODEL`] at [`JUDGE_TEMPERATURE`].
    ///
    /// Fails when `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let llm = OpenAiCompletion::from_env(DEFAULT_JUDGE_MODEL)?.with_temperature(JUDGE_TEMPERATURE);
        Ok(Self::new(Arc::new(llm)))
    }

    pub fn history(&self) -> &[JudgeRecord] {
        &self.history
    }

    fn prompt(scenario: &ScenarioDefinition, commands: &[Command]) -> String {
        let summary: Vec<Value> = commands
            .iter()
            .map(|c| json!({"service": c.service, "action": c.action, "parameters": c.parameters}))
            .collect();
        format!(
            "You are an expert evaluator of AI agent decision-making in crisis management scenarios.\n\n\
             SCENARIO: {}\nDescription: {}\n\n\
             AGENT ACTIONS TAKEN:\n{}\n\n\
             SCENARIO CONTEXT:\n\
             - Grid zones with varying load levels\n\
             - Emergency incidents requiring drone response\n\
             - Traffic congestion affecting emergency access\n\n\
             Evaluate the agent's performance across multiple dimensions and provide structured feedback.\n\n\
             Consider:\n\
             1. Decision Quality: Are the decisions logical and well-reasoned?\n\
             2. Action Appropriateness: Do the actions fit the scenario requirements?\n\
             3. Resource Efficiency: Is the agent using resources optimally?\n\
             4. Coordination: How well do actions coordinate across services?\n\
             5. Reasoning Quality: Is there clear logic behind decisions?\n\n\
             Provide specific, actionable feedback for improvement.",
            scenario.name,
            scenario.description,
            serde_json::to_string_pretty(&summary).unwrap_or_default(),
        )
    }

    async fn ask(&self, scenario: &ScenarioDefinition, commands: &[Command]) -> Result<AgentDecisionAssessment, LlmError> {
        let messages = [
            LlmMessage::system(JUDGE_SYSTEM_PROMPT),
            LlmMessage::user(Self::prompt(scenario, commands)),
        ];
        let format = ResponseFormat::JsonSchema {
            name: "agent_decision_assessment".to_string(),
            schema: AgentDecisionAssessment::schema(),
        };
        let reply = self.llm.complete(&messages, format).await?;
        let assessment: AgentDecisionAssessment =
            serde_json::from_str(reply.trim()).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(assessment.clamped())
    }

    /// Grade `commands` for `scenario`.
    ///
    /// Never fails: if the model cannot be reached or its reply does not
    /// parse, the neutral assessment is returned.
    pub async fn assess(&mut self, scenario: &ScenarioDefinition, commands: &[Command]) -> AgentDecisionAssessment {
        match self.ask(scenario, commands).await {
            Ok(assessment) => {
                tracing::debug!(
                    "Judge scored {} commands for '{}' at {:.2}",
                    commands.len(),
                    scenario.name,
                    assessment.decision_score
                );
                self.history.push(JudgeRecord {
                    timestamp: Utc::now(),
                    scenario: scenario.name.clone(),
                    assessment: assessment.clone(),
                    commands_count: commands.len(),
                });
                assessment
            }
            Err(e) => {
                tracing::warn!("LLM judge evaluation failed: {}", e);
                AgentDecisionAssessment::neutral()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ServiceType;
    use crate::llms::testing::ScriptedLlm;
    use crate::scenarios::{workshop_scenarios, ActualIds};

    fn scenario() -> ScenarioDefinition {
        workshop_scenarios(&ActualIds::default()).remove("heat_wave").unwrap()
    }

    fn commands() -> Vec<Command> {
        vec![Command::new(
            ServiceType::Grid,
            "adjust_zone",
            json!({"zone_id": "Z001", "capacity": 0.7}).as_object().cloned().unwrap(),
        )
        .unwrap()]
    }

    #[tokio::test]
    async fn test_assessment_is_parsed_and_clamped() {
        let reply = r#"{
            "decision_score": 0.82,
            "reasoning_quality": 1.4,
            "action_appropriateness": 0.7,
            "resource_efficiency": -0.2,
            "coordination_effectiveness": 0.6,
            "improvement_suggestions": ["dispatch a drone"],
            "strengths": ["fast load shedding"],
            "overall_assessment": "solid grid response"
        }"#;
        let llm = Arc::new(ScriptedLlm::new(&[reply]));
        let mut judge = LlmJudge::new(llm.clone());
        let assessment = judge.assess(&scenario(), &commands()).await;

        assert_eq!(assessment.decision_score, 0.82);
        assert_eq!(assessment.reasoning_quality, 1.0);
        assert_eq!(assessment.resource_efficiency, 0.0);
        assert_eq!(assessment.strengths, vec!["fast load shedding"]);
        assert_eq!(judge.history().len(), 1);
        assert_eq!(judge.history()[0].commands_count, 1);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("Heat Wave Crisis"));
        assert!(prompts[0][1].content.contains("adjust_zone"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_gives_neutral_assessment() {
        let mut judge = LlmJudge::new(Arc::new(ScriptedLlm::new(&["I think it went well."])));
        let assessment = judge.assess(&scenario(), &commands()).await;
        assert_eq!(assessment, AgentDecisionAssessment::neutral());
        assert!(judge.history().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_model_gives_neutral_assessment() {
        let mut judge = LlmJudge::new(Arc::new(ScriptedLlm::new(&[])));
        assert_eq!(judge.assess(&scenario(), &[]).await.decision_score, 0.5);
    }

    #[test]
    fn test_clamped_handles_nan() {
        let mut assessment = AgentDecisionAssessment::neutral();
        assessment.decision_score = f64::NAN;
        assert_eq!(assessment.clamped().decision_score, 0.0);
    }

    #[test]
    fn test_schema_requires_every_field() {
        let schema = AgentDecisionAssessment::schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), schema["properties"].as_object().unwrap().len());
    }
}
