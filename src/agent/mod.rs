//! LLM-driven crisis planner bound to the city services.
//!
//! An [`AgentSystem`] runs a scenario in four steps:
//!
//! 1. query the report tools for the current city state
//! 2. ask the model for a structured plan
//! 3. turn the plan into commands and execute them
//! 4. score what happened with the action-log scorer and the evaluator
//!
//! The outcome is a [`ScenarioResult`] that can be written to disk and
//! picked up by the leaderboard.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::command::{
    convert_task_outputs, extract_commands_from_output, parse_task_output, unix_now, Command, CommandExecutor,
    CommandPlan, CommandResult,
};
use crate::config::WorkshopConfig;
use crate::error::{ResultsError, ScenarioError, SentinelError};
use crate::evaluator::{evaluate_scenario_commands, EvaluationState};
use crate::llms::{Llm, LlmMessage, ResponseFormat};
use crate::models::ScenarioDefinition;
use crate::scenarios::ScenarioType;
use crate::scorer::{action_log_from_results, score_actions, GroundTruth};
use crate::seed::DaySeedGenerator;

pub mod cache;
pub mod coordinator;
pub mod metrics;
pub mod outputs;
pub mod tools;

pub use cache::ToolCache;
pub use coordinator::StateCoordinator;
pub use metrics::{AgentMetrics, FailureTally};
pub use outputs::{
    validate_scenario_output, CityWideDrillOutput, DroneCapacityOutput, EmergencyResponsePlan, FloodDisruptionOutput,
    GridManagementPlan, GridSurgeOutput, MedicalEmergencyOutput, ScenarioOutput, TrafficManagementPlan,
};
pub use tools::{ServiceTool, ToolOutcome};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
/// Extra attempts for a command whose service was unavailable.
const UNAVAILABLE_RETRIES: usize = 1;
const PLAN_SECTIONS: [&str; 3] = ["grid_plan", "emergency_plan", "traffic_plan"];

fn default_day() -> u32 {
    1
}

fn default_duration() -> u32 {
    60
}

/// A scenario to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInput {
    pub scenario_type: ScenarioType,
    /// Day of the month to simulate, 1 to 31.
    #[serde(default = "default_day")]
    pub day: u32,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    /// Extra constraints, merged over the scenario preset's.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Evaluation definition; the type's default metrics apply without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ScenarioDefinition>,
    /// Extra planner instructions, e.g. learned from feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl ScenarioInput {
    pub fn new(scenario_type: ScenarioType, day: u32) -> Result<Self, ScenarioError> {
        let input = Self {
            scenario_type,
            day,
            duration_minutes: default_duration(),
            parameters: Map::new(),
            definition: None,
            guidance: None,
        };
        input.validate()?;
        Ok(input)
    }

    pub fn with_definition(mut self, definition: ScenarioDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        DaySeedGenerator::validate_day(self.day)?;
        Ok(())
    }

    /// Preset constraints overlaid with this input's parameters.
    pub fn constraints(&self) -> Map<String, Value> {
        let mut constraints = self
            .scenario_type
            .preset()
            .map(|p| p.constraints)
            .unwrap_or_default();
        constraints.extend(self.parameters.clone());
        constraints
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_type: ScenarioType,
    pub success: bool,
    /// Raw reply of the model.
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub metrics: AgentMetrics,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub command_results: Vec<CommandResult>,
}

impl ScenarioResult {
    pub fn new(scenario_type: ScenarioType) -> Self {
        Self {
            scenario_type,
            success: true,
            response: String::new(),
            structured_output: None,
            metrics: AgentMetrics::default(),
            details: Map::new(),
            commands: Vec::new(),
            command_results: Vec::new(),
        }
    }

    /// Record a command and, if it ran, its result.
    pub fn add_command(&mut self, command: &Command, result: Option<&CommandResult>) {
        self.commands.push(command.clone());
        if let Some(result) = result {
            self.command_results.push(result.clone());
            self.metrics.record_command(result);
        }
    }

    /// Write the result as `{type}_{YYYYmmdd_HHMMSS}.json` under `dir`.
    pub fn save_to_file(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ResultsError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.json", self.scenario_type, timestamp));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Saved scenario result to {}", path.display());
        Ok(path)
    }
}

/// The planner prompt for a scenario.
pub fn planning_messages(
    input: &ScenarioInput,
    constraints: &Map<String, Value>,
    reports: &Map<String, Value>,
    tools: &[ServiceTool],
) -> Vec<LlmMessage> {
    let catalogue: Vec<Value> = tools.iter().map(ServiceTool::to_function).collect();
    let report_fields = ScenarioOutput::required_fields(input.scenario_type).join(", ");
    let mut system = format!(
        "You are the SENTINEL GRID crisis coordinator for the city of NeoCatalis. \
         You direct the power grid, the emergency drone fleet and traffic control.\n\n\
         Available tools:\n{}\n\n\
         Reply with one JSON object with these keys:\n\
         - \"analysis\": your assessment of the situation\n\
         - \"grid_plan\": {{\"zone_adjustments\": [{{\"zone_id\", \"capacity\", \"reason\"}}], \
         \"priority_settings\": [{{\"infrastructure_id\", \"level\"}}], \"stability_forecast\": {{}}, \
         \"coordination_notes\": \"\"}}\n\
         - \"emergency_plan\": {{\"drone_assignments\": [{{\"drone_id\", \"incident_id\"}}], \
         \"incident_updates\": [{{\"incident_id\", \"status\"}}], \"resource_allocation\": {{}}, \
         \"coordination_notes\": \"\"}}\n\
         - \"traffic_plan\": {{\"traffic_redirections\": [{{\"sector_id\", \"target_reduction\"}}], \
         \"route_blocks\": [{{\"sector_id\", \"duration_minutes\", \"reason\"}}], \
         \"emergency_corridors\": [], \"coordination_notes\": \"\"}}\n\
         - \"commands\": any further tool calls as {{\"service\", \"action\", \"parameters\"}}\n\
         - \"structured_output\": a report with {}\n\n\
         Only use ids that appear in the current state.",
        serde_json::to_string_pretty(&catalogue).unwrap_or_default(),
        report_fields,
    );
    if let Some(guidance) = &input.guidance {
        system.push_str("\n\n");
        system.push_str(guidance);
    }
    let user = format!(
        "Scenario: {}\n{}\n\nDay: {}\nDuration: {} minutes\nConstraints: {}\n\nCurrent state:\n{}",
        input.scenario_type,
        input.scenario_type.description(),
        input.day,
        input.duration_minutes,
        Value::Object(constraints.clone()),
        serde_json::to_string_pretty(reports).unwrap_or_default(),
    );
    vec![LlmMessage::system(system), LlmMessage::user(user)]
}

/// Commands named by a plan, split into executable and keyword-fallback
/// commands. Duplicates are dropped.
pub fn plan_commands(plan: &Value) -> (Vec<Command>, Vec<Command>) {
    let sections: Vec<Value> = PLAN_SECTIONS
        .iter()
        .filter_map(|key| plan.get(*key).cloned())
        .collect();
    let mut commands = if sections.is_empty() {
        convert_task_outputs(std::slice::from_ref(plan))
    } else {
        convert_task_outputs(&sections)
    };
    if let Some(extra) = plan.get("commands") {
        for extracted in extract_commands_from_output(&json!({ "commands": extra })) {
            match extracted.into_command() {
                Ok(command) => commands.push(command),
                Err(e) => tracing::warn!("Skipping plan command: {}", e),
            }
        }
    }

    let mut seen = HashSet::new();
    let (fallback, executable): (Vec<Command>, Vec<Command>) = commands
        .into_iter()
        .filter(|c| seen.insert(format!("{}|{}|{}", c.service, c.action, Value::Object(c.parameters.clone()))))
        .partition(Command::is_fallback);
    (executable, fallback)
}

/// Runs scenarios against the city services with an LLM planner.
#[derive(Debug)]
pub struct AgentSystem {
    pub name: String,
    pub description: String,
    pub version: String,
    initialized: bool,
    llm: Arc<dyn Llm>,
    executor: CommandExecutor,
    coordinator: StateCoordinator,
    tools: Vec<ServiceTool>,
    cache: ToolCache,
    failures: FailureTally,
}

impl AgentSystem {
    pub fn new(
        name: impl Into<String>,
        llm: Arc<dyn Llm>,
        executor: CommandExecutor,
        coordinator: StateCoordinator,
    ) -> Self {
        Self {
            name: name.into(),
            description: "LLM planner for the NeoCatalis crisis services".to_string(),
            version: crate::VERSION.to_string(),
            initialized: false,
            llm,
            executor,
            coordinator,
            tools: ServiceTool::catalogue(),
            cache: ToolCache::new(),
            failures: FailureTally::default(),
        }
    }

    /// Agent system for the configured service ports.
    pub fn from_config(name: impl Into<String>, llm: Arc<dyn Llm>, config: &WorkshopConfig) -> Result<Self, SentinelError> {
        Ok(Self::new(
            name,
            llm,
            CommandExecutor::from_config(config)?,
            StateCoordinator::from_config(config)?,
        ))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn tools(&self) -> &[ServiceTool] {
        &self.tools
    }

    pub fn coordinator(&self) -> &StateCoordinator {
        &self.coordinator
    }

    /// Health-check the grid, emergency and traffic services.
    ///
    /// Unhealthy services are logged; the system still starts.
    pub async fn initialize(&mut self) -> BTreeMap<String, bool> {
        if self.initialized {
            tracing::info!("Agent system '{}' already initialized", self.name);
            return BTreeMap::new();
        }
        tracing::info!("Initializing agent system '{}'", self.name);

        let client = self.executor.client().clone();
        let checks = self.coordinator.endpoints().iter().map(|(service, url)| {
            let client = client.clone();
            let url = format!("{}/service/health", url);
            async move {
                let healthy = match client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
                    Ok(response) if response.status().is_success() => response
                        .json::<Value>()
                        .await
                        .map(|body| body.get("status").and_then(Value::as_str) == Some("healthy"))
                        .unwrap_or(false),
                    _ => false,
                };
                (service.to_string(), healthy)
            }
        });
        let health: BTreeMap<String, bool> = join_all(checks).await.into_iter().collect();
        for (service, healthy) in &health {
            if !healthy {
                tracing::warn!("{} service is not healthy", service);
            }
        }
        self.initialized = true;
        health
    }

    /// Run the report tools, falling back to cached reports.
    async fn gather_reports(&mut self) -> Map<String, Value> {
        let mut reports = Map::new();
        let readers: Vec<ServiceTool> = self.tools.iter().filter(|t| t.is_read_only()).cloned().collect();
        for tool in readers {
            let outcome = tool.run(&self.executor, &self.cache, &json!({})).await;
            if outcome.is_service_failure() {
                self.failures.record(outcome.from_cache);
            }
            reports.insert(tool.name.clone(), outcome.output);
        }
        reports
    }

    /// Run one scenario end to end.
    pub async fn invoke(&mut self, input: &ScenarioInput) -> Result<ScenarioResult, SentinelError> {
        input.validate()?;
        if !self.initialized {
            self.initialize().await;
        }
        tracing::info!("Running scenario {} on day {}", input.scenario_type, input.day);

        let start = Instant::now();
        self.failures = FailureTally::default();
        let mut result = ScenarioResult::new(input.scenario_type);
        let constraints = input.constraints();

        let reports = self.gather_reports().await;
        let before = self.coordinator.snapshot().await;

        let messages = planning_messages(input, &constraints, &reports, &self.tools);
        let reply = self.llm.complete(&messages, ResponseFormat::JsonObject).await?;
        result.response = reply.clone();

        let plan = match parse_task_output(&reply) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("Planner reply is not a JSON plan: {}", e);
                Value::String(reply)
            }
        };
        log_coordination_notes(&plan);

        result.structured_output = match plan.get("structured_output") {
            Some(Value::Object(report)) => {
                let mut report = report.clone();
                report.entry("executed_commands").or_insert_with(|| json!([]));
                Some(Value::Object(report))
            }
            _ => None,
        };

        let (commands, fallback) = plan_commands(&plan);
        if !fallback.is_empty() {
            tracing::info!("{} actions were only described, not planned", fallback.len());
        }
        for command in commands {
            self.execute_command(command, &mut result).await;
        }

        let latency = start.elapsed().as_secs_f64();
        let after = self.coordinator.snapshot().await;

        let truth = GroundTruth::from_emergency_state(&before);
        let log = action_log_from_results(&result.command_results);
        let score = score_actions(input.scenario_type.as_str(), &log, &truth, Some(latency));
        let executed: Vec<Value> = result
            .command_results
            .iter()
            .filter(|r| r.is_successful())
            .map(|r| json!(r.command))
            .collect();
        let evaluation = evaluate_scenario_commands(
            &executed,
            input.scenario_type,
            input.definition.as_ref(),
            Some(constraints.clone()),
            &after,
        );

        let weather = constraints.get("weather_condition").and_then(Value::as_str);
        let metrics = &mut result.metrics;
        metrics.apply_score(&score);
        metrics.latency_seconds = latency;
        metrics.final_score = evaluation.overall_score;
        metrics.power_zone_mitigation =
            metrics::power_zone_mitigation(&EvaluationState::from_value(&before), &result.command_results);
        metrics.weather_adaptation = metrics::weather_adaptation(weather, &result.command_results);
        metrics.tool_failure_handling = self.failures.handling_rate();

        result.success = result.metrics.failed_commands == 0;
        result.details.insert("day".to_string(), json!(input.day));
        result.details.insert("duration_minutes".to_string(), json!(input.duration_minutes));
        result.details.insert("model".to_string(), json!(self.llm.model()));
        result.details.insert("reports".to_string(), Value::Object(reports));
        result.details.insert("score".to_string(), json!(score));
        result.details.insert("evaluation".to_string(), json!(evaluation));
        result.details.insert("fallback_commands".to_string(), json!(fallback));
        result.details.insert("tool_failures".to_string(), json!(self.failures));

        validate_scenario_output(input.scenario_type, result.structured_output.as_ref());
        tracing::info!(
            "Scenario {} finished: {}/{} commands succeeded, score {:.2}",
            input.scenario_type,
            result.metrics.successful_commands,
            result.metrics.command_count,
            result.metrics.final_score
        );
        Ok(result)
    }

    /// Execute a command, retrying once if its service was unavailable,
    /// and record it in `result`.
    pub async fn execute_command(&mut self, mut command: Command, result: &mut ScenarioResult) -> CommandResult {
        command.timestamp = Some(unix_now());
        let mut outcome = self.executor.execute(&command).await;
        let mut attempts = 0;
        while outcome.unavailable && attempts < UNAVAILABLE_RETRIES {
            attempts += 1;
            tracing::warn!("{} unavailable, retrying ({}/{})", command, attempts, UNAVAILABLE_RETRIES);
            outcome = self.executor.execute(&command).await;
        }
        if attempts > 0 {
            self.failures.record(outcome.is_successful());
        }

        result.add_command(&command, Some(&outcome));
        if let Some(Value::Array(executed)) = result
            .structured_output
            .as_mut()
            .and_then(|report| report.get_mut("executed_commands"))
        {
            executed.push(json!(command));
        }
        outcome
    }

    pub async fn execute_plan(&mut self, plan: &CommandPlan, result: &mut ScenarioResult) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(plan.commands.len());
        for command in &plan.commands {
            results.push(self.execute_command(command.clone(), result).await);
        }
        results
    }

    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down agent system '{}'", self.name);
        self.cache.clear();
        self.initialized = false;
    }
}

fn log_coordination_notes(plan: &Value) {
    let notes = [
        plan.get("grid_plan")
            .and_then(|p| serde_json::from_value::<GridManagementPlan>(p.clone()).ok())
            .map(|p| ("grid", p.coordination_notes)),
        plan.get("emergency_plan")
            .and_then(|p| serde_json::from_value::<EmergencyResponsePlan>(p.clone()).ok())
            .map(|p| ("emergency", p.coordination_notes)),
        plan.get("traffic_plan")
            .and_then(|p| serde_json::from_value::<TrafficManagementPlan>(p.clone()).ok())
            .map(|p| ("traffic", p.coordination_notes)),
    ];
    for (service, note) in notes.into_iter().flatten() {
        if !note.is_empty() {
            tracing::debug!("{} coordination: {}", service, note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::testing::ScriptedLlm;
    use crate::scenarios::{workshop_scenarios, ActualIds};
    use crate::services::scenario::ServiceEndpoints;
    use crate::services::test_support::spawn;
    use crate::services::{emergency_router, grid_router, traffic_router, EmergencyState, GridState, TrafficState};

    const PLAN: &str = r#"{
        "analysis": "Z001 is at 98% load and the hospital has lost power.",
        "grid_plan": {
            "zone_adjustments": [{"zone_id": "Z001", "capacity": 0.7, "reason": "shed load"}],
            "priority_settings": [{"infrastructure_id": "hospital", "level": "critical"}],
            "coordination_notes": "protect the hospital first"
        },
        "emergency_plan": {
            "drone_assignments": [{"drone_id": "D001", "incident_id": "E-1001"}],
            "incident_updates": [{"incident_id": "E-1001", "status": "resolved"}]
        },
        "traffic_plan": {
            "traffic_redirections": [{"sector_id": "S001", "target_reduction": 0.3}]
        },
        "commands": [{"service": "grid", "action": "adjust_zone", "parameters": {"zone_id": "Z001", "capacity": 0.7}}],
        "structured_output": {
            "critical_zones": {"Z001": 98.0},
            "load_reduction_actions": {"Z001": 30.0},
            "priority_infrastructure": {"hospital": "critical"},
            "weather_impact": "extreme heat",
            "emergency_readiness": "drone dispatched",
            "action_plan": "shed load, protect hospital, clear roads"
        }
    }"#;

    async fn live_system(replies: &[&str]) -> (AgentSystem, Arc<ScriptedLlm>) {
        let endpoints = ServiceEndpoints {
            grid: spawn(grid_router(GridState::new(5))).await,
            emergency: spawn(emergency_router(EmergencyState::new(5))).await,
            traffic: spawn(traffic_router(TrafficState::new(5))).await,
        };
        let executor = CommandExecutor::with_urls(&endpoints.grid, &endpoints.emergency, &endpoints.traffic);
        let mut coordinator = StateCoordinator::new(endpoints, "http://127.0.0.1:1");
        coordinator.settle_delay = Duration::ZERO;
        let llm = Arc::new(ScriptedLlm::new(replies));
        let system = AgentSystem::new("test", llm.clone(), executor, coordinator);
        (system, llm)
    }

    fn heat_wave() -> ScenarioDefinition {
        workshop_scenarios(&ActualIds::default()).remove("heat_wave").unwrap()
    }

    #[test]
    fn test_scenario_input_day_bounds() {
        assert!(ScenarioInput::new(ScenarioType::GridSurge, 1).is_ok());
        assert!(ScenarioInput::new(ScenarioType::GridSurge, 31).is_ok());
        assert!(matches!(
            ScenarioInput::new(ScenarioType::GridSurge, 0),
            Err(ScenarioError::InvalidDay(0))
        ));
        assert!(ScenarioInput::new(ScenarioType::GridSurge, 32).is_err());

        let parsed: ScenarioInput = serde_json::from_value(json!({"scenario_type": "city_wide_drill"})).unwrap();
        assert_eq!(parsed.day, 1);
        assert_eq!(parsed.duration_minutes, 60);
    }

    #[test]
    fn test_constraints_overlay_preset() {
        let mut input = ScenarioInput::new(ScenarioType::GridSurge, 3).unwrap();
        input.parameters.insert("available_drones".to_string(), json!(2));
        let constraints = input.constraints();
        assert_eq!(constraints["available_drones"], 2);
        assert_eq!(constraints["weather_condition"], "heat_wave");
        assert!(ScenarioInput::new(ScenarioType::CityWideDrill, 3).unwrap().constraints().is_empty());
    }

    #[test]
    fn test_plan_commands_dedups_and_splits_fallbacks() {
        let plan = parse_task_output(PLAN).unwrap();
        let (commands, fallback) = plan_commands(&plan);
        let actions: Vec<&str> = commands.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["adjust_zone", "set_priority", "assign_drone", "update_incident", "redirect"]
        );
        assert!(fallback.is_empty());

        let (commands, fallback) = plan_commands(&json!("We should send a drone to the incident."));
        assert!(commands.is_empty());
        assert_eq!(fallback.len(), 2);
    }

    #[test]
    fn test_planning_messages_carry_tools_and_state() {
        let input = ScenarioInput::new(ScenarioType::GridSurge, 7).unwrap();
        let mut reports = Map::new();
        reports.insert("grid_report_status".to_string(), json!({"total_zones": 1}));
        let messages = planning_messages(&input, &input.constraints(), &reports, &ServiceTool::catalogue());
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("grid_adjust_zone"));
        assert!(messages[0].content.contains("load_reduction_actions"));
        assert!(messages[1].content.contains("Day: 7"));
        assert!(messages[1].content.contains("total_zones"));

        let guided = input.with_guidance("SAFETY FIRST");
        let messages = planning_messages(&guided, &guided.constraints(), &reports, &[]);
        assert!(messages[0].content.ends_with("SAFETY FIRST"));
    }

    #[test]
    fn test_add_command_running_average_and_save() {
        let mut result = ScenarioResult::new(ScenarioType::DroneCapacity);
        let cmd = Command::new(crate::command::ServiceType::Emergency, "report_status", Map::new()).unwrap();
        result.add_command(&cmd, None);
        result.add_command(&cmd, Some(&CommandResult::succeeded(cmd.clone(), json!({}), 0.5)));
        result.add_command(&cmd, Some(&CommandResult::succeeded(cmd.clone(), json!({}), 1.5)));
        assert_eq!(result.commands.len(), 3);
        assert_eq!(result.metrics.command_count, 2);
        assert!((result.metrics.avg_command_execution_time - 1.0).abs() < 1e-9);

        let dir = tempfile::tempdir().unwrap();
        let path = result.save_to_file(dir.path().join("results")).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("drone_capacity_crisis_"));
        assert!(name.ends_with(".json"));
        let saved: ScenarioResult = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, result);
    }

    #[tokio::test]
    async fn test_initialize_reports_health() {
        let (mut system, _) = live_system(&[]).await;
        let health = system.initialize().await;
        assert_eq!(health.len(), 3);
        assert!(health.values().all(|healthy| *healthy));
        assert!(system.is_initialized());
        assert!(system.initialize().await.is_empty());
        system.shutdown();
        assert!(!system.is_initialized());
    }

    #[tokio::test]
    async fn test_invoke_runs_plan_and_scores_it() {
        let (mut system, llm) = live_system(&[PLAN]).await;
        assert!(system.coordinator().manual_activation(&heat_wave()).await);

        let input = ScenarioInput::new(ScenarioType::GridSurge, 12).unwrap().with_definition(heat_wave());
        let result = system.invoke(&input).await.unwrap();

        assert_eq!(result.metrics.command_count, 5);
        assert_eq!(result.metrics.successful_commands, 5, "{:?}", result.command_results);
        assert!(result.success);
        assert_eq!(result.metrics.incident_coverage, 1.0);
        assert_eq!(result.metrics.capability_match, 1.0);
        assert_eq!(result.metrics.steps_taken, 3);
        assert_eq!(result.metrics.power_zone_mitigation, 1.0);
        assert_eq!(result.metrics.weather_adaptation, 1.0);
        assert_eq!(result.metrics.tool_failure_handling, 1.0);
        assert!(result.metrics.average_eta >= 0.0);
        assert!((0.0..=1.0).contains(&result.metrics.final_score));
        assert!(result.metrics.latency_seconds > 0.0);

        let report = result.structured_output.as_ref().unwrap();
        assert_eq!(report["executed_commands"].as_array().unwrap().len(), 5);
        assert_eq!(result.details["day"], 12);
        assert!(result.details["reports"]["grid_report_status"]["zones"]["Z001"].is_object());

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("grid_surge_heat_wave"));
    }

    #[tokio::test]
    async fn test_invoke_with_prose_reply_executes_nothing() {
        let (mut system, _) = live_system(&["Send a drone to the incident and watch traffic."]).await;
        let input = ScenarioInput::new(ScenarioType::MedicalEmergency, 2).unwrap();
        let result = system.invoke(&input).await.unwrap();
        assert_eq!(result.metrics.command_count, 0);
        assert!(result.structured_output.is_none());
        assert_eq!(result.details["fallback_commands"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let (mut system, _) = live_system(&[]).await;
        let input = ScenarioInput::new(ScenarioType::FloodDisruption, 2).unwrap();
        assert!(matches!(system.invoke(&input).await, Err(SentinelError::Llm(_))));
    }

    #[tokio::test]
    async fn test_unavailable_services_count_as_tool_failures() {
        let executor = CommandExecutor::with_urls("http://127.0.0.1:1", "http://127.0.0.1:1", "http://127.0.0.1:1");
        let endpoints = ServiceEndpoints {
            grid: "http://127.0.0.1:1".into(),
            emergency: "http://127.0.0.1:1".into(),
            traffic: "http://127.0.0.1:1".into(),
        };
        let coordinator = StateCoordinator::new(endpoints, "http://127.0.0.1:1");
        let llm = Arc::new(ScriptedLlm::new(&[PLAN]));
        let mut system = AgentSystem::new("offline", llm, executor, coordinator);

        let result = system
            .invoke(&ScenarioInput::new(ScenarioType::GridSurge, 1).unwrap())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.metrics.failed_commands, 5);
        assert_eq!(result.metrics.tool_failure_handling, 0.0);
        assert_eq!(result.details["tool_failures"]["failures"], 8);
    }
}
