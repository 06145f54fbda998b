//! SENTINEL GRID workshop runner.
//!
//! # Usage
//!
//! ```bash
//! sentinel services                      # all four simulators in one process
//! sentinel seed <day>                    # print the seeded city for a day
//! sentinel run <scenario> <day> [opts]   # run the agent system on a scenario
//! sentinel score <results_dir>           # aggregate results into a leaderboard
//! ```
//!
//! `run` options:
//!
//! - `--results <dir>` - where the result file goes (default: `results`)
//! - `--rounds <n>` - feedback rounds; each reruns with feedback guidance (default: 1)
//! - `--judge` - also grade the run with the LLM judge
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` - required by `run`
//! - `OPENAI_BASE_URL` - OpenAI-compatible endpoint
//! - `SENTINEL_MODEL` - planner model (default: gpt-4o-mini)
//! - `SENTINEL_DAY` - day to seed the simulators with for `services`
//! - `RUST_LOG` - tracing filter (default: "info,sentinel_grid=debug")

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::json;

use sentinel_grid::agent::{AgentSystem, ScenarioInput};
use sentinel_grid::config::WorkshopConfig;
use sentinel_grid::feedback::{FeedbackConfig, FeedbackSystem};
use sentinel_grid::judge::{framework::measure_response_time, EvaluationFramework, LlmJudge};
use sentinel_grid::leaderboard::{load_results, summarize, ResultsWriter};
use sentinel_grid::llms::openai::{OpenAiCompletion, DEFAULT_MODEL};
use sentinel_grid::scenarios::{workshop_scenarios, ScenarioType};
use sentinel_grid::seed::DaySeedGenerator;
use sentinel_grid::services::scenario::ServiceEndpoints;
use sentinel_grid::services::{
    self, emergency_router, grid_router, scenario_router, traffic_router, EmergencyState, GridState, ScenarioState,
    TrafficState,
};

const USAGE: &str = "usage: sentinel <services | seed <day> | run <scenario> <day> [--results DIR] [--rounds N] [--judge] | score <results_dir>>";

fn parse_day(raw: Option<&String>) -> anyhow::Result<u32> {
    common::parse_day(raw.context(USAGE)?)
}

async fn run_services(config: &WorkshopConfig) -> anyhow::Result<()> {
    let day = common::day()?;
    let endpoints = ServiceEndpoints::from_config(config)?;
    tracing::info!("Starting all services for day {}", day);
    tokio::try_join!(
        services::serve(grid_router(GridState::new(day)), config.port("grid")?),
        services::serve(emergency_router(EmergencyState::new(day)), config.port("emergency")?),
        services::serve(traffic_router(TrafficState::new(day)), config.port("traffic")?),
        services::serve(scenario_router(ScenarioState::new(endpoints)), config.port("scenario")?),
    )?;
    Ok(())
}

struct RunOptions {
    results: PathBuf,
    rounds: usize,
    judge: bool,
}

impl RunOptions {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut options = Self {
            results: PathBuf::from("results"),
            rounds: 1,
            judge: false,
        };
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--results" => options.results = args.next().context("--results needs a directory")?.into(),
                "--rounds" => {
                    options.rounds = args.next().context("--rounds needs a number")?.parse()?;
                    if options.rounds == 0 {
                        bail!("--rounds must be at least 1");
                    }
                }
                "--judge" => options.judge = true,
                other => bail!("unknown option '{}'\n{}", other, USAGE),
            }
        }
        Ok(options)
    }
}

async fn run_scenario(config: &WorkshopConfig, scenario_type: ScenarioType, day: u32, options: RunOptions) -> anyhow::Result<()> {
    let model = std::env::var("SENTINEL_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let llm = Arc::new(OpenAiCompletion::from_env(model)?);
    let mut system = AgentSystem::from_config("sentinel", llm, config)?;
    let health = system.initialize().await;
    tracing::info!("Service health: {:?}", health);

    let ids = system.coordinator().actual_service_ids().await;
    let definition = workshop_scenarios(&ids).remove(scenario_type.workshop_scenario());
    let mut feedback = FeedbackSystem::new(FeedbackConfig::default(), u64::from(day));
    let mut guidance = None;
    let mut result = None;

    for round in 1..=options.rounds {
        if let Some(definition) = &definition {
            if !system.coordinator().activate_scenario(definition).await {
                tracing::warn!("Scenario '{}' could not be staged", definition.name);
            }
        }
        let mut input = ScenarioInput::new(scenario_type, day)?;
        input.definition = definition.clone();
        input.guidance = guidance.take();

        let (outcome, response_ms) = measure_response_time(system.invoke(&input)).await;
        let mut run = outcome?;
        let session = feedback.collect_session(scenario_type.as_str(), &run.commands);
        run.metrics.feedback_response = feedback.response_rate();
        run.details.insert("round".to_string(), json!(round));
        run.details.insert("feedback".to_string(), json!(session));
        run.details.insert("response_time_ms".to_string(), json!(response_ms));
        tracing::info!(
            "Round {}: score {:.3}, feedback {:.3}",
            round,
            run.metrics.final_score,
            session.overall_score
        );
        guidance = feedback.enhance_prompt("sentinel", None);
        result = Some((run, response_ms, session.overall_score));
    }
    let Some((mut result, response_ms, satisfaction)) = result else {
        bail!("no rounds were run");
    };

    if options.judge {
        if let Some(definition) = &definition {
            let mut framework = EvaluationFramework::new(LlmJudge::from_env()?);
            let state = system.coordinator().snapshot().await;
            let metrics = framework
                .evaluate(&result, definition, response_ms, &state, Some(satisfaction))
                .await;
            result.details.insert("judge".to_string(), json!(metrics));
            result
                .details
                .insert("judge_overall_score".to_string(), json!(metrics.overall_score()));
        }
    }
    if let Some(analysis) = feedback.analyze_patterns() {
        result.details.insert("feedback_analysis".to_string(), json!(analysis));
    }
    system.shutdown();

    let path = ResultsWriter::new(&options.results).write_scenario(&result)?;
    println!("{}", serde_json::to_string_pretty(&result.metrics)?);
    println!("Result written to {}", path.display());
    Ok(())
}

fn score(dir: &str) -> anyhow::Result<()> {
    let results = load_results(dir)?;
    if results.is_empty() {
        bail!("no scenario results found in {}", dir);
    }
    let summary = summarize(&results);
    let writer = ResultsWriter::new(dir);
    writer.write_summary(&summary)?;
    writer.write_experiment(&summary)?;

    println!("{:<6}{:<30}{:>8}{:>10}{:>8}", "Rank", "Scenario", "Score", "Coverage", "Steps");
    for row in &summary.leaderboard {
        println!(
            "{:<6}{:<30}{:>8.3}{:>10.2}{:>8}",
            format!("#{}", row.rank),
            row.scenario,
            row.final_score,
            row.incident_coverage,
            row.steps_taken
        );
    }
    println!(
        "\n{} runs, {:.0}% successful, average score {:.3}",
        summary.scenarios_run,
        summary.success_rate * 100.0,
        summary.average_final_score
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;
    common::init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("services") => run_services(&config).await,
        Some("seed") => {
            let day = parse_day(args.get(1))?;
            let generated = DaySeedGenerator::new(day).scenario_config();
            println!("{}", serde_json::to_string_pretty(&generated)?);
            Ok(())
        }
        Some("run") => {
            let scenario_type: ScenarioType = args.get(1).context(USAGE)?.parse()?;
            let day = parse_day(args.get(2))?;
            let options = RunOptions::parse(args.get(3..).unwrap_or_default())?;
            run_scenario(&config, scenario_type, day, options).await
        }
        Some("score") => score(args.get(1).context(USAGE)?),
        _ => bail!(USAGE),
    }
}
