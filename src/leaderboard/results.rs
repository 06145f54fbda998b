//! Scenario result files and their aggregate summary.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::LEADERBOARD_SIZE;
use crate::agent::ScenarioResult;
use crate::error::ResultsError;

pub const SUMMARY_FILE: &str = "summary.json";
pub const EXPERIMENT_FILE: &str = "workshop_experiment_results.json";

/// One ranked scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRanking {
    pub rank: usize,
    pub scenario: String,
    pub final_score: f64,
    pub incident_coverage: f64,
    pub average_eta: f64,
    pub capability_match: f64,
    pub latency_seconds: f64,
    pub steps_taken: usize,
    pub success: bool,
}

/// Leaderboard and aggregate statistics over scenario runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub generated_at: DateTime<Utc>,
    pub scenarios_run: usize,
    pub success_rate: f64,
    pub average_final_score: f64,
    pub average_coverage: f64,
    pub average_eta: f64,
    pub average_capability_match: f64,
    pub average_latency_seconds: f64,
    pub total_commands: usize,
    pub successful_commands: usize,
    /// The best runs by final score, highest first.
    pub leaderboard: Vec<ScenarioRanking>,
}

fn mean(results: &[ScenarioResult], metric: impl Fn(&ScenarioResult) -> f64) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(metric).sum::<f64>() / results.len() as f64
}

/// Rank runs and compute aggregate statistics.
pub fn summarize(results: &[ScenarioResult]) -> ResultsSummary {
    let mut ranked: Vec<&ScenarioResult> = results.iter().collect();
    ranked.sort_by(|a, b| b.metrics.final_score.total_cmp(&a.metrics.final_score));
    let leaderboard = ranked
        .into_iter()
        .take(LEADERBOARD_SIZE)
        .enumerate()
        .map(|(i, r)| ScenarioRanking {
            rank: i + 1,
            scenario: r.scenario_type.to_string(),
            final_score: r.metrics.final_score,
            incident_coverage: r.metrics.incident_coverage,
            average_eta: r.metrics.average_eta,
            capability_match: r.metrics.capability_match,
            latency_seconds: r.metrics.latency_seconds,
            steps_taken: r.metrics.steps_taken,
            success: r.success,
        })
        .collect();

    ResultsSummary {
        generated_at: Utc::now(),
        scenarios_run: results.len(),
        success_rate: mean(results, |r| if r.success { 1.0 } else { 0.0 }),
        average_final_score: mean(results, |r| r.metrics.final_score),
        average_coverage: mean(results, |r| r.metrics.incident_coverage),
        average_eta: mean(results, |r| r.metrics.average_eta),
        average_capability_match: mean(results, |r| r.metrics.capability_match),
        average_latency_seconds: mean(results, |r| r.metrics.latency_seconds),
        total_commands: results.iter().map(|r| r.metrics.command_count).sum(),
        successful_commands: results.iter().map(|r| r.metrics.successful_commands).sum(),
        leaderboard,
    }
}

/// Read every scenario result file in `dir`.
///
/// Summary files and files that are not scenario results are skipped.
pub fn load_results(dir: impl AsRef<Path>) -> Result<Vec<ScenarioResult>, ResultsError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n != SUMMARY_FILE && n != EXPERIMENT_FILE)
        })
        .collect();
    paths.sort();

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<ScenarioResult>(&text) {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    tracing::debug!("Loaded {} scenario results from {}", results.len(), dir.as_ref().display());
    Ok(results)
}

/// Writes run outputs under one directory.
#[derive(Debug, Clone)]
pub struct ResultsWriter {
    dir: PathBuf,
}

impl ResultsWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_json(&self, name: &str, value: &impl Serialize) -> Result<PathBuf, ResultsError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        tracing::info!("Wrote {}", path.display());
        Ok(path)
    }

    /// One file per scenario run.
    pub fn write_scenario(&self, result: &ScenarioResult) -> Result<PathBuf, ResultsError> {
        result.save_to_file(&self.dir)
    }

    pub fn write_summary(&self, summary: &ResultsSummary) -> Result<PathBuf, ResultsError> {
        self.write_json(SUMMARY_FILE, summary)
    }

    /// The experiment record: a timestamp and the summary.
    pub fn write_experiment(&self, summary: &ResultsSummary) -> Result<PathBuf, ResultsError> {
        let record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "summary": summary,
        });
        self.write_json(EXPERIMENT_FILE, &record)
    }

    /// Write every run plus the summary and experiment files.
    pub fn write_all(&self, results: &[ScenarioResult]) -> Result<ResultsSummary, ResultsError> {
        for result in results {
            self.write_scenario(result)?;
        }
        let summary = summarize(results);
        self.write_summary(&summary)?;
        self.write_experiment(&summary)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::ScenarioType;

    fn run(scenario_type: ScenarioType, score: f64, success: bool) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario_type);
        result.success = success;
        result.metrics.final_score = score;
        result.metrics.incident_coverage = score;
        result.metrics.command_count = 2;
        result.metrics.successful_commands = if success { 2 } else { 1 };
        result
    }

    #[test]
    fn test_summarize_ranks_and_averages() {
        let results = vec![
            run(ScenarioType::GridSurge, 0.4, true),
            run(ScenarioType::DroneCapacity, 0.9, true),
            run(ScenarioType::FloodDisruption, 0.5, false),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.scenarios_run, 3);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.average_final_score - 0.6).abs() < 1e-9);
        assert_eq!(summary.total_commands, 6);
        assert_eq!(summary.successful_commands, 5);
        assert_eq!(summary.leaderboard[0].scenario, "drone_capacity_crisis");
        assert_eq!(summary.leaderboard[0].rank, 1);
        assert_eq!(summary.leaderboard[2].scenario, "grid_surge_heat_wave");
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = summarize(&[]);
        assert_eq!(summary.scenarios_run, 0);
        assert_eq!(summary.average_final_score, 0.0);
        assert!(summary.leaderboard.is_empty());
    }

    #[test]
    fn test_leaderboard_keeps_top_entries() {
        let results: Vec<ScenarioResult> = (0..15)
            .map(|i| run(ScenarioType::CityWideDrill, i as f64 / 15.0, true))
            .collect();
        let summary = summarize(&results);
        assert_eq!(summary.leaderboard.len(), LEADERBOARD_SIZE);
        assert!((summary.leaderboard[0].final_score - 14.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_all_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::new(dir.path().join("out"));
        let results = vec![
            run(ScenarioType::GridSurge, 0.4, true),
            run(ScenarioType::MedicalEmergency, 0.8, true),
        ];
        let summary = writer.write_all(&results).unwrap();
        assert_eq!(summary.scenarios_run, 2);

        let summary_path = writer.dir().join(SUMMARY_FILE);
        let saved: ResultsSummary = serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(saved.leaderboard.len(), 2);

        let experiment: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(writer.dir().join(EXPERIMENT_FILE)).unwrap()).unwrap();
        assert!(experiment["timestamp"].is_string());
        assert_eq!(experiment["summary"]["scenarios_run"], 2);

        std::fs::write(writer.dir().join("notes.json"), "{\"not\": \"a result\"}").unwrap();
        let mut loaded = load_results(writer.dir()).unwrap();
        loaded.sort_by(|a, b| a.metrics.final_score.total_cmp(&b.metrics.final_score));
        assert_eq!(loaded, results);
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_results(dir.path().join("absent")), Err(ResultsError::Io(_))));
    }
}
