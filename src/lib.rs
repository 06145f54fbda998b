//! # SENTINEL GRID
//!
//! Crisis-management workshop backend for the city of NeoCatalis.
//!
//! The crate has these parts:
//!
//! - HTTP simulators for the power grid, the emergency drone fleet, traffic
//!   control and a scenario manager ([`services`])
//! - a deterministic per-day city generator ([`seed`])
//! - the command model and its executor ([`command`])
//! - an LLM-driven agent system that plans and acts through the simulators
//!   ([`agent`], [`llms`])
//! - scoring of what the agent did: the action-log [`scorer`], the scenario
//!   [`evaluator`], an LLM [`judge`] and simulated expert [`feedback`]
//! - a [`leaderboard`] that aggregates results on disk

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod feedback;
pub mod judge;
pub mod leaderboard;
pub mod llms;
pub mod models;
pub mod scenarios;
pub mod scorer;
pub mod seed;
pub mod services;

pub use agent::{AgentMetrics, AgentSystem, ScenarioInput, ScenarioResult};
pub use command::{Command, CommandExecutor, CommandResult, ServiceType};
pub use config::WorkshopConfig;
pub use error::{Result, SentinelError};
pub use llms::{Llm, LlmMessage, OpenAiCompletion};
pub use scenarios::ScenarioType;
pub use scorer::{score_actions, GroundTruth, ScoreRecord};
pub use seed::DaySeedGenerator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
