//! NeoCatalis scenario manager.
//!
//! Stores scenario definitions and activates them by pushing their state to
//! the grid, emergency and traffic services.
//!
//! # Environment Variables
//!
//! - `PORT` / `SENTINEL_SCENARIO_PORT` - HTTP port
//! - `SENTINEL_BASE_URL`, `SENTINEL_<SERVICE>_PORT` - where the other services live
//! - `RUST_LOG` - tracing filter (default: "info,sentinel_grid=debug")

mod common;

use sentinel_grid::config::WorkshopConfig;
use sentinel_grid::services::scenario::ServiceEndpoints;
use sentinel_grid::services::{self, scenario_router, ScenarioState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;
    common::init_tracing(&config);

    let port = common::port(&config, "scenario")?;
    let endpoints = ServiceEndpoints::from_config(&config)?;
    tracing::info!("Scenario service managing {:?}", endpoints);

    services::serve(scenario_router(ScenarioState::new(endpoints)), port).await?;
    Ok(())
}
