//! NeoCatalis power grid simulator.
//!
//! # Environment Variables
//!
//! - `PORT` / `SENTINEL_GRID_PORT` - HTTP port
//! - `SENTINEL_DAY` - day of the month to seed the city with (default: today)
//! - `RUST_LOG` - tracing filter (default: "info,sentinel_grid=debug")

mod common;

use sentinel_grid::config::WorkshopConfig;
use sentinel_grid::services::{self, grid_router, GridState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;
    common::init_tracing(&config);

    let port = common::port(&config, "grid")?;
    let day = common::day()?;
    tracing::info!("Grid service starting for day {}", day);

    services::serve(grid_router(GridState::new(day)), port).await?;
    Ok(())
}
