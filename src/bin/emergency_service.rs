//! NeoCatalis emergency drone dispatch simulator.
//!
//! # Environment Variables
//!
//! - `PORT` / `SENTINEL_EMERGENCY_PORT` - HTTP port
//! - `SENTINEL_DAY` - day of the month to seed the city with (default: today)
//! - `RUST_LOG` - tracing filter (default: "info,sentinel_grid=debug")

mod common;

use sentinel_grid::config::WorkshopConfig;
use sentinel_grid::services::{self, emergency_router, EmergencyState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;
    common::init_tracing(&config);

    let port = common::port(&config, "emergency")?;
    let day = common::day()?;
    tracing::info!("Emergency service starting for day {}", day);

    services::serve(emergency_router(EmergencyState::new(day)), port).await?;
    Ok(())
}
