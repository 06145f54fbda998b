//! NeoCatalis traffic control simulator.
//!
//! # Environment Variables
//!
//! - `PORT` / `SENTINEL_TRAFFIC_PORT` - HTTP port
//! - `SENTINEL_DAY` - day of the month to seed the city with (default: today)
//! - `RUST_LOG` - tracing filter (default: "info,sentinel_grid=debug")

mod common;

use sentinel_grid::config::WorkshopConfig;
use sentinel_grid::services::{self, traffic_router, TrafficState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;
    common::init_tracing(&config);

    let port = common::port(&config, "traffic")?;
    let day = common::day()?;
    tracing::info!("Traffic service starting for day {}", day);

    services::serve(traffic_router(TrafficState::new(day)), port).await?;
    Ok(())
}
