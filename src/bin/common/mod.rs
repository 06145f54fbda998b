//! Startup shared by the workshop binaries.

#![allow(dead_code)]

use anyhow::Context;
use sentinel_grid::config::{VerbosityLevel, WorkshopConfig};
use sentinel_grid::seed::DaySeedGenerator;

const DEFAULT_LOG_FILTER: &str = "info,sentinel_grid=debug";

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins; otherwise a non-default verbosity picks the filter.
pub fn init_tracing(config: &WorkshopConfig) {
    let fallback = if config.verbosity == VerbosityLevel::default() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        config.log_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

/// Port for `service`: `PORT` if set, else the configured one.
pub fn port(config: &WorkshopConfig, service: &str) -> anyhow::Result<u16> {
    match std::env::var("PORT") {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(config.port(service)?),
    }
}

/// Day to seed the simulators with: `SENTINEL_DAY`, else today.
pub fn day() -> anyhow::Result<u32> {
    match std::env::var("SENTINEL_DAY") {
        Ok(raw) => parse_day(&raw).context("invalid SENTINEL_DAY"),
        Err(_) => Ok(DaySeedGenerator::today().day()),
    }
}

/// Parse a day of the month, rejecting anything outside 1..=31.
pub fn parse_day(raw: &str) -> anyhow::Result<u32> {
    let day: u32 = raw.trim().parse().with_context(|| format!("invalid day '{}'", raw))?;
    Ok(DaySeedGenerator::validate_day(day)?)
}
