//! Workshop configuration: verbosity, service ports and display toggles.
//!
//! Everything is read from the environment once via
//! [`WorkshopConfig::from_env`]. Binaries feed
//! [`WorkshopConfig::log_filter`] into `tracing_subscriber::EnvFilter` when
//! `RUST_LOG` is not set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default host the simulators are reached on.
pub const DEFAULT_BASE_URL: &str = "http://localhost";

/// Default service ports.
pub const DEFAULT_PORTS: [(&str, u16); 5] = [
    ("weather", 8001),
    ("grid", 8002),
    ("emergency", 8003),
    ("traffic", 8004),
    ("scenario", 8005),
];

/// How chatty the workshop runner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbosityLevel {
    Silent,
    Minimal,
    Normal,
    Verbose,
    Debug,
}

impl Default for VerbosityLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl VerbosityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Minimal => "minimal",
            Self::Normal => "normal",
            Self::Verbose => "verbose",
            Self::Debug => "debug",
        }
    }

    /// The tracing filter directive this level maps to.
    pub fn log_directive(&self) -> &'static str {
        match self {
            Self::Silent => "error",
            Self::Minimal => "warn",
            Self::Normal => "info",
            Self::Verbose | Self::Debug => "debug",
        }
    }
}

impl fmt::Display for VerbosityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerbosityLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "minimal" => Ok(Self::Minimal),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            _ => Err(ConfigError::InvalidVerbosity {
                value: s.to_string(),
            }),
        }
    }
}

/// Output features that can be toggled per verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayFeature {
    Commands,
    ApiCalls,
    Progress,
    Panels,
    States,
}

impl FromStr for DisplayFeature {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commands" => Ok(Self::Commands),
            "api_calls" => Ok(Self::ApiCalls),
            "progress" => Ok(Self::Progress),
            "panels" => Ok(Self::Panels),
            "states" => Ok(Self::States),
            other => Err(ConfigError::UnknownFeature {
                name: other.to_string(),
            }),
        }
    }
}

/// Per-feature display toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayToggles {
    pub show_commands: bool,
    pub show_api_calls: bool,
    pub show_progress: bool,
    pub show_panels: bool,
    pub show_states: bool,
}

impl Default for DisplayToggles {
    fn default() -> Self {
        Self {
            show_commands: false,
            show_api_calls: false,
            show_progress: true,
            show_panels: true,
            show_states: false,
        }
    }
}

impl DisplayToggles {
    /// Toggles tuned for a verbosity level.
    pub fn for_verbosity(level: VerbosityLevel) -> Self {
        match level {
            VerbosityLevel::Silent => Self {
                show_commands: false,
                show_api_calls: false,
                show_progress: false,
                show_panels: false,
                show_states: false,
            },
            VerbosityLevel::Minimal => Self {
                show_progress: true,
                show_panels: false,
                ..Self::default()
            },
            VerbosityLevel::Normal => Self::default(),
            VerbosityLevel::Verbose => Self {
                show_commands: true,
                show_states: true,
                ..Self::default()
            },
            VerbosityLevel::Debug => Self {
                show_commands: true,
                show_api_calls: true,
                show_progress: true,
                show_panels: true,
                show_states: true,
            },
        }
    }

    fn get(&self, feature: DisplayFeature) -> bool {
        match feature {
            DisplayFeature::Commands => self.show_commands,
            DisplayFeature::ApiCalls => self.show_api_calls,
            DisplayFeature::Progress => self.show_progress,
            DisplayFeature::Panels => self.show_panels,
            DisplayFeature::States => self.show_states,
        }
    }
}

/// Workshop-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopConfig {
    pub verbosity: VerbosityLevel,
    pub base_url: String,
    pub ports: BTreeMap<String, u16>,
    pub display: DisplayToggles,
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            verbosity: VerbosityLevel::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            ports: DEFAULT_PORTS
                .iter()
                .map(|(name, port)| (name.to_string(), *port))
                .collect(),
            display: DisplayToggles::default(),
        }
    }
}

impl WorkshopConfig {
    /// Build the configuration from environment variables.
    ///
    /// - `VERBOSITY_LEVEL` / `SENTINEL_VERBOSITY`: verbosity (default `normal`)
    /// - `SENTINEL_BASE_URL`: host the services are reached on
    /// - `SENTINEL_<SERVICE>_PORT`: per-service port override
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = std::env::var("VERBOSITY_LEVEL")
            .ok()
            .or_else(|| std::env::var("SENTINEL_VERBOSITY").ok())
        {
            config.verbosity = raw.parse()?;
            config.display = DisplayToggles::for_verbosity(config.verbosity);
        }

        if let Ok(base) = std::env::var("SENTINEL_BASE_URL") {
            config.base_url = base.trim_end_matches('/').to_string();
        }

        for (name, port) in config.ports.iter_mut() {
            let key = format!("SENTINEL_{}_PORT", name.to_uppercase());
            if let Ok(raw) = std::env::var(&key) {
                *port = raw.parse().map_err(|_| ConfigError::InvalidPort {
                    service: name.clone(),
                    value: raw.clone(),
                })?;
            }
        }

        Ok(config)
    }

    /// Port of a named service.
    pub fn port(&self, service: &str) -> Result<u16, ConfigError> {
        self.ports
            .get(service)
            .copied()
            .ok_or_else(|| ConfigError::UnknownService {
                name: service.to_string(),
            })
    }

    /// Full base URL of a named service, e.g. `http://localhost:8002`.
    pub fn service_url(&self, service: &str) -> Result<String, ConfigError> {
        Ok(format!("{}:{}", self.base_url, self.port(service)?))
    }

    /// Whether a display feature should be shown at the current verbosity.
    pub fn should_show(&self, feature: DisplayFeature) -> bool {
        match self.verbosity {
            VerbosityLevel::Debug => true,
            VerbosityLevel::Silent => false,
            VerbosityLevel::Minimal
                if matches!(
                    feature,
                    DisplayFeature::ApiCalls | DisplayFeature::Commands | DisplayFeature::States
                ) =>
            {
                false
            }
            _ => self.display.get(feature),
        }
    }

    /// Default `EnvFilter` directive for this configuration.
    pub fn log_filter(&self) -> String {
        let level = self.verbosity.log_directive();
        format!("{level},sentinel_grid={level}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = WorkshopConfig::default();
        assert_eq!(config.port("grid").unwrap(), 8002);
        assert_eq!(config.port("weather").unwrap(), 8001);
        assert_eq!(
            config.service_url("scenario").unwrap(),
            "http://localhost:8005"
        );
    }

    #[test]
    fn test_unknown_service_is_an_error() {
        let config = WorkshopConfig::default();
        let err = config.service_url("power").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownService { .. }));
    }

    #[test]
    fn test_verbosity_parsing() {
        assert_eq!("DEBUG".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Debug);
        assert_eq!(" minimal ".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Minimal);
        assert!("loud".parse::<VerbosityLevel>().is_err());
    }

    #[test]
    fn test_log_directive_mapping() {
        assert_eq!(VerbosityLevel::Silent.log_directive(), "error");
        assert_eq!(VerbosityLevel::Minimal.log_directive(), "warn");
        assert_eq!(VerbosityLevel::Normal.log_directive(), "info");
        assert_eq!(VerbosityLevel::Verbose.log_directive(), "debug");
    }

    #[test]
    fn test_should_show_by_level() {
        let mut config = WorkshopConfig::default();
        assert!(config.should_show(DisplayFeature::Progress));
        assert!(!config.should_show(DisplayFeature::Commands));

        config.verbosity = VerbosityLevel::Debug;
        assert!(config.should_show(DisplayFeature::ApiCalls));

        config.verbosity = VerbosityLevel::Silent;
        assert!(!config.should_show(DisplayFeature::Progress));

        config.verbosity = VerbosityLevel::Minimal;
        config.display.show_commands = true;
        assert!(!config.should_show(DisplayFeature::Commands));
        assert!(config.should_show(DisplayFeature::Panels));
    }

    #[test]
    fn test_feature_names() {
        assert_eq!(
            "api_calls".parse::<DisplayFeature>().unwrap(),
            DisplayFeature::ApiCalls
        );
        assert!("colors".parse::<DisplayFeature>().is_err());
    }
}
