//! Records held by the service simulators.
//!
//! These mirror the JSON each simulator serves from `/state/get`, so field
//! names follow the wire format (`capacity_kw`, `congestion_level`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stability assumed for a zone that has never been adjusted.
pub const DEFAULT_STABILITY: f64 = 0.5;

/// Travel-time multiplier applied to a blocked sector.
pub const BLOCKED_MULTIPLIER: f64 = 5.0;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Every accepted value, for error messages.
            pub fn names() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "{} must be one of: {:?} (got '{}')",
                        stringify!($name),
                        Self::names(),
                        other
                    )),
                }
            }
        }
    };
}

string_enum!(
    /// Incident lifecycle.
    IncidentStatus {
        Active => "active",
        Assigned => "assigned",
        InProgress => "in_progress",
        Resolved => "resolved",
        Canceled => "canceled",
    }
);

string_enum!(
    /// Drone lifecycle.
    DroneStatus {
        Available => "available",
        Assigned => "assigned",
        EnRoute => "en_route",
        OnSite => "on_site",
        Returning => "returning",
        Maintenance => "maintenance",
        Disabled => "disabled",
    }
);

string_enum!(
    /// Sector flow classification.
    TrafficStatus {
        Clear => "clear",
        Moderate => "moderate",
        Heavy => "heavy",
        Gridlock => "gridlock",
        Blocked => "blocked",
    }
);

string_enum!(
    /// Infrastructure power priority.
    PriorityLevel {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

impl TrafficStatus {
    /// Classify an unblocked sector by congestion.
    pub fn from_congestion(congestion: f64) -> Self {
        if congestion < 0.3 {
            Self::Clear
        } else if congestion < 0.6 {
            Self::Moderate
        } else if congestion < 0.9 {
            Self::Heavy
        } else {
            Self::Gridlock
        }
    }
}

/// Travel-time multiplier for an unblocked sector.
pub fn travel_multiplier(congestion: f64) -> f64 {
    1.0 + congestion * 2.0
}

/// A grid zone as held by the grid simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridZone {
    pub zone_id: String,
    pub status: String,
    pub capacity_kw: f64,
    pub current_load_kw: f64,
    #[serde(default)]
    pub is_critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity_kw: Option<f64>,
}

impl GridZone {
    pub fn stability(&self) -> f64 {
        self.stability.unwrap_or(DEFAULT_STABILITY)
    }

    pub fn load_ratio(&self) -> f64 {
        if self.capacity_kw > 0.0 {
            self.current_load_kw / self.capacity_kw
        } else {
            0.0
        }
    }
}

/// A piece of critical infrastructure with a power priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infrastructure {
    pub infrastructure_id: String,
    pub level: PriorityLevel,
    pub estimated_load_kw: f64,
}

impl Infrastructure {
    pub fn new(id: &str, level: PriorityLevel, estimated_load_kw: f64) -> Self {
        Self {
            infrastructure_id: id.to_string(),
            level,
            estimated_load_kw,
        }
    }
}

/// An emergency incident as held by the emergency simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub urgency: String,
    pub zone: String,
    #[serde(default = "default_resolution_minutes")]
    pub estimated_resolution_minutes: u32,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub status: IncidentStatus,
    #[serde(default)]
    pub assigned_drone: Option<String>,
}

fn default_resolution_minutes() -> u32 {
    30
}

/// A drone as held by the emergency simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub drone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub speed_kph: f64,
    pub status: DroneStatus,
    pub current_location: String,
    #[serde(default)]
    pub assigned_incident: Option<String>,
}

impl Drone {
    /// Whether the drone carries every capability in `required`.
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }
}

/// A traffic sector as held by the traffic simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSector {
    pub sector_id: String,
    pub status: TrafficStatus,
    pub congestion_level: f64,
    #[serde(default)]
    pub is_blocked: bool,
    pub travel_time_multiplier: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_end_time: Option<i64>,
}

/// Weather report produced by the day seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub conditions: String,
    pub temperature_c: f64,
    pub wind_speed_kph: f64,
    pub precipitation_mm: f64,
    pub advisories: Vec<String>,
}
