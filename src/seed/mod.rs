//! Deterministic day-seeded scenario generation.
//!
//! Every draw is keyed by the day and a context string, so a given day always
//! yields the same city while different days differ. The RNG for a context is
//! seeded from the first 8 bytes of `sha256("neocatalis-{day}-{context}")`.

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ScenarioError;
use crate::models::records::{travel_multiplier, BLOCKED_MULTIPLIER};
use crate::models::{Drone, DroneStatus, GridZone, Incident, IncidentStatus, TrafficSector, TrafficStatus, WeatherReport};

pub const DEFAULT_ZONES: usize = 10;
pub const DEFAULT_INCIDENTS: usize = 15;
pub const DEFAULT_SECTORS: usize = 10;
pub const DEFAULT_DRONES: usize = 5;

const INCIDENT_TYPES: [&str; 5] = ["medical", "fire", "police", "infrastructure", "hazmat"];
const URGENCY_LEVELS: [&str; 4] = ["low", "medium", "high", "critical"];
const URGENCY_WEIGHTS: [f64; 4] = [0.2, 0.4, 0.3, 0.1];
const WEATHER_TYPES: [&str; 5] = ["clear", "cloudy", "rainy", "stormy", "heat_wave"];
const WEATHER_WEIGHTS: [f64; 5] = [0.4, 0.3, 0.15, 0.05, 0.1];
const ZONE_STATUSES: [&str; 6] = ["online", "online", "online", "online", "degraded", "offline"];
const DRONE_VERSIONS: [&str; 3] = ["v1", "v2", "v3"];

/// Generates the city for a given day.
#[derive(Debug, Clone)]
pub struct DaySeedGenerator {
    day: u32,
    base_seed: String,
}

/// Everything the generator produces for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub day: u32,
    pub seed: String,
    pub zones: BTreeMap<String, GridZone>,
    pub weather: WeatherReport,
    pub incidents: Vec<Incident>,
    pub sectors: BTreeMap<String, TrafficSector>,
    pub drones: BTreeMap<String, Drone>,
}

impl DaySeedGenerator {
    pub fn new(day: u32) -> Self {
        Self {
            day,
            base_seed: format!("neocatalis-{}", day),
        }
    }

    /// Check that `day` is a day of the month.
    pub fn validate_day(day: u32) -> Result<u32, ScenarioError> {
        if (1..=31).contains(&day) {
            Ok(day)
        } else {
            Err(ScenarioError::InvalidDay(day))
        }
    }

    /// Generator for today's day of month.
    pub fn today() -> Self {
        use chrono::Datelike;
        Self::new(chrono::Local::now().day())
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// Hex digest identifying this day's seed.
    pub fn seed_hex(&self) -> String {
        hex::encode(Sha256::digest(self.base_seed.as_bytes()))
    }

    /// Seed for `context`: the first 8 bytes of the digest, little-endian.
    fn context_seed(&self, context: &str) -> u64 {
        let digest = Sha256::digest(format!("{}-{}", self.base_seed, context).as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }

    fn rng(&self, context: &str) -> StdRng {
        StdRng::seed_from_u64(self.context_seed(context))
    }

    /// Uniform integer in `[min, max]`.
    pub fn random_int(&self, min: i64, max: i64, context: &str) -> i64 {
        self.rng(context).gen_range(min..=max)
    }

    /// Uniform float in `[min, max)`.
    pub fn random_float(&self, min: f64, max: f64, context: &str) -> f64 {
        min + self.rng(context).gen::<f64>() * (max - min)
    }

    pub fn random_choice<'a, T>(&self, options: &'a [T], context: &str) -> Option<&'a T> {
        options.choose(&mut self.rng(context))
    }

    pub fn weighted_choice<'a, T>(&self, options: &'a [T], weights: &[f64], context: &str) -> Option<&'a T> {
        let dist = WeightedIndex::new(weights).ok()?;
        options.get(dist.sample(&mut self.rng(context)))
    }

    /// Power grid zones `Z001..`.
    pub fn generate_grid_data(&self, num_zones: usize) -> BTreeMap<String, GridZone> {
        let base_load = self.random_float(0.6, 0.9, "grid-base-load");
        (1..=num_zones)
            .map(|i| {
                let zone_id = format!("Z{:03}", i);
                let capacity = self.random_int(80, 120, &format!("capacity-{}", zone_id)) as f64;
                let load = (capacity * base_load * self.random_float(0.7, 1.3, &format!("load-{}", zone_id))).floor();
                let status = self
                    .random_choice(&ZONE_STATUSES, &format!("status-{}", zone_id))
                    .copied()
                    .unwrap_or("online");
                let is_critical = self.random_float(0.0, 1.0, &format!("critical-{}", zone_id)) < 0.3;
                let zone = GridZone {
                    zone_id: zone_id.clone(),
                    status: status.to_string(),
                    capacity_kw: capacity,
                    current_load_kw: load,
                    is_critical,
                    stability: None,
                    max_capacity_kw: None,
                };
                (zone_id, zone)
            })
            .collect()
    }

    /// Weather over the city with advisories.
    pub fn generate_weather_data(&self) -> WeatherReport {
        let kind = self
            .weighted_choice(&WEATHER_TYPES, &WEATHER_WEIGHTS, "weather-type")
            .copied()
            .unwrap_or("clear");

        let (temperature, wind, precip) = match kind {
            "cloudy" => (
                self.random_float(10.0, 20.0, "temp-cloudy"),
                self.random_float(5.0, 15.0, "wind-cloudy"),
                self.random_float(0.0, 0.1, "precip-cloudy"),
            ),
            "rainy" => (
                self.random_float(5.0, 15.0, "temp-rainy"),
                self.random_float(10.0, 25.0, "wind-rainy"),
                self.random_float(0.3, 0.7, "precip-rainy"),
            ),
            "stormy" => (
                self.random_float(5.0, 15.0, "temp-stormy"),
                self.random_float(25.0, 45.0, "wind-stormy"),
                self.random_float(0.7, 1.0, "precip-stormy"),
            ),
            "heat_wave" => (
                self.random_float(30.0, 40.0, "temp-heat"),
                self.random_float(0.0, 5.0, "wind-heat"),
                0.0,
            ),
            _ => (
                self.random_float(15.0, 25.0, "temp-clear"),
                self.random_float(0.0, 10.0, "wind-clear"),
                0.0,
            ),
        };

        let mut advisories = Vec::new();
        match kind {
            "stormy" => {
                advisories.push("thunderstorm_warning".to_string());
                if self.random_float(0.0, 1.0, "advisory-flood") > 0.7 {
                    advisories.push("flood_warning".to_string());
                }
            }
            "heat_wave" => {
                advisories.push("heat_advisory".to_string());
                if self.random_float(0.0, 1.0, "advisory-power") > 0.6 {
                    advisories.push("power_conservation_notice".to_string());
                }
            }
            "rainy" if precip > 0.5 => {
                if self.random_float(0.0, 1.0, "advisory-flood") > 0.7 {
                    advisories.push("flood_watch".to_string());
                }
            }
            _ => {}
        }

        WeatherReport {
            conditions: kind.to_string(),
            temperature_c: round_to(temperature, 1),
            wind_speed_kph: round_to(wind, 1),
            precipitation_mm: round_to(precip * 10.0, 1),
            advisories,
        }
    }

    /// Emergency incidents `E-1001..`, all active.
    pub fn generate_emergency_incidents(&self, num_incidents: usize) -> Vec<Incident> {
        let city_zones: Vec<String> = (1..=10).map(|i| format!("Z{:03}", i)).collect();

        (1..=num_incidents)
            .map(|i| {
                let incident_id = format!("E-{}", 1000 + i);
                let kind = self
                    .random_choice(&INCIDENT_TYPES, &format!("incident-type-{}", incident_id))
                    .copied()
                    .unwrap_or("medical");
                let urgency = self
                    .weighted_choice(&URGENCY_LEVELS, &URGENCY_WEIGHTS, &format!("incident-urgency-{}", incident_id))
                    .copied()
                    .unwrap_or("medium");
                let zone = self
                    .random_choice(&city_zones, &format!("incident-zone-{}", incident_id))
                    .cloned()
                    .unwrap_or_else(|| "Z001".to_string());

                let base_minutes = match kind {
                    "medical" => 20.0,
                    "fire" => 45.0,
                    "police" => 30.0,
                    "infrastructure" => 60.0,
                    _ => 90.0,
                };
                let urgency_factor = match urgency {
                    "low" => 0.8,
                    "high" => 1.2,
                    "critical" => 1.5,
                    _ => 1.0,
                };
                let jitter = self.random_float(0.8, 1.2, &format!("resolution-{}", incident_id));
                let estimated_resolution_minutes = (base_minutes * urgency_factor * jitter) as u32;

                let mut required_capabilities = Vec::new();
                match kind {
                    "medical" => required_capabilities.push("medical_kit".to_string()),
                    "fire" => {
                        required_capabilities.push("thermal_imaging".to_string());
                        if self.random_float(0.0, 1.0, &format!("water-{}", incident_id)) > 0.7 {
                            required_capabilities.push("water_dispersal".to_string());
                        }
                    }
                    "hazmat" => required_capabilities.push("hazmat_sensors".to_string()),
                    _ => {}
                }
                if matches!(urgency, "high" | "critical") {
                    required_capabilities.push("high_speed".to_string());
                }

                Incident {
                    incident_id,
                    incident_type: kind.to_string(),
                    urgency: urgency.to_string(),
                    zone,
                    estimated_resolution_minutes,
                    required_capabilities,
                    status: IncidentStatus::Active,
                    assigned_drone: None,
                }
            })
            .collect()
    }

    /// Traffic sectors `S001..`.
    pub fn generate_traffic_data(&self, num_sectors: usize) -> BTreeMap<String, TrafficSector> {
        let base = self.random_float(0.3, 0.7, "traffic-base");
        (1..=num_sectors)
            .map(|i| {
                let sector_id = format!("S{:03}", i);
                let congestion = (base * self.random_float(0.5, 1.5, &format!("congestion-{}", sector_id))).min(1.0);
                let is_blocked = self.random_float(0.0, 1.0, &format!("blocked-{}", sector_id)) > 0.9;
                let (status, multiplier) = if is_blocked {
                    (TrafficStatus::Blocked, BLOCKED_MULTIPLIER)
                } else {
                    (TrafficStatus::from_congestion(congestion), travel_multiplier(congestion))
                };
                let sector = TrafficSector {
                    sector_id: sector_id.clone(),
                    status,
                    congestion_level: round_to(congestion, 2),
                    is_blocked,
                    travel_time_multiplier: round_to(multiplier, 1),
                    block_reason: None,
                    block_duration_minutes: None,
                    block_end_time: None,
                };
                (sector_id, sector)
            })
            .collect()
    }

    /// Drone fleet `D001..`.
    pub fn generate_drone_fleet(&self, num_drones: usize) -> BTreeMap<String, Drone> {
        let sectors: Vec<String> = (1..=10).map(|j| format!("S{:03}", j)).collect();

        (1..=num_drones)
            .map(|i| {
                let drone_id = format!("D{:03}", i);
                let version = self
                    .random_choice(&DRONE_VERSIONS, &format!("drone-version-{}", drone_id))
                    .copied()
                    .unwrap_or("v1");
                let (capabilities, base_speed): (&[&str], f64) = match version {
                    "v3" => (
                        &[
                            "advanced_camera",
                            "medical_kit",
                            "thermal_imaging",
                            "water_dispersal",
                            "hazmat_sensors",
                            "high_speed",
                            "weather_resistant",
                        ],
                        70.0,
                    ),
                    "v2" => (&["basic_camera", "medical_kit", "thermal_imaging", "high_speed"], 50.0),
                    _ => (&["basic_camera", "medical_kit"], 30.0),
                };
                let speed = base_speed * self.random_float(0.9, 1.1, &format!("drone-speed-{}", drone_id));
                let location = self
                    .random_choice(&sectors, &format!("drone-location-{}", drone_id))
                    .cloned()
                    .unwrap_or_else(|| "S001".to_string());

                let drone = Drone {
                    drone_id: drone_id.clone(),
                    version: Some(version.to_string()),
                    capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                    speed_kph: round_to(speed, 1),
                    status: DroneStatus::Available,
                    current_location: location,
                    assigned_incident: None,
                };
                (drone_id, drone)
            })
            .collect()
    }

    /// The full city for this day with default sizes.
    pub fn scenario_config(&self) -> ScenarioConfig {
        ScenarioConfig {
            day: self.day,
            seed: self.seed_hex(),
            zones: self.generate_grid_data(DEFAULT_ZONES),
            weather: self.generate_weather_data(),
            incidents: self.generate_emergency_incidents(DEFAULT_INCIDENTS),
            sectors: self.generate_traffic_data(DEFAULT_SECTORS),
            drones: self.generate_drone_fleet(DEFAULT_DRONES),
        }
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_day_is_deterministic() {
        let a = DaySeedGenerator::new(5).scenario_config();
        let b = DaySeedGenerator::new(5).scenario_config();
        assert_eq!(a.zones, b.zones);
        assert_eq!(a.incidents, b.incidents);
        assert_eq!(a.weather, b.weather);
        assert_eq!(a.seed, b.seed);
    }

    #[test]
    fn test_rng_seeded_from_leading_digest_bytes() {
        let generator = DaySeedGenerator::new(7);
        let digest = Sha256::digest(b"neocatalis-7-zone-capacity");
        let expected = u64::from_le_bytes(digest[..8].try_into().unwrap());
        assert_eq!(generator.context_seed("zone-capacity"), expected);

        let mut rng = StdRng::seed_from_u64(expected);
        assert_eq!(generator.random_int(0, 1_000_000, "zone-capacity"), rng.gen_range(0..=1_000_000));
    }

    #[test]
    fn test_validate_day_bounds() {
        assert_eq!(DaySeedGenerator::validate_day(1).unwrap(), 1);
        assert_eq!(DaySeedGenerator::validate_day(31).unwrap(), 31);
        assert!(matches!(DaySeedGenerator::validate_day(0), Err(ScenarioError::InvalidDay(0))));
        assert!(matches!(DaySeedGenerator::validate_day(32), Err(ScenarioError::InvalidDay(32))));
    }

    #[test]
    fn test_different_days_differ() {
        let a = DaySeedGenerator::new(1).generate_grid_data(10);
        let b = DaySeedGenerator::new(2).generate_grid_data(10);
        assert_ne!(a, b);
    }

    #[test]
    fn test_grid_zone_ranges() {
        let zones = DaySeedGenerator::new(12).generate_grid_data(10);
        assert_eq!(zones.len(), 10);
        assert!(zones.contains_key("Z001") && zones.contains_key("Z010"));
        for zone in zones.values() {
            assert!((80.0..=120.0).contains(&zone.capacity_kw));
            // base load <= 0.9 and jitter <= 1.3
            assert!(zone.current_load_kw <= zone.capacity_kw * 0.9 * 1.3);
            assert!(["online", "degraded", "offline"].contains(&zone.status.as_str()));
            assert!(zone.stability.is_none());
        }
    }

    #[test]
    fn test_incidents_have_consistent_capabilities() {
        let incidents = DaySeedGenerator::new(7).generate_emergency_incidents(15);
        assert_eq!(incidents.len(), 15);
        assert_eq!(incidents[0].incident_id, "E-1001");
        for incident in &incidents {
            assert_eq!(incident.status, IncidentStatus::Active);
            match incident.incident_type.as_str() {
                "medical" => assert!(incident.required_capabilities.contains(&"medical_kit".to_string())),
                "fire" => assert!(incident.required_capabilities.contains(&"thermal_imaging".to_string())),
                "hazmat" => assert!(incident.required_capabilities.contains(&"hazmat_sensors".to_string())),
                _ => {}
            }
            if matches!(incident.urgency.as_str(), "high" | "critical") {
                assert!(incident.required_capabilities.contains(&"high_speed".to_string()));
            }
            assert!(incident.estimated_resolution_minutes >= 12);
            assert!(incident.estimated_resolution_minutes <= 162);
        }
    }

    #[test]
    fn test_traffic_sector_multipliers() {
        let sectors = DaySeedGenerator::new(3).generate_traffic_data(10);
        for sector in sectors.values() {
            assert!((0.0..=1.0).contains(&sector.congestion_level));
            if sector.is_blocked {
                assert_eq!(sector.status, TrafficStatus::Blocked);
                assert_eq!(sector.travel_time_multiplier, BLOCKED_MULTIPLIER);
            } else {
                assert!(sector.travel_time_multiplier >= 1.0 && sector.travel_time_multiplier <= 3.0);
            }
        }
    }

    #[test]
    fn test_drone_fleet_versions() {
        let drones = DaySeedGenerator::new(9).generate_drone_fleet(5);
        assert_eq!(drones.len(), 5);
        for drone in drones.values() {
            assert_eq!(drone.status, DroneStatus::Available);
            assert!(drone.capabilities.contains(&"medical_kit".to_string()));
            match drone.version.as_deref() {
                Some("v1") => assert!(drone.speed_kph >= 26.9 && drone.speed_kph <= 33.1),
                Some("v2") => assert_eq!(drone.capabilities.len(), 4),
                Some("v3") => assert!(drone.capabilities.contains(&"hazmat_sensors".to_string())),
                other => panic!("unexpected version {:?}", other),
            }
        }
    }

    #[test]
    fn test_weather_advisories_match_conditions() {
        for day in 1..=31 {
            let weather = DaySeedGenerator::new(day).generate_weather_data();
            match weather.conditions.as_str() {
                "stormy" => assert!(weather.advisories.contains(&"thunderstorm_warning".to_string())),
                "heat_wave" => {
                    assert!(weather.advisories.contains(&"heat_advisory".to_string()));
                    assert!(weather.temperature_c >= 30.0);
                }
                "clear" => {
                    assert!(weather.advisories.is_empty());
                    assert_eq!(weather.precipitation_mm, 0.0);
                }
                _ => {}
            }
        }
    }
}
