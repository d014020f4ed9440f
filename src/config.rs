use std::env;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Max location samples retained per driver.
    pub history_capacity: usize,
    /// Drivers with no update inside this window are excluded from
    /// list-active and nearest queries. Seconds.
    pub active_window_secs: i64,
    /// Drivers idle beyond this are marked offline by maintenance. Seconds.
    pub idle_threshold_secs: i64,
    /// Drivers inactive beyond this are evicted entirely. Seconds.
    pub eviction_age_secs: i64,
    /// Completed deliveries older than this are pruned. Seconds.
    pub delivery_retention_secs: i64,
    pub speed_ceiling_kmh: f64,
    pub battery_floor_pct: f64,
    pub geofence_radius_m: f64,
    /// Fallback speed for nearest-driver ETA when no live speed exists.
    pub assumed_speed_kmh: f64,
    /// Floor applied to live speed in delivery ETA math so a stationary
    /// driver still gets a finite estimate.
    pub min_eta_speed_kmh: f64,
    pub route_provider_timeout_ms: u64,
    pub cruise_speed_kmh: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            history_capacity: parse_or_default("HISTORY_CAPACITY", 100)?,
            active_window_secs: parse_or_default("ACTIVE_WINDOW_SECS", 300)?,
            idle_threshold_secs: parse_or_default("IDLE_THRESHOLD_SECS", 300)?,
            eviction_age_secs: parse_or_default("EVICTION_AGE_SECS", 86_400)?,
            delivery_retention_secs: parse_or_default("DELIVERY_RETENTION_SECS", 86_400)?,
            speed_ceiling_kmh: parse_or_default("SPEED_CEILING_KMH", 80.0)?,
            battery_floor_pct: parse_or_default("BATTERY_FLOOR_PCT", 20.0)?,
            geofence_radius_m: parse_or_default("GEOFENCE_RADIUS_M", 100.0)?,
            assumed_speed_kmh: parse_or_default("ASSUMED_SPEED_KMH", 40.0)?,
            min_eta_speed_kmh: parse_or_default("MIN_ETA_SPEED_KMH", 5.0)?,
            route_provider_timeout_ms: parse_or_default("ROUTE_PROVIDER_TIMEOUT_MS", 5_000)?,
            cruise_speed_kmh: parse_or_default("CRUISE_SPEED_KMH", 40.0)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            history_capacity: 100,
            active_window_secs: 300,
            idle_threshold_secs: 300,
            eviction_age_secs: 86_400,
            delivery_retention_secs: 86_400,
            speed_ceiling_kmh: 80.0,
            battery_floor_pct: 20.0,
            geofence_radius_m: 100.0,
            assumed_speed_kmh: 40.0,
            min_eta_speed_kmh: 5.0,
            route_provider_timeout_ms: 5_000,
            cruise_speed_kmh: 40.0,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, EngineError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| EngineError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
