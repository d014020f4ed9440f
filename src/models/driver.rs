use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

/// One accepted GPS fix. Immutable once appended to a driver's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub timestamp: DateTime<Utc>,
    pub accuracy_m: f64,
    pub heading_deg: Option<f64>,
    pub reported_speed_kmh: Option<f64>,
    pub battery_pct: Option<f64>,
    /// Speed derived from the previous accepted sample, km/h.
    pub speed_kmh: f64,
    pub distance_from_previous_m: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub distance_m: f64,
    pub deliveries_completed: u64,
    pub online_minutes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum AlertKind {
    SpeedViolation,
    LowBattery,
    Idle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub location: Option<GeoPoint>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub kind: String,
    pub plate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
    pub status: DriverStatus,
    pub current_location: Option<LocationSample>,
    pub last_update: DateTime<Utc>,
    /// Bounded, oldest evicted first. Capacity enforced by the registry.
    pub history: VecDeque<LocationSample>,
    pub active_deliveries: Vec<Uuid>,
    pub stats: DailyStats,
    pub alerts: Vec<Alert>,
    pub registered_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_active(&self, now: DateTime<Utc>, window_secs: i64) -> bool {
        self.status != DriverStatus::Offline
            && (now - self.last_update).num_seconds() <= window_secs
    }
}

/// Read-model returned by list/nearest queries; omits the history buffer.
#[derive(Debug, Clone, Serialize)]
pub struct DriverSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: DriverStatus,
    pub location: Option<GeoPoint>,
    pub last_update: DateTime<Utc>,
    pub active_deliveries: Vec<Uuid>,
    pub stats: DailyStats,
}

impl From<&Driver> for DriverSnapshot {
    fn from(driver: &Driver) -> Self {
        Self {
            id: driver.id,
            name: driver.name.clone(),
            status: driver.status,
            location: driver.current_location.as_ref().map(|s| s.point),
            last_update: driver.last_update,
            active_deliveries: driver.active_deliveries.clone(),
            stats: driver.stats,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedDriver {
    pub driver: DriverSnapshot,
    pub distance_m: f64,
    pub eta_seconds: f64,
}
