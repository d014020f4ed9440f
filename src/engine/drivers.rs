use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{alerts, deliveries, geofences};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::geo::{bearing_deg, haversine_m, GeoPoint};
use crate::models::driver::{
    AlertKind, Driver, DriverSnapshot, DriverStatus, LocationSample, RankedDriver, Vehicle,
};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
    /// Sample time; defaults to receipt time.
    pub timestamp: Option<DateTime<Utc>>,
    pub accuracy_m: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub battery_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ActiveFilter {
    pub status: Option<DriverStatus>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_m: Option<f64>,
}

/// Register a driver, or refresh one: re-registration overwrites identity and
/// vehicle metadata but preserves stats, history, alerts, and active
/// deliveries.
pub fn register(state: &AppState, id: Option<Uuid>, info: DriverInfo) -> Driver {
    let id = id.unwrap_or_else(Uuid::new_v4);
    let now = Utc::now();

    let driver = if let Some(mut existing) = state.drivers.get_mut(&id) {
        existing.name = info.name;
        existing.phone = info.phone;
        existing.vehicle = info.vehicle;
        info!(driver_id = %id, "driver re-registered, metadata refreshed");
        existing.clone()
    } else {
        let driver = Driver {
            id,
            name: info.name,
            phone: info.phone,
            vehicle: info.vehicle,
            status: DriverStatus::Available,
            current_location: None,
            last_update: now,
            history: std::collections::VecDeque::new(),
            active_deliveries: Vec::new(),
            stats: Default::default(),
            alerts: Vec::new(),
            registered_at: now,
        };
        state.drivers.insert(id, driver.clone());
        state.metrics.tracked_drivers.set(state.drivers.len() as i64);
        info!(driver_id = %id, "driver registered");
        driver
    };

    driver
}

/// The ingest pipeline: validate, derive speed/distance, append history,
/// update stats, raise alerts, run geofence checks, recompute delivery
/// progress, publish events. All-or-nothing: a rejected sample leaves no
/// trace.
pub fn ingest_location(
    state: &AppState,
    driver_id: Uuid,
    update: LocationUpdate,
) -> Result<LocationSample, EngineError> {
    let start = Instant::now();
    let result = ingest_inner(state, driver_id, update);

    let outcome = if result.is_ok() { "accepted" } else { "rejected" };
    state
        .metrics
        .location_updates_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .ingest_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());

    result
}

fn ingest_inner(
    state: &AppState,
    driver_id: Uuid,
    update: LocationUpdate,
) -> Result<LocationSample, EngineError> {
    let point = GeoPoint::new(update.lat, update.lng);
    if !point.is_valid() {
        return Err(EngineError::InvalidLocation(format!(
            "coordinates out of range: ({}, {})",
            update.lat, update.lng
        )));
    }

    let timestamp = update.timestamp.unwrap_or_else(Utc::now);
    let mut status_change = None;
    let raised;
    let active_deliveries;

    let sample = {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| EngineError::UnknownDriver(driver_id.to_string()))?;

        // Out-of-order and duplicate timestamps are rejected outright so
        // derived speed can never go negative or infinite.
        let (speed_kmh, distance_m, derived_heading) = match &driver.current_location {
            Some(prev) => {
                if timestamp <= prev.timestamp {
                    return Err(EngineError::InvalidLocation(format!(
                        "sample at {timestamp} is not newer than last accepted sample at {}",
                        prev.timestamp
                    )));
                }
                let elapsed_s = (timestamp - prev.timestamp).num_milliseconds() as f64 / 1_000.0;
                let distance_m = haversine_m(&prev.point, &point);
                let heading = if distance_m > 0.0 {
                    Some(bearing_deg(&prev.point, &point))
                } else {
                    None
                };
                (distance_m / elapsed_s * 3.6, distance_m, heading)
            }
            None => (0.0, 0.0, None),
        };

        let sample = LocationSample {
            point,
            timestamp,
            accuracy_m: update.accuracy_m.unwrap_or(0.0),
            heading_deg: update.heading_deg.or(derived_heading),
            reported_speed_kmh: update.speed_kmh,
            battery_pct: update.battery_pct,
            speed_kmh,
            distance_from_previous_m: distance_m,
        };

        driver.stats.distance_m += distance_m;
        driver.history.push_back(sample.clone());
        while driver.history.len() > state.config.history_capacity {
            driver.history.pop_front();
        }
        driver.current_location = Some(sample.clone());
        driver.last_update = timestamp;

        // A fix from an offline driver brings them back.
        if driver.status == DriverStatus::Offline {
            driver.status = DriverStatus::Available;
            status_change = Some((DriverStatus::Offline, DriverStatus::Available));
        }

        raised = alerts::evaluate(&state.config, &sample);
        for alert in &raised {
            driver.alerts.push(alert.clone());
            state
                .metrics
                .alerts_total
                .with_label_values(&[alert_kind_label(alert.kind)])
                .inc();
        }

        active_deliveries = driver.active_deliveries.clone();
        sample
    };

    publish(
        state,
        EngineEvent::LocationUpdate {
            driver_id,
            point,
            speed_kmh: sample.speed_kmh,
            heading_deg: sample.heading_deg,
            timestamp,
        },
    );
    if let Some((previous, current)) = status_change {
        publish(
            state,
            EngineEvent::DriverStatusChange {
                driver_id,
                previous,
                current,
                timestamp,
            },
        );
    }
    for alert in raised {
        publish(state, EngineEvent::Alert { driver_id, alert });
    }

    geofences::check_driver(state, driver_id, &point, &active_deliveries);
    deliveries::record_progress(state, driver_id, &sample, &active_deliveries);

    debug!(driver_id = %driver_id, speed_kmh = sample.speed_kmh, "location accepted");
    Ok(sample)
}

pub fn alert_kind_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::SpeedViolation => "speed_violation",
        AlertKind::LowBattery => "low_battery",
        AlertKind::Idle => "idle",
    }
}

pub fn publish(state: &AppState, event: EngineEvent) {
    state
        .metrics
        .events_published_total
        .with_label_values(&[event.topic()])
        .inc();
    state.events.publish(event);
}

/// Drivers updated inside the active window and not offline, optionally
/// narrowed by status and/or a center+radius proximity test. The proximity
/// parameters are all-or-nothing; a partial set is rejected rather than
/// silently ignored.
pub fn list_active(
    state: &AppState,
    filter: ActiveFilter,
) -> Result<Vec<DriverSnapshot>, EngineError> {
    let now = Utc::now();
    let window = state.config.active_window_secs;

    let proximity = match (filter.lat, filter.lng, filter.radius_m) {
        (Some(lat), Some(lng), Some(radius_m)) => {
            let center = GeoPoint::new(lat, lng);
            if !center.is_valid() {
                return Err(EngineError::InvalidLocation(
                    "proximity center out of range".to_string(),
                ));
            }
            Some((center, radius_m))
        }
        (None, None, None) => None,
        _ => {
            return Err(EngineError::BadRequest(
                "proximity filter requires lat, lng and radius_m together".to_string(),
            ))
        }
    };

    let mut snapshots: Vec<DriverSnapshot> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if !driver.is_active(now, window) {
                return None;
            }
            if let Some(status) = filter.status {
                if driver.status != status {
                    return None;
                }
            }
            if let Some((center, radius_m)) = proximity {
                let location = driver.current_location.as_ref()?;
                if haversine_m(&center, &location.point) > radius_m {
                    return None;
                }
            }
            Some(DriverSnapshot::from(driver))
        })
        .collect();

    snapshots.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(snapshots)
}

/// Available drivers inside the active window, ranked by ascending distance
/// from `point`; ties broken by driver id for determinism.
pub fn find_nearest(
    state: &AppState,
    point: GeoPoint,
    max_distance_m: f64,
    limit: usize,
) -> Vec<RankedDriver> {
    let now = Utc::now();
    let window = state.config.active_window_secs;

    let mut ranked: Vec<RankedDriver> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if driver.status != DriverStatus::Available || !driver.is_active(now, window) {
                return None;
            }
            let location = driver.current_location.as_ref()?;
            let distance_m = haversine_m(&point, &location.point);
            if distance_m > max_distance_m {
                return None;
            }

            let speed_kmh = if location.speed_kmh > 0.0 {
                location.speed_kmh
            } else {
                state.config.assumed_speed_kmh
            };
            let eta_seconds = distance_m / (speed_kmh / 3.6);

            Some(RankedDriver {
                driver: DriverSnapshot::from(driver),
                distance_m,
                eta_seconds,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.driver.id.cmp(&b.driver.id))
    });
    ranked.truncate(limit);
    ranked
}
