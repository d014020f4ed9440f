use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{drivers, geofences};
use crate::events::EngineEvent;
use crate::models::driver::{Alert, AlertKind, AlertSeverity, DriverStatus};
use crate::route::optimizer::{self, DeliveryStops};
use crate::state::AppState;

const EVICTION_SWEEP_SECS: u64 = 60;
const PRESENCE_SWEEP_SECS: u64 = 60;
const GEOFENCE_SWEEP_SECS: u64 = 30;
const REOPTIMIZE_SWEEP_SECS: u64 = 300;

/// Spawn the periodic sweeps. Each loop runs forever; each tick takes the
/// same per-record guards as the foreground paths, so a sweep can never
/// observe or produce a half-applied update.
pub fn spawn(state: Arc<AppState>) -> Vec<tokio::task::JoinHandle<()>> {
    let eviction = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(EVICTION_SWEEP_SECS));
            loop {
                tick.tick().await;
                sweep_stale(&state, Utc::now());
            }
        })
    };

    let presence = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(PRESENCE_SWEEP_SECS));
            loop {
                tick.tick().await;
                sweep_presence(&state, Utc::now());
            }
        })
    };

    let geofence = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(GEOFENCE_SWEEP_SECS));
            loop {
                tick.tick().await;
                sweep_geofences(&state);
            }
        })
    };

    let reoptimize = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(REOPTIMIZE_SWEEP_SECS));
        loop {
            tick.tick().await;
            sweep_reoptimize(&state).await;
        }
    });

    vec![eviction, presence, geofence, reoptimize]
}

/// Evict drivers silent past the eviction age, trim over-capacity histories,
/// and prune completed deliveries past the retention window.
pub fn sweep_stale(state: &AppState, now: DateTime<Utc>) {
    let eviction_age = state.config.eviction_age_secs;
    let mut evicted = 0u64;

    state.drivers.retain(|driver_id, driver| {
        if (now - driver.last_update).num_seconds() >= eviction_age {
            if !driver.active_deliveries.is_empty() {
                warn!(driver_id = %driver_id, deliveries = driver.active_deliveries.len(),
                    "evicting stale driver with open deliveries");
            }
            evicted += 1;
            return false;
        }
        while driver.history.len() > state.config.history_capacity {
            driver.history.pop_front();
        }
        true
    });

    if evicted > 0 {
        info!(evicted, "evicted stale drivers");
        state.metrics.drivers_evicted_total.inc_by(evicted);
    }
    state.metrics.tracked_drivers.set(state.drivers.len() as i64);

    let retention = state.config.delivery_retention_secs;
    state.deliveries.retain(|_, delivery| match delivery.completed_at {
        Some(completed_at) => (now - completed_at).num_seconds() < retention,
        None => true,
    });
    state
        .metrics
        .tracked_deliveries
        .set(state.deliveries.len() as i64);
}

/// Credit one minute of online time to available/busy drivers and push the
/// silent ones offline.
pub fn sweep_presence(state: &AppState, now: DateTime<Utc>) {
    let idle_threshold = state.config.idle_threshold_secs;
    let mut transitions = Vec::new();

    for mut entry in state.drivers.iter_mut() {
        let driver = entry.value_mut();
        if driver.status == DriverStatus::Offline {
            continue;
        }

        driver.stats.online_minutes += 1;

        if (now - driver.last_update).num_seconds() > idle_threshold {
            let previous = driver.status;
            driver.status = DriverStatus::Offline;

            let alert = Alert {
                kind: AlertKind::Idle,
                severity: AlertSeverity::Low,
                location: driver.current_location.as_ref().map(|s| s.point),
                timestamp: now,
                message: format!("no location update for over {idle_threshold}s"),
            };
            driver.alerts.push(alert.clone());
            state
                .metrics
                .alerts_total
                .with_label_values(&[drivers::alert_kind_label(alert.kind)])
                .inc();

            transitions.push((driver.id, previous, alert));
        }
    }

    for (driver_id, previous, alert) in transitions {
        debug!(driver_id = %driver_id, "driver marked offline");
        drivers::publish(
            state,
            EngineEvent::DriverStatusChange {
                driver_id,
                previous,
                current: DriverStatus::Offline,
                timestamp: now,
            },
        );
        drivers::publish(state, EngineEvent::Alert { driver_id, alert });
    }
}

/// Re-run containment for every active driver against their deliveries'
/// geofences. Covers a transition whose triggering location update was
/// missed; firing is status-gated so this is idempotent.
pub fn sweep_geofences(state: &AppState) {
    let positions: Vec<(Uuid, crate::geo::GeoPoint, Vec<Uuid>)> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if driver.active_deliveries.is_empty() {
                return None;
            }
            let location = driver.current_location.as_ref()?;
            Some((
                driver.id,
                location.point,
                driver.active_deliveries.clone(),
            ))
        })
        .collect();

    for (driver_id, point, active) in positions {
        geofences::check_driver(state, driver_id, &point, &active);
    }
}

/// Re-plan multi-delivery routes for drivers juggling two or more stops.
/// Failures are isolated per driver; one bad provider call must not abort the
/// sweep for the rest of the fleet.
pub async fn sweep_reoptimize(state: &AppState) {
    let candidates: Vec<(Uuid, crate::geo::GeoPoint, Vec<Uuid>)> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if driver.active_deliveries.len() < 2 {
                return None;
            }
            let location = driver.current_location.as_ref()?;
            Some((
                driver.id,
                location.point,
                driver.active_deliveries.clone(),
            ))
        })
        .collect();

    for (driver_id, origin, active) in candidates {
        let stops: Vec<DeliveryStops> = active
            .iter()
            .filter_map(|delivery_id| {
                let delivery = state.deliveries.get(delivery_id)?;
                if delivery.is_terminal() {
                    return None;
                }
                Some(DeliveryStops {
                    delivery_id: *delivery_id,
                    pickup: delivery.pickup,
                    dropoff: delivery.dropoff,
                })
            })
            .collect();

        if stops.len() < 2 {
            continue;
        }

        match optimizer::plan_multi(
            state.route_provider.as_ref(),
            state.config.route_provider_timeout_ms,
            &origin,
            &stops,
        )
        .await
        {
            Ok(plan) => {
                debug!(
                    driver_id = %driver_id,
                    stops = plan.waypoints.len(),
                    distance_m = plan.total_distance_m,
                    "re-optimized multi-delivery route"
                );
            }
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "re-optimization failed, keeping current order");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{sweep_geofences, sweep_presence, sweep_stale};
    use crate::config::Config;
    use crate::engine::deliveries::{self, StartTracking};
    use crate::engine::drivers::{self, DriverInfo, LocationUpdate};
    use crate::geo::GeoPoint;
    use crate::models::delivery::DeliveryStatus;
    use crate::models::driver::{AlertKind, DriverStatus, Vehicle};
    use crate::state::AppState;

    fn test_state() -> AppState {
        AppState::with_default_provider(Config::default())
    }

    fn register_driver(state: &AppState) -> Uuid {
        drivers::register(
            state,
            None,
            DriverInfo {
                name: "Asha".to_string(),
                phone: "+254700000001".to_string(),
                vehicle: Vehicle {
                    kind: "motorbike".to_string(),
                    plate: "KMC 123X".to_string(),
                },
            },
        )
        .id
    }

    fn ingest_at(state: &AppState, driver_id: Uuid, lat: f64, lng: f64, ts: chrono::DateTime<Utc>) {
        drivers::ingest_location(
            state,
            driver_id,
            LocationUpdate {
                lat,
                lng,
                timestamp: Some(ts),
                accuracy_m: None,
                heading_deg: None,
                speed_kmh: None,
                battery_pct: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn stale_driver_is_evicted_fresh_one_survives() {
        let state = test_state();
        let stale = register_driver(&state);
        let fresh = register_driver(&state);

        let now = Utc::now();
        ingest_at(&state, stale, -1.29, 36.82, now - Duration::hours(25));
        ingest_at(&state, fresh, -1.29, 36.82, now);

        sweep_stale(&state, now);

        assert!(state.drivers.get(&stale).is_none());
        assert!(state.drivers.get(&fresh).is_some());
    }

    #[tokio::test]
    async fn retention_prunes_old_completed_deliveries_only() {
        let state = test_state();
        let driver_id = register_driver(&state);
        ingest_at(&state, driver_id, -1.28, 36.81, Utc::now());

        let done = deliveries::start_tracking(
            &state,
            StartTracking {
                delivery_id: None,
                order_id: Uuid::new_v4(),
                driver_id,
                pickup: GeoPoint::new(-1.2921, 36.8219),
                dropoff: GeoPoint::new(-1.30, 36.83),
            },
        )
        .await
        .unwrap();
        let open = deliveries::start_tracking(
            &state,
            StartTracking {
                delivery_id: None,
                order_id: Uuid::new_v4(),
                driver_id,
                pickup: GeoPoint::new(-1.2921, 36.8219),
                dropoff: GeoPoint::new(-1.31, 36.84),
            },
        )
        .await
        .unwrap();

        deliveries::set_status(&state, done.id, DeliveryStatus::Completed, None, None).unwrap();
        state.deliveries.get_mut(&done.id).unwrap().completed_at =
            Some(Utc::now() - Duration::hours(48));

        sweep_stale(&state, Utc::now());

        assert!(state.deliveries.get(&done.id).is_none());
        assert!(state.deliveries.get(&open.id).is_some());
    }

    #[test]
    fn presence_sweep_credits_minutes_and_marks_idle_drivers_offline() {
        let state = test_state();
        let idle = register_driver(&state);
        let active = register_driver(&state);

        let now = Utc::now();
        ingest_at(&state, idle, -1.29, 36.82, now - Duration::seconds(400));
        ingest_at(&state, active, -1.29, 36.82, now);

        sweep_presence(&state, now);

        // Guards must drop before the next sweep takes the shards mutably.
        {
            let idle_driver = state.drivers.get(&idle).unwrap();
            assert_eq!(idle_driver.status, DriverStatus::Offline);
            assert_eq!(idle_driver.stats.online_minutes, 1);
            assert!(idle_driver.alerts.iter().any(|a| a.kind == AlertKind::Idle));

            let active_driver = state.drivers.get(&active).unwrap();
            assert_eq!(active_driver.status, DriverStatus::Available);
            assert_eq!(active_driver.stats.online_minutes, 1);
        }

        // Second tick: an offline driver accrues no further minutes.
        sweep_presence(&state, now);
        assert_eq!(state.drivers.get(&idle).unwrap().stats.online_minutes, 1);
    }

    #[tokio::test]
    async fn geofence_sweep_catches_missed_entry() {
        let state = test_state();
        let driver_id = register_driver(&state);
        let t0 = Utc::now();
        ingest_at(&state, driver_id, -1.2921, 36.8219, t0);

        // Delivery starts while the driver is already inside the pickup
        // fence; no later location update arrives.
        let delivery = deliveries::start_tracking(
            &state,
            StartTracking {
                delivery_id: None,
                order_id: Uuid::new_v4(),
                driver_id,
                pickup: GeoPoint::new(-1.2921, 36.8219),
                dropoff: GeoPoint::new(-1.30, 36.83),
            },
        )
        .await
        .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::EnRoutePickup);

        sweep_geofences(&state);

        assert_eq!(
            state.deliveries.get(&delivery.id).unwrap().status,
            DeliveryStatus::ArrivedPickup
        );
    }
}
