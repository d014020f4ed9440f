use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{drivers, geofences};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::geo::{haversine_m, GeoPoint};
use crate::models::delivery::{Checkpoint, Delay, Delivery, DeliveryStatus};
use crate::models::driver::{DriverStatus, LocationSample};
use crate::models::geofence::GeofenceRole;
use crate::route::optimizer;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct StartTracking {
    pub delivery_id: Option<Uuid>,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

/// Begin tracking a delivery: plan the initial route, create the geofence
/// pair, mark the driver busy and move the delivery to `EnRoutePickup`.
/// Provider failure surfaces to the caller before any state is touched.
pub async fn start_tracking(
    state: &AppState,
    request: StartTracking,
) -> Result<Delivery, EngineError> {
    if !request.pickup.is_valid() || !request.dropoff.is_valid() {
        return Err(EngineError::InvalidLocation(
            "pickup or dropoff coordinates out of range".to_string(),
        ));
    }

    let delivery_id = request.delivery_id.unwrap_or_else(Uuid::new_v4);
    if state.deliveries.contains_key(&delivery_id) {
        return Err(EngineError::BadRequest(format!(
            "delivery {delivery_id} is already tracked"
        )));
    }

    // Route from the driver's live position when there is one; a driver with
    // no fix yet gets a plan that starts at the pickup.
    let origin = {
        let driver = state
            .drivers
            .get(&request.driver_id)
            .ok_or_else(|| EngineError::UnknownDriver(request.driver_id.to_string()))?;
        driver
            .current_location
            .as_ref()
            .map(|sample| sample.point)
            .unwrap_or(request.pickup)
    };

    let route = optimizer::plan_single(
        state.route_provider.as_ref(),
        state.config.route_provider_timeout_ms,
        &origin,
        &request.pickup,
        &request.dropoff,
    )
    .await?;

    let now = Utc::now();
    let initial_eta = now + Duration::seconds(route.total_duration_s as i64);
    let delivery = Delivery {
        id: delivery_id,
        order_id: request.order_id,
        driver_id: request.driver_id,
        status: DeliveryStatus::EnRoutePickup,
        pickup: request.pickup,
        dropoff: request.dropoff,
        estimated_distance_m: route.total_distance_m,
        estimated_duration_s: route.total_duration_s,
        route,
        actual_distance_m: 0.0,
        progress: 0.0,
        eta: Some(initial_eta),
        checkpoints: vec![
            Checkpoint {
                status: DeliveryStatus::Assigned,
                timestamp: now,
                location: None,
                notes: None,
            },
            Checkpoint {
                status: DeliveryStatus::EnRoutePickup,
                timestamp: now,
                location: Some(origin),
                notes: None,
            },
        ],
        delays: Vec::new(),
        started_at: now,
        completed_at: None,
    };

    let mut status_change = None;
    {
        // The driver may have been evicted while the provider call was in
        // flight; fail without leaving a half-tracked delivery.
        let mut driver = state
            .drivers
            .get_mut(&request.driver_id)
            .ok_or_else(|| EngineError::UnknownDriver(request.driver_id.to_string()))?;
        driver.active_deliveries.push(delivery_id);
        if driver.status != DriverStatus::Busy {
            status_change = Some((driver.status, DriverStatus::Busy));
            driver.status = DriverStatus::Busy;
        }
    }

    state.deliveries.insert(delivery_id, delivery.clone());
    state
        .metrics
        .tracked_deliveries
        .set(state.deliveries.len() as i64);
    geofences::register_pair(
        state,
        delivery_id,
        request.pickup,
        request.dropoff,
        state.config.geofence_radius_m,
    );

    if let Some((previous, current)) = status_change {
        drivers::publish(
            state,
            EngineEvent::DriverStatusChange {
                driver_id: request.driver_id,
                previous,
                current,
                timestamp: now,
            },
        );
    }
    drivers::publish(
        state,
        EngineEvent::DeliveryStatus {
            delivery_id,
            driver_id: request.driver_id,
            previous: DeliveryStatus::Assigned,
            current: DeliveryStatus::EnRoutePickup,
            timestamp: now,
        },
    );

    info!(
        delivery_id = %delivery_id,
        driver_id = %request.driver_id,
        distance_m = delivery.estimated_distance_m,
        "delivery tracking started"
    );
    Ok(delivery)
}

/// Externally signaled transition (pickup confirmation, completion). Only
/// strictly-forward moves are accepted; each one appends a checkpoint.
pub fn set_status(
    state: &AppState,
    delivery_id: Uuid,
    status: DeliveryStatus,
    location: Option<GeoPoint>,
    notes: Option<String>,
) -> Result<Delivery, EngineError> {
    let now = Utc::now();
    let (previous, delivery) = {
        let mut delivery = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| EngineError::UnknownDelivery(delivery_id.to_string()))?;

        if status.rank() <= delivery.status.rank() {
            return Err(EngineError::AlreadyInStatus(format!(
                "delivery {delivery_id} is already at or past {status:?}"
            )));
        }

        let previous = delivery.status;
        delivery.status = status;
        delivery.checkpoints.push(Checkpoint {
            status,
            timestamp: now,
            location,
            notes,
        });
        if status == DeliveryStatus::Completed {
            delivery.completed_at = Some(now);
            delivery.progress = 1.0;
            delivery.eta = None;
        }
        (previous, delivery.clone())
    };

    if status == DeliveryStatus::Completed {
        finish_delivery(state, &delivery, now);
    }

    drivers::publish(
        state,
        EngineEvent::DeliveryStatus {
            delivery_id,
            driver_id: delivery.driver_id,
            previous,
            current: status,
            timestamp: now,
        },
    );

    Ok(delivery)
}

/// Completion bookkeeping: drop the geofence pair, credit the driver, free
/// them when no active deliveries remain.
fn finish_delivery(state: &AppState, delivery: &Delivery, now: chrono::DateTime<Utc>) {
    geofences::unregister(state, delivery.id);
    state.metrics.deliveries_completed_total.inc();

    let mut status_change = None;
    if let Some(mut driver) = state.drivers.get_mut(&delivery.driver_id) {
        driver.active_deliveries.retain(|id| *id != delivery.id);
        driver.stats.deliveries_completed += 1;
        if driver.active_deliveries.is_empty() && driver.status == DriverStatus::Busy {
            driver.status = DriverStatus::Available;
            status_change = Some((DriverStatus::Busy, DriverStatus::Available));
        }
    } else {
        warn!(delivery_id = %delivery.id, driver_id = %delivery.driver_id,
            "completed delivery references an evicted driver");
    }

    if let Some((previous, current)) = status_change {
        drivers::publish(
            state,
            EngineEvent::DriverStatusChange {
                driver_id: delivery.driver_id,
                previous,
                current,
                timestamp: now,
            },
        );
    }
}

/// Geofence-driven transition. Gated on the expected preceding status, so it
/// fires at most once per status no matter how often containment re-tests.
pub fn apply_geofence_entry(
    state: &AppState,
    delivery_id: Uuid,
    role: GeofenceRole,
    point: GeoPoint,
) {
    let expected = match role {
        GeofenceRole::Pickup => (DeliveryStatus::EnRoutePickup, DeliveryStatus::ArrivedPickup),
        GeofenceRole::Dropoff => (
            DeliveryStatus::EnRouteDelivery,
            DeliveryStatus::ArrivedDelivery,
        ),
    };

    let now = Utc::now();
    let (previous, current, driver_id) = {
        let Some(mut delivery) = state.deliveries.get_mut(&delivery_id) else {
            return;
        };
        if delivery.status != expected.0 {
            return;
        }

        delivery.status = expected.1;
        delivery.checkpoints.push(Checkpoint {
            status: expected.1,
            timestamp: now,
            location: Some(point),
            notes: Some(format!("{} geofence entry", role.as_str())),
        });
        (expected.0, expected.1, delivery.driver_id)
    };

    info!(delivery_id = %delivery_id, status = ?current, "geofence transition");
    drivers::publish(
        state,
        EngineEvent::DeliveryStatus {
            delivery_id,
            driver_id,
            previous,
            current,
            timestamp: now,
        },
    );
}

/// Recompute progress/ETA for each of the driver's active deliveries after an
/// accepted sample. Progress is straight-line distance from the route origin,
/// clamped to the planned total; this is a documented approximation, not
/// map-matching.
pub fn record_progress(
    state: &AppState,
    driver_id: Uuid,
    sample: &LocationSample,
    active_deliveries: &[Uuid],
) {
    let now = Utc::now();

    for delivery_id in active_deliveries {
        let update = {
            let Some(mut delivery) = state.deliveries.get_mut(delivery_id) else {
                continue;
            };
            if delivery.is_terminal() {
                continue;
            }

            delivery.actual_distance_m += sample.distance_from_previous_m;

            let origin = delivery.route.origin().unwrap_or(delivery.pickup);
            let total = delivery.route.total_distance_m;
            delivery.progress = if total > 0.0 {
                (haversine_m(&origin, &sample.point).min(total)) / total
            } else {
                1.0
            };

            let destination = delivery.route.destination().unwrap_or(delivery.dropoff);
            let remaining_m = haversine_m(&sample.point, &destination);
            let speed_kmh = sample.speed_kmh.max(state.config.min_eta_speed_kmh);
            let eta_seconds = remaining_m / (speed_kmh / 3.6);
            delivery.eta = Some(now + Duration::seconds(eta_seconds as i64));

            (delivery.progress, remaining_m, delivery.eta)
        };

        drivers::publish(
            state,
            EngineEvent::Progress {
                delivery_id: *delivery_id,
                driver_id,
                progress: update.0,
                remaining_m: update.1,
                eta: update.2,
            },
        );
    }
}

/// Annotate a delivery with a delay and push its ETA out accordingly.
pub fn add_delay(
    state: &AppState,
    delivery_id: Uuid,
    reason: String,
    minutes: u32,
) -> Result<Delivery, EngineError> {
    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| EngineError::UnknownDelivery(delivery_id.to_string()))?;

    delivery.delays.push(Delay {
        reason,
        minutes,
        recorded_at: Utc::now(),
    });
    delivery.eta = delivery.eta.map(|eta| eta + Duration::minutes(minutes as i64));

    Ok(delivery.clone())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{set_status, start_tracking, StartTracking};
    use crate::config::Config;
    use crate::engine::drivers::{self, DriverInfo, LocationUpdate};
    use crate::error::EngineError;
    use crate::geo::GeoPoint;
    use crate::models::delivery::DeliveryStatus;
    use crate::models::driver::{DriverStatus, Vehicle};
    use crate::state::AppState;

    const PICKUP: (f64, f64) = (-1.2921, 36.8219);
    const DROPOFF: (f64, f64) = (-1.30, 36.83);

    fn test_state() -> AppState {
        AppState::with_default_provider(Config::default())
    }

    fn register_driver(state: &AppState) -> Uuid {
        let driver = drivers::register(
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
        );
        driver.id
    }

    fn ingest(state: &AppState, driver_id: Uuid, lat: f64, lng: f64, ts: chrono::DateTime<Utc>) {
        drivers::ingest_location(
            state,
            driver_id,
            LocationUpdate {
                lat,
                lng,
                timestamp: Some(ts),
                accuracy_m: Some(5.0),
                heading_deg: None,
                speed_kmh: None,
                battery_pct: None,
            },
        )
        .unwrap();
    }

    async fn start(state: &AppState, driver_id: Uuid) -> super::Delivery {
        start_tracking(
            state,
            StartTracking {
                delivery_id: None,
                order_id: Uuid::new_v4(),
                driver_id,
                pickup: GeoPoint::new(PICKUP.0, PICKUP.1),
                dropoff: GeoPoint::new(DROPOFF.0, DROPOFF.1),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn start_tracking_builds_route_fences_and_busy_driver() {
        let state = test_state();
        let driver_id = register_driver(&state);
        ingest(&state, driver_id, -1.28, 36.81, Utc::now());

        let delivery = start(&state, driver_id).await;

        assert_eq!(delivery.status, DeliveryStatus::EnRoutePickup);
        assert_eq!(delivery.route.legs.len(), 2);
        assert_eq!(delivery.checkpoints.len(), 2);
        assert!(delivery.estimated_distance_m > 0.0);

        let driver = state.drivers.get(&driver_id).unwrap();
        assert_eq!(driver.status, DriverStatus::Busy);
        assert_eq!(driver.active_deliveries, vec![delivery.id]);
        assert!(state.geofences.get(&delivery.id).is_some());
    }

    #[tokio::test]
    async fn start_tracking_unknown_driver_fails() {
        let state = test_state();
        let result = start_tracking(
            &state,
            StartTracking {
                delivery_id: None,
                order_id: Uuid::new_v4(),
                driver_id: Uuid::new_v4(),
                pickup: GeoPoint::new(PICKUP.0, PICKUP.1),
                dropoff: GeoPoint::new(DROPOFF.0, DROPOFF.1),
            },
        )
        .await;

        assert!(matches!(result, Err(EngineError::UnknownDriver(_))));
        assert!(state.deliveries.is_empty());
        assert!(state.geofences.is_empty());
    }

    #[tokio::test]
    async fn geofence_entry_advances_pickup_exactly_once() {
        let state = test_state();
        let driver_id = register_driver(&state);
        let t0 = Utc::now();
        ingest(&state, driver_id, -1.28, 36.81, t0);

        let delivery = start(&state, driver_id).await;

        // Inside the pickup fence.
        ingest(&state, driver_id, PICKUP.0, PICKUP.1, t0 + Duration::seconds(60));
        {
            let tracked = state.deliveries.get(&delivery.id).unwrap();
            assert_eq!(tracked.status, DeliveryStatus::ArrivedPickup);
            let arrivals = tracked
                .checkpoints
                .iter()
                .filter(|c| c.status == DeliveryStatus::ArrivedPickup)
                .count();
            assert_eq!(arrivals, 1);
        }

        // Re-entry while already arrived must not duplicate the checkpoint.
        ingest(&state, driver_id, PICKUP.0 + 0.0001, PICKUP.1, t0 + Duration::seconds(120));
        let tracked = state.deliveries.get(&delivery.id).unwrap();
        assert_eq!(tracked.status, DeliveryStatus::ArrivedPickup);
        let arrivals = tracked
            .checkpoints
            .iter()
            .filter(|c| c.status == DeliveryStatus::ArrivedPickup)
            .count();
        assert_eq!(arrivals, 1);
    }

    #[tokio::test]
    async fn dropoff_entry_fires_only_en_route_delivery() {
        let state = test_state();
        let driver_id = register_driver(&state);
        let t0 = Utc::now();
        ingest(&state, driver_id, -1.28, 36.81, t0);
        let delivery = start(&state, driver_id).await;

        // Passing the dropoff while still en route to pickup must not fire.
        ingest(&state, driver_id, DROPOFF.0, DROPOFF.1, t0 + Duration::seconds(30));
        assert_eq!(
            state.deliveries.get(&delivery.id).unwrap().status,
            DeliveryStatus::EnRoutePickup
        );

        ingest(&state, driver_id, PICKUP.0, PICKUP.1, t0 + Duration::seconds(60));
        set_status(&state, delivery.id, DeliveryStatus::PickedUp, None, None).unwrap();
        set_status(&state, delivery.id, DeliveryStatus::EnRouteDelivery, None, None).unwrap();

        ingest(&state, driver_id, DROPOFF.0, DROPOFF.1, t0 + Duration::seconds(120));
        assert_eq!(
            state.deliveries.get(&delivery.id).unwrap().status,
            DeliveryStatus::ArrivedDelivery
        );
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let state = test_state();
        let driver_id = register_driver(&state);
        ingest(&state, driver_id, -1.28, 36.81, Utc::now());
        let delivery = start(&state, driver_id).await;

        set_status(&state, delivery.id, DeliveryStatus::PickedUp, None, None).unwrap();

        let back = set_status(&state, delivery.id, DeliveryStatus::Assigned, None, None);
        assert!(matches!(back, Err(EngineError::AlreadyInStatus(_))));

        let same = set_status(&state, delivery.id, DeliveryStatus::PickedUp, None, None);
        assert!(matches!(same, Err(EngineError::AlreadyInStatus(_))));
    }

    #[tokio::test]
    async fn completion_frees_driver_and_removes_fences() {
        let state = test_state();
        let driver_id = register_driver(&state);
        ingest(&state, driver_id, -1.28, 36.81, Utc::now());
        let delivery = start(&state, driver_id).await;

        set_status(&state, delivery.id, DeliveryStatus::Completed, None, None).unwrap();

        let driver = state.drivers.get(&driver_id).unwrap();
        assert_eq!(driver.status, DriverStatus::Available);
        assert!(driver.active_deliveries.is_empty());
        assert_eq!(driver.stats.deliveries_completed, 1);
        assert!(state.geofences.get(&delivery.id).is_none());

        let record = state.deliveries.get(&delivery.id).unwrap();
        assert!(record.completed_at.is_some());
        assert_eq!(record.progress, 1.0);
    }

    #[tokio::test]
    async fn progress_and_eta_update_on_movement() {
        let state = test_state();
        let driver_id = register_driver(&state);
        let t0 = Utc::now();
        ingest(&state, driver_id, -1.28, 36.81, t0);
        let delivery = start(&state, driver_id).await;

        ingest(&state, driver_id, -1.287, 36.816, t0 + Duration::seconds(60));

        let tracked = state.deliveries.get(&delivery.id).unwrap();
        assert!(tracked.progress > 0.0);
        assert!(tracked.progress <= 1.0);
        assert!(tracked.actual_distance_m > 0.0);
        assert!(tracked.eta.unwrap() > t0);
    }

    #[tokio::test]
    async fn unknown_delivery_set_status_fails() {
        let state = test_state();
        let result = set_status(&state, Uuid::new_v4(), DeliveryStatus::PickedUp, None, None);
        assert!(matches!(result, Err(EngineError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn delay_annotation_pushes_eta_out() {
        let state = test_state();
        let driver_id = register_driver(&state);
        let t0 = Utc::now();
        ingest(&state, driver_id, -1.28, 36.81, t0);
        let delivery = start(&state, driver_id).await;
        ingest(&state, driver_id, -1.287, 36.816, t0 + Duration::seconds(60));

        let before = state.deliveries.get(&delivery.id).unwrap().eta.unwrap();
        let updated =
            super::add_delay(&state, delivery.id, "puncture".to_string(), 15).unwrap();

        assert_eq!(updated.delays.len(), 1);
        assert_eq!(updated.eta.unwrap(), before + Duration::minutes(15));
    }
}
