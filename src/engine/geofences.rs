use tracing::debug;
use uuid::Uuid;

use crate::engine::deliveries;
use crate::geo::GeoPoint;
use crate::models::geofence::{Geofence, GeofenceRole};
use crate::state::AppState;

/// Create the pickup/dropoff pair for a delivery. Exactly two fences exist
/// per tracked delivery; they are removed on completion.
pub fn register_pair(
    state: &AppState,
    delivery_id: Uuid,
    pickup: GeoPoint,
    dropoff: GeoPoint,
    radius_m: f64,
) {
    let pair = [
        Geofence::new(delivery_id, GeofenceRole::Pickup, pickup, radius_m),
        Geofence::new(delivery_id, GeofenceRole::Dropoff, dropoff, radius_m),
    ];
    state.geofences.insert(delivery_id, pair);
}

pub fn unregister(state: &AppState, delivery_id: Uuid) {
    state.geofences.remove(&delivery_id);
}

/// Test the driver's position against every geofence of their active
/// deliveries. Firing is gated on delivery status, so re-entry after the
/// transition already happened is a no-op; this makes the check safe to
/// re-run from the maintenance sweep.
pub fn check_driver(
    state: &AppState,
    driver_id: Uuid,
    point: &GeoPoint,
    active_deliveries: &[Uuid],
) {
    for delivery_id in active_deliveries {
        let Some(pair) = state.geofences.get(delivery_id).map(|entry| entry.clone()) else {
            continue;
        };

        for fence in &pair {
            if fence.contains(point) {
                debug!(driver_id = %driver_id, fence = %fence.id, "geofence entry");
                deliveries::apply_geofence_entry(state, *delivery_id, fence.role, *point);
            }
        }
    }
}
