use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{haversine_m, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GeofenceRole {
    Pickup,
    Dropoff,
}

impl GeofenceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            GeofenceRole::Pickup => "pickup",
            GeofenceRole::Dropoff => "dropoff",
        }
    }
}

/// Circular region around a pickup or dropoff point. Created as a pair when a
/// delivery starts tracking, removed when it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub id: String,
    pub delivery_id: Uuid,
    pub role: GeofenceRole,
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(delivery_id: Uuid, role: GeofenceRole, center: GeoPoint, radius_m: f64) -> Self {
        Self {
            id: format!("{delivery_id}:{}", role.as_str()),
            delivery_id,
            role,
            center,
            radius_m,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        haversine_m(&self.center, point) <= self.radius_m
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{Geofence, GeofenceRole};
    use crate::geo::GeoPoint;

    #[test]
    fn contains_point_inside_radius() {
        let fence = Geofence::new(
            Uuid::from_u128(1),
            GeofenceRole::Pickup,
            GeoPoint::new(-1.2921, 36.8219),
            100.0,
        );

        // ~55 m east of center.
        assert!(fence.contains(&GeoPoint::new(-1.2921, 36.8224)));
        // ~1.2 km away.
        assert!(!fence.contains(&GeoPoint::new(-1.30, 36.83)));
    }

    #[test]
    fn id_encodes_delivery_and_role() {
        let delivery_id = Uuid::from_u128(7);
        let fence = Geofence::new(
            delivery_id,
            GeofenceRole::Dropoff,
            GeoPoint::new(0.0, 0.0),
            50.0,
        );
        assert_eq!(fence.id, format!("{delivery_id}:dropoff"));
    }
}
