use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

/// Lifecycle states in transition order. The tracker only ever moves a
/// delivery forward through this sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryStatus {
    Assigned,
    EnRoutePickup,
    ArrivedPickup,
    PickedUp,
    EnRouteDelivery,
    ArrivedDelivery,
    Completed,
}

impl DeliveryStatus {
    pub fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Assigned => 0,
            DeliveryStatus::EnRoutePickup => 1,
            DeliveryStatus::ArrivedPickup => 2,
            DeliveryStatus::PickedUp => 3,
            DeliveryStatus::EnRouteDelivery => 4,
            DeliveryStatus::ArrivedDelivery => 5,
            DeliveryStatus::Completed => 6,
        }
    }
}

/// Append-only audit record of a status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLeg {
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub distance_m: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePlan {
    pub legs: Vec<RouteLeg>,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
}

impl RoutePlan {
    pub fn origin(&self) -> Option<GeoPoint> {
        self.legs.first().map(|leg| leg.from)
    }

    pub fn destination(&self) -> Option<GeoPoint> {
        self.legs.last().map(|leg| leg.to)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delay {
    pub reason: String,
    pub minutes: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: DeliveryStatus,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub route: RoutePlan,
    pub estimated_distance_m: f64,
    pub estimated_duration_s: f64,
    pub actual_distance_m: f64,
    /// Fraction of the planned route covered, [0, 1].
    pub progress: f64,
    pub eta: Option<DateTime<Utc>>,
    pub checkpoints: Vec<Checkpoint>,
    pub delays: Vec<Delay>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn is_terminal(&self) -> bool {
        self.status == DeliveryStatus::Completed
    }
}
