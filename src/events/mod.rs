use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::delivery::DeliveryStatus;
use crate::models::driver::{Alert, DriverStatus};

/// Everything the engine announces to the outside world. Serialized with a
/// `topic` tag so ws clients can switch on it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum EngineEvent {
    LocationUpdate {
        driver_id: Uuid,
        point: GeoPoint,
        speed_kmh: f64,
        heading_deg: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    DeliveryStatus {
        delivery_id: Uuid,
        driver_id: Uuid,
        previous: DeliveryStatus,
        current: DeliveryStatus,
        timestamp: DateTime<Utc>,
    },
    Progress {
        delivery_id: Uuid,
        driver_id: Uuid,
        progress: f64,
        remaining_m: f64,
        eta: Option<DateTime<Utc>>,
    },
    Alert {
        driver_id: Uuid,
        alert: Alert,
    },
    DriverStatusChange {
        driver_id: Uuid,
        previous: DriverStatus,
        current: DriverStatus,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::LocationUpdate { .. } => "location-update",
            EngineEvent::DeliveryStatus { .. } => "delivery-status",
            EngineEvent::Progress { .. } => "progress",
            EngineEvent::Alert { .. } => "alert",
            EngineEvent::DriverStatusChange { .. } => "driver-status-change",
        }
    }

    pub fn driver_id(&self) -> Uuid {
        match self {
            EngineEvent::LocationUpdate { driver_id, .. }
            | EngineEvent::DeliveryStatus { driver_id, .. }
            | EngineEvent::Progress { driver_id, .. }
            | EngineEvent::Alert { driver_id, .. }
            | EngineEvent::DriverStatusChange { driver_id, .. } => *driver_id,
        }
    }

    pub fn delivery_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::DeliveryStatus { delivery_id, .. }
            | EngineEvent::Progress { delivery_id, .. } => Some(*delivery_id),
            _ => None,
        }
    }
}

/// Subscription key: match everything unless a driver and/or delivery is
/// pinned. Filtering happens on the receive side so one subscriber cannot
/// affect another.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    pub driver_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
}

impl EventFilter {
    pub fn matches(&self, event: &EngineEvent) -> bool {
        if let Some(driver_id) = self.driver_id {
            if event.driver_id() != driver_id {
                return false;
            }
        }
        if let Some(delivery_id) = self.delivery_id {
            if event.delivery_id() != Some(delivery_id) {
                return false;
            }
        }
        true
    }
}

/// Bounded fan-out. Publish never blocks; a subscriber that falls behind the
/// buffer loses the oldest events (broadcast lag) and keeps receiving.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer);
        Self { tx }
    }

    /// Fire-and-forget: an error only means there are no subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::{EngineEvent, EventBus, EventFilter};
    use crate::geo::GeoPoint;

    fn location_event(driver_seed: u128) -> EngineEvent {
        EngineEvent::LocationUpdate {
            driver_id: Uuid::from_u128(driver_seed),
            point: GeoPoint::new(0.0, 0.0),
            speed_kmh: 12.0,
            heading_deg: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(location_event(1));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "location-update");
        assert_eq!(event.driver_id(), Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest_events_then_resumes() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for seed in 1..=5 {
            bus.publish(location_event(seed));
        }

        // The buffer held 2; the 3 oldest are gone and the stream resumes
        // at the oldest retained event.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        let event = rx.recv().await.unwrap();
        assert_eq!(event.driver_id(), Uuid::from_u128(4));
        assert_eq!(rx.recv().await.unwrap().driver_id(), Uuid::from_u128(5));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(location_event(1));
    }

    #[test]
    fn filter_pins_driver() {
        let filter = EventFilter {
            driver_id: Some(Uuid::from_u128(1)),
            delivery_id: None,
        };

        assert!(filter.matches(&location_event(1)));
        assert!(!filter.matches(&location_event(2)));
    }

    #[test]
    fn filter_on_delivery_rejects_events_without_one() {
        let filter = EventFilter {
            driver_id: None,
            delivery_id: Some(Uuid::from_u128(9)),
        };

        assert!(!filter.matches(&location_event(1)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&location_event(42)));
    }
}
