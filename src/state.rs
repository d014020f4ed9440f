use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::events::EventBus;
use crate::models::delivery::Delivery;
use crate::models::driver::Driver;
use crate::models::geofence::Geofence;
use crate::observability::metrics::Metrics;
use crate::route::provider::{HaversineRouteProvider, RouteProvider};

/// Owned repositories for the whole engine. DashMap entry guards give one
/// logical owner per record: ingest for different drivers runs concurrently,
/// operations on the same record serialize, and the maintenance sweeps take
/// the same guards as the foreground paths.
///
/// Lock ordering: a driver guard is always released before touching the
/// delivery or geofence maps, and vice versa. No guard is held across an
/// `.await`.
pub struct AppState {
    pub config: Config,
    pub drivers: DashMap<Uuid, Driver>,
    pub deliveries: DashMap<Uuid, Delivery>,
    /// Geofence pair per tracked delivery: [pickup, dropoff].
    pub geofences: DashMap<Uuid, [Geofence; 2]>,
    pub events: EventBus,
    pub route_provider: Arc<dyn RouteProvider>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, route_provider: Arc<dyn RouteProvider>) -> Self {
        let events = EventBus::new(config.event_buffer_size);

        Self {
            config,
            drivers: DashMap::new(),
            deliveries: DashMap::new(),
            geofences: DashMap::new(),
            events,
            route_provider,
            metrics: Metrics::new(),
        }
    }

    /// Engine with the deterministic haversine provider, as the binary and
    /// the integration tests run it.
    pub fn with_default_provider(config: Config) -> Self {
        let provider = Arc::new(HaversineRouteProvider::new(config.cruise_speed_kmh));
        Self::new(config, provider)
    }
}
