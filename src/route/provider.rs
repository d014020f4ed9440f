use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{timeout, Duration};

use crate::error::EngineError;
use crate::geo::{haversine_m, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouteEstimate {
    pub distance_m: f64,
    pub duration_s: f64,
}

/// Boundary to the external routing dependency. Implementations must be
/// idempotent enough for progress math: the same leg should yield the same
/// estimate across calls.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<RouteEstimate, EngineError>;
}

/// Deterministic provider: great-circle distance, duration at a fixed cruise
/// speed. The default in tests and the out-of-the-box binary.
pub struct HaversineRouteProvider {
    cruise_speed_kmh: f64,
}

impl HaversineRouteProvider {
    pub fn new(cruise_speed_kmh: f64) -> Self {
        Self { cruise_speed_kmh }
    }
}

#[async_trait]
impl RouteProvider for HaversineRouteProvider {
    async fn route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<RouteEstimate, EngineError> {
        let distance_m = haversine_m(origin, destination);
        let speed_ms = self.cruise_speed_kmh / 3.6;
        Ok(RouteEstimate {
            distance_m,
            duration_s: distance_m / speed_ms,
        })
    }
}

/// Every engine call site goes through here: a slow or dead provider turns
/// into `RouteUnavailable` instead of a hung ingest path.
pub async fn route_with_timeout(
    provider: &dyn RouteProvider,
    origin: &GeoPoint,
    destination: &GeoPoint,
    timeout_ms: u64,
) -> Result<RouteEstimate, EngineError> {
    match timeout(
        Duration::from_millis(timeout_ms),
        provider.route(origin, destination),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(EngineError::RouteUnavailable(format!(
            "route provider timed out after {timeout_ms}ms"
        ))),
    }
}
