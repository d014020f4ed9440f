use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::deliveries::{self, StartTracking};
use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::route::optimizer::{self, DeliveryStops, MultiStopPlan};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(start_tracking).get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/status", patch(set_status))
        .route("/deliveries/:id/delay", post(add_delay))
        .route("/plan", post(plan_multi))
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: DeliveryStatus,
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct AddDelayRequest {
    pub reason: String,
    pub minutes: u32,
}

#[derive(Deserialize)]
pub struct PlanRequest {
    pub driver_id: Uuid,
    /// Overrides the driver's live position as the plan origin.
    pub origin: Option<GeoPoint>,
    pub stops: Vec<DeliveryStops>,
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartTracking>,
) -> Result<Json<Delivery>, EngineError> {
    let delivery = deliveries::start_tracking(&state, payload).await?;
    Ok(Json(delivery))
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Json<Vec<Delivery>> {
    let mut deliveries: Vec<Delivery> = state
        .deliveries
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    deliveries.sort_by_key(|d| d.started_at);
    Json(deliveries)
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, EngineError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| EngineError::UnknownDelivery(id.to_string()))?;

    Ok(Json(delivery.value().clone()))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<Json<Delivery>, EngineError> {
    let delivery =
        deliveries::set_status(&state, id, payload.status, payload.location, payload.notes)?;
    Ok(Json(delivery))
}

async fn add_delay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddDelayRequest>,
) -> Result<Json<Delivery>, EngineError> {
    let delivery = deliveries::add_delay(&state, id, payload.reason, payload.minutes)?;
    Ok(Json(delivery))
}

async fn plan_multi(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlanRequest>,
) -> Result<Json<MultiStopPlan>, EngineError> {
    for stop in &payload.stops {
        if !stop.pickup.is_valid() || !stop.dropoff.is_valid() {
            return Err(EngineError::InvalidLocation(format!(
                "stop coordinates out of range for delivery {}",
                stop.delivery_id
            )));
        }
    }

    let origin = match payload.origin {
        Some(origin) if origin.is_valid() => origin,
        Some(_) => {
            return Err(EngineError::InvalidLocation(
                "plan origin out of range".to_string(),
            ))
        }
        None => {
            let driver = state
                .drivers
                .get(&payload.driver_id)
                .ok_or_else(|| EngineError::UnknownDriver(payload.driver_id.to_string()))?;
            driver
                .current_location
                .as_ref()
                .map(|sample| sample.point)
                .ok_or_else(|| {
                    EngineError::BadRequest(
                        "driver has no live position; supply an origin".to_string(),
                    )
                })?
        }
    };

    let plan = optimizer::plan_multi(
        state.route_provider.as_ref(),
        state.config.route_provider_timeout_ms,
        &origin,
        &payload.stops,
    )
    .await?;

    Ok(Json(plan))
}
