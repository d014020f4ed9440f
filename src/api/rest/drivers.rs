use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::drivers::{self, ActiveFilter, DriverInfo, LocationUpdate};
use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverSnapshot, LocationSample, RankedDriver, Vehicle};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_active))
        .route("/drivers/nearest", get(find_nearest))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/location", post(ingest_location))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
}

#[derive(Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
    pub max_distance_m: Option<f64>,
    pub limit: Option<usize>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, EngineError> {
    if payload.name.trim().is_empty() {
        return Err(EngineError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = drivers::register(
        &state,
        payload.id,
        DriverInfo {
            name: payload.name,
            phone: payload.phone,
            vehicle: payload.vehicle,
        },
    );

    Ok(Json(driver))
}

async fn ingest_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationUpdate>,
) -> Result<Json<LocationSample>, EngineError> {
    let sample = drivers::ingest_location(&state, id, payload)?;
    Ok(Json(sample))
}

async fn list_active(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ActiveFilter>,
) -> Result<Json<Vec<DriverSnapshot>>, EngineError> {
    Ok(Json(drivers::list_active(&state, filter)?))
}

async fn find_nearest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<Vec<RankedDriver>>, EngineError> {
    let point = GeoPoint::new(query.lat, query.lng);
    if !point.is_valid() {
        return Err(EngineError::InvalidLocation(
            "query coordinates out of range".to_string(),
        ));
    }

    let ranked = drivers::find_nearest(
        &state,
        point,
        query.max_distance_m.unwrap_or(10_000.0),
        query.limit.unwrap_or(5),
    );
    Ok(Json(ranked))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, EngineError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| EngineError::UnknownDriver(id.to_string()))?;

    Ok(Json(driver.value().clone()))
}
