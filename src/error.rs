use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("invalid transition: {0}")]
    AlreadyInStatus(String),

    #[error("route provider unavailable: {0}")]
    RouteUnavailable(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::UnknownDriver(msg) | EngineError::UnknownDelivery(msg) => {
                (StatusCode::NOT_FOUND, msg.clone())
            }
            EngineError::InvalidLocation(msg) | EngineError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            EngineError::AlreadyInStatus(msg) => (StatusCode::CONFLICT, msg.clone()),
            EngineError::RouteUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            EngineError::CapacityExceeded(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            EngineError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
