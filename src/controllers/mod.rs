pub mod admin;
pub mod bookings;
pub mod seats;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use std::sync::Arc;

use crate::error::BookingError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(bookings::routes())
        .merge(admin::routes())
}

pub fn status_for(err: &BookingError) -> StatusCode {
    match err {
        BookingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BookingError::NotFound => StatusCode::NOT_FOUND,
        BookingError::AlreadyBooked | BookingError::InsufficientSeats { .. } => StatusCode::CONFLICT,
        BookingError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        BookingError::DuplicateReference(_)
        | BookingError::ReferenceGenerationFailed(_)
        | BookingError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Единый формат ошибок: {"error": ..., "kind": ...}
impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = serde_json::json!({
            "error": message,
            "kind": self.kind(),
        });
        if let BookingError::InsufficientSeats { requested, available } = &self {
            body["requested"] = (*requested).into();
            body["available"] = (*available).into();
        }

        if self.is_retryable() {
            (status, [(header::RETRY_AFTER, "1")], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}
