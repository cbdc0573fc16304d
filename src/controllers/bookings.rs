use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::models::SeatDetail;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(get_user_bookings).post(create_booking))
        .route("/bookings/{reference}/cancel", post(cancel_booking))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[serde(rename = "numSeats")]
    #[validate(range(min = 1, max = 7, message = "You can book between 1 and 7 seats"))]
    num_seats: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingResponse {
    success: bool,
    booking_ref: String,
    seat_ids: Vec<i64>,
    seats: Vec<SeatDetail>,
    message: String,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let Json(req) = payload.map_err(|e| BookingError::InvalidRequest(e.body_text()))?;
    req.validate().map_err(|e| {
        let message = e
            .field_errors()
            .values()
            .flat_map(|errors| errors.iter())
            .find_map(|error| error.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "invalid booking request".to_string());
        BookingError::InvalidRequest(message)
    })?;

    let confirmation = state
        .coordinator
        .create_booking(user.user_id, req.num_seats)
        .await?;

    Ok(Json(CreateBookingResponse {
        success: true,
        message: format!("Successfully booked {} seats", confirmation.seat_ids.len()),
        booking_ref: confirmation.booking_reference,
        seat_ids: confirmation.seat_ids,
        seats: confirmation.seats,
    }))
}

// GET /api/bookings - только активные брони текущего пользователя
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = state.coordinator.list_bookings(user.user_id).await?;
    Ok(Json(bookings))
}

// POST /api/bookings/{reference}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, BookingError> {
    state
        .coordinator
        .cancel_booking(user.user_id, &reference)
        .await?;

    Ok(Json(serde_json::json!({"success": true, "message": "Booking cancelled"})))
}
