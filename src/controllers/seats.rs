use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::error::BookingError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/seats", get(get_seats))
}

// GET /api/seats
async fn get_seats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, BookingError> {
    let seats = state.coordinator.list_seats().await?;
    Ok(Json(seats))
}
