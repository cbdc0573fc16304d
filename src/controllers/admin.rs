use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/reset", post(reset_all))
}

// POST /api/admin/reset - освобождает все места и гасит все брони
async fn reset_all(State(state): State<Arc<AppState>>, user: AuthUser) -> Response {
    if !user.is_admin {
        tracing::warn!(
            user_id = user.user_id,
            username = %user.username,
            "non-admin tried to reset bookings"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Admin access required", "kind": "forbidden"})),
        )
            .into_response();
    }

    tracing::info!(user_id = user.user_id, username = %user.username, "admin reset requested");
    match state.coordinator.reset_all().await {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "message": "All bookings reset",
            "seatsFreed": summary.seats_freed,
            "bookingsDeactivated": summary.bookings_deactivated,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}
