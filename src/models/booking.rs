use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::BookingError;
use crate::models::SeatDetail;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub seat_ids: Vec<i64>,
    pub booking_reference: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

// Строка таблицы bookings как она лежит в БД: seat_ids хранится JSON-текстом
#[derive(Debug, FromRow)]
pub struct BookingRow {
    pub id: i64,
    pub user_id: i64,
    pub seat_ids: String,
    pub booking_reference: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let seat_ids = decode_seat_ids(&row.seat_ids)?;
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            seat_ids,
            booking_reference: row.booking_reference,
            created_at: row.created_at,
            is_active: row.is_active,
        })
    }
}

pub fn encode_seat_ids(seat_ids: &[i64]) -> Result<String, BookingError> {
    serde_json::to_string(seat_ids)
        .map_err(|e| BookingError::StoreUnavailable(format!("cannot encode seat ids: {e}")))
}

pub fn decode_seat_ids(raw: &str) -> Result<Vec<i64>, BookingError> {
    serde_json::from_str(raw)
        .map_err(|e| BookingError::StoreUnavailable(format!("corrupt seat_ids {raw:?}: {e}")))
}

/// Результат успешного создания брони.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    pub booking_id: i64,
    pub booking_reference: String,
    pub seat_ids: Vec<i64>,
    pub seats: Vec<SeatDetail>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetSummary {
    pub seats_freed: u64,
    pub bookings_deactivated: u64,
}
