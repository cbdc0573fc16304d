use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const FULL_ROWS: i32 = 11;
pub const SEATS_PER_ROW: i32 = 7;
pub const LAST_ROW_SEATS: i32 = 3;
pub const TOTAL_SEATS: i64 = (FULL_ROWS * SEATS_PER_ROW + LAST_ROW_SEATS) as i64;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub seat_number: String,
    pub row_number: i32,
    pub position_in_row: i32,
    pub is_booked: bool,
    pub booked_by: Option<i64>,
    pub booked_at: Option<DateTime<Utc>>,
}

/// Краткое описание места, которое возвращается вместе с бронью.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDetail {
    pub id: i64,
    pub seat_number: String,
    pub row_number: i32,
    pub position_in_row: i32,
}

impl From<&Seat> for SeatDetail {
    fn from(seat: &Seat) -> Self {
        Self {
            id: seat.id,
            seat_number: seat.seat_number.clone(),
            row_number: seat.row_number,
            position_in_row: seat.position_in_row,
        }
    }
}

pub fn seat_label(row_number: i32, position_in_row: i32) -> String {
    format!("R{}-S{}", row_number, position_in_row)
}

/// Позиция места в зале до того, как у него появился id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatPosition {
    pub row_number: i32,
    pub position_in_row: i32,
}

impl SeatPosition {
    pub fn label(&self) -> String {
        seat_label(self.row_number, self.position_in_row)
    }
}

/// Rows 1-11 hold 7 seats, row 12 holds the last 3.
pub fn seat_layout() -> impl Iterator<Item = SeatPosition> {
    let full = (1..=FULL_ROWS).flat_map(|row_number| {
        (1..=SEATS_PER_ROW).map(move |position_in_row| SeatPosition { row_number, position_in_row })
    });
    let last = (1..=LAST_ROW_SEATS).map(|position_in_row| SeatPosition {
        row_number: FULL_ROWS + 1,
        position_in_row,
    });
    full.chain(last)
}
