pub mod booking;
pub mod seat;

pub use booking::{Booking, BookingConfirmation, BookingRow, ResetSummary};
pub use seat::{seat_label, seat_layout, Seat, SeatDetail, SeatPosition, TOTAL_SEATS};
