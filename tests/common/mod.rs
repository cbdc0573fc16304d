#![allow(dead_code)]

pub mod scripted;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use seat_booking::config::{BookingConfig, DatabaseConfig};
use seat_booking::models::{Booking, BookingRow, Seat, TOTAL_SEATS};
use seat_booking::services::coordinator::BookingCoordinator;
use seat_booking::store::{SqliteStore, Store};
use sqlx::SqlitePool;

pub async fn sqlite_store_with(config: DatabaseConfig) -> Arc<SqliteStore> {
    let store = SqliteStore::connect(&config)
        .await
        .expect("failed to open in-memory sqlite");
    store.provision().await.expect("failed to provision seat pool");
    Arc::new(store)
}

pub async fn sqlite_store() -> Arc<SqliteStore> {
    sqlite_store_with(DatabaseConfig::for_url("sqlite::memory:")).await
}

pub fn coordinator(store: Arc<SqliteStore>) -> BookingCoordinator {
    BookingCoordinator::new(store, BookingConfig::default())
}

pub async fn seed_users(pool: &SqlitePool, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, email, password_hash) VALUES (?, ?, 'x') RETURNING id",
        )
        .bind(format!("user{i}"))
        .bind(format!("user{i}@example.com"))
        .fetch_one(pool)
        .await
        .expect("failed to seed user");
        ids.push(id);
    }
    ids
}

pub async fn active_bookings(pool: &SqlitePool) -> Vec<Booking> {
    sqlx::query_as::<_, BookingRow>(
        "SELECT id, user_id, seat_ids, booking_reference, created_at, is_active
         FROM bookings WHERE is_active = 1",
    )
    .fetch_all(pool)
    .await
    .expect("failed to read bookings")
    .into_iter()
    .map(|row| Booking::try_from(row).expect("corrupt booking row"))
    .collect()
}

/// Seat table and active bookings must describe the same set of held seats.
pub async fn assert_consistent(store: &SqliteStore) {
    let seats: Vec<Seat> = store.list_seats().await.expect("list seats");
    assert_eq!(seats.len() as i64, TOTAL_SEATS);

    for seat in &seats {
        assert_eq!(seat.is_booked, seat.booked_by.is_some(), "seat {} flag/owner mismatch", seat.seat_number);
    }

    let bookings = active_bookings(&store.pool).await;
    let booked = seats.iter().filter(|s| s.is_booked).count();
    let referenced: usize = bookings.iter().map(|b| b.seat_ids.len()).sum();
    assert_eq!(booked, referenced, "booked seats vs active booking seats");

    let by_id: HashMap<i64, &Seat> = seats.iter().map(|s| (s.id, s)).collect();
    let mut seen = HashSet::new();
    for booking in &bookings {
        for seat_id in &booking.seat_ids {
            assert!(seen.insert(*seat_id), "seat {seat_id} is in two active bookings");
            let seat = by_id[seat_id];
            assert_eq!(seat.booked_by, Some(booking.user_id), "seat {} owner", seat.seat_number);
        }
    }
}
