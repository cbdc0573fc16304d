//! Хранилище мест и броней.
//!
//! Координатор видит хранилище только через эти трейты. Конкретный движок
//! (PostgreSQL или SQLite) выбирается при старте и передаётся явно.
//! Движки отличаются только стратегией блокировок:
//!
//! * **PostgreSQL**: `FOR UPDATE SKIP LOCKED` внутри savepoint, параллельные
//!   брони не видят места друг друга и не ждут их;
//! * **SQLite**: один глобальный асинхронный замок на все пишущие транзакции.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::error::BookingResult;
use crate::models::{Booking, Seat};

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

/// Какие места освобождать.
#[derive(Debug, Clone, Copy)]
pub enum SeatRelease<'a> {
    /// Все места пула, без условий (сброс).
    Everything,
    /// Только перечисленные места и только если ими владеет `owner`.
    OwnedBy { seat_ids: &'a [i64], owner: UserId },
}

/// Операции над таблицей мест внутри транзакции.
#[async_trait]
pub trait SeatStore: Send {
    async fn count_free(&mut self) -> BookingResult<i64>;

    /// Free seats in row-major order, at most `limit` of them. Plain read,
    /// use [`SeatStore::claim_seats`] to protect the chosen ones.
    async fn select_free_seats(&mut self, limit: Option<i64>) -> BookingResult<Vec<Seat>>;

    /// Locking read over `seat_ids`: claims all of them or none.
    ///
    /// Returns the ids that were still free and not held by another in-flight
    /// transaction. When that is fewer than requested nothing stays claimed.
    async fn claim_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<i64>>;

    /// Marks free seats as booked by `owner`; returns the number of rows changed.
    async fn mark_booked(
        &mut self,
        seat_ids: &[i64],
        owner: UserId,
        at: DateTime<Utc>,
    ) -> BookingResult<u64>;

    async fn mark_free(&mut self, release: SeatRelease<'_>) -> BookingResult<u64>;
}

/// Операции над таблицей броней внутри транзакции.
#[async_trait]
pub trait BookingStore: Send {
    /// Fails with `DuplicateReference` when `reference` is taken and with
    /// `AlreadyBooked` when the owner already holds an active booking.
    async fn insert_booking(
        &mut self,
        owner: UserId,
        seat_ids: &[i64],
        reference: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<i64>;

    async fn find_active_by_reference(
        &mut self,
        reference: &str,
        owner: UserId,
    ) -> BookingResult<Booking>;

    async fn count_active_by_owner(&mut self, owner: UserId) -> BookingResult<i64>;

    async fn deactivate(&mut self, booking_id: i64) -> BookingResult<()>;

    async fn deactivate_all(&mut self) -> BookingResult<u64>;
}

/// Открытая транзакция. Если её уронить без `commit`, изменения откатываются.
#[async_trait]
pub trait StoreTx: SeatStore + BookingStore {
    async fn commit(self: Box<Self>) -> BookingResult<()>;
    async fn rollback(self: Box<Self>) -> BookingResult<()>;
}

/// Handle to a provisioned store, shared by all request workers.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> Backend;

    /// Opens a booking-mutating transaction; fails with `Busy` if the
    /// engine's lock cannot be taken in time.
    async fn begin(&self) -> BookingResult<Box<dyn StoreTx>>;

    /// Runs migrations and seeds the 80-seat pool if it is missing.
    async fn provision(&self) -> BookingResult<()>;

    async fn list_seats(&self) -> BookingResult<Vec<Seat>>;

    async fn count_free(&self) -> BookingResult<i64>;

    async fn list_active_bookings(&self, owner: UserId) -> BookingResult<Vec<Booking>>;

    async fn close(&self);
}

pub fn backend_for_url(url: &str) -> Option<Backend> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Some(Backend::Postgres)
    } else if url.starts_with("sqlite:") {
        Some(Backend::Sqlite)
    } else {
        None
    }
}

/// Подключается к движку, выбранному по схеме `DATABASE_URL`.
pub async fn connect(config: &DatabaseConfig) -> BookingResult<Arc<dyn Store>> {
    match backend_for_url(&config.url) {
        Some(Backend::Postgres) => Ok(Arc::new(PgStore::connect(config).await?)),
        Some(Backend::Sqlite) => Ok(Arc::new(SqliteStore::connect(config).await?)),
        None => Err(crate::error::BookingError::StoreUnavailable(format!(
            "unsupported database url scheme: {}",
            config.url.split(':').next().unwrap_or_default()
        ))),
    }
}
