use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Acquire, PgPool, Postgres, Transaction};
use tracing::{debug, info};

use super::{Backend, BookingStore, SeatRelease, SeatStore, Store, StoreTx, UserId};
use crate::config::DatabaseConfig;
use crate::error::{BookingError, BookingResult};
use crate::models::booking::encode_seat_ids;
use crate::models::{seat_layout, Booking, BookingRow, Seat};

const SEAT_COLUMNS: &str =
    "id, seat_number, row_number, position_in_row, is_booked, booked_by, booked_at";

const BOOKING_COLUMNS: &str =
    "id, user_id, seat_ids, booking_reference, created_at, is_active";

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> BookingResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        Ok(Self::from_pool(pool, config.lock_timeout_ms))
    }

    pub fn from_pool(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self { pool, lock_timeout_ms }
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn begin(&self) -> BookingResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;

        // lock_timeout действует только до конца этой транзакции
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgTx { tx }))
    }

    async fn provision(&self) -> BookingResult<()> {
        info!("Running database migrations (postgres)...");
        sqlx::migrate!("./migrations/postgres").run(&self.pool).await?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for position in seat_layout() {
            inserted += sqlx::query(
                "INSERT INTO seats (seat_number, row_number, position_in_row)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (row_number, position_in_row) DO NOTHING",
            )
            .bind(position.label())
            .bind(position.row_number)
            .bind(position.position_in_row)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        info!(inserted, "Seat pool provisioned");
        Ok(())
    }

    async fn list_seats(&self) -> BookingResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats ORDER BY row_number, position_in_row"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn count_free(&self) -> BookingResult<i64> {
        let free = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seats WHERE is_booked = FALSE")
            .fetch_one(&self.pool)
            .await?;
        Ok(free)
    }

    async fn list_active_bookings(&self, owner: UserId) -> BookingResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE user_id = $1 AND is_active = TRUE
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SeatStore for PgTx {
    async fn count_free(&mut self) -> BookingResult<i64> {
        let free = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seats WHERE is_booked = FALSE")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(free)
    }

    async fn select_free_seats(&mut self, limit: Option<i64>) -> BookingResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats
             WHERE is_booked = FALSE
             ORDER BY row_number, position_in_row
             LIMIT $1"
        ))
        // LIMIT NULL в postgres означает "без ограничения"
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(seats)
    }

    async fn claim_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<i64>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Savepoint: при неполном захвате откатываемся к нему и отпускаем
        // строки, которые успели заблокировать
        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let claimed = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM seats
             WHERE id = ANY($1) AND is_booked = FALSE
             ORDER BY row_number, position_in_row
             FOR UPDATE SKIP LOCKED",
        )
        .bind(seat_ids)
        .fetch_all(&mut *savepoint)
        .await?;

        if claimed.len() == seat_ids.len() {
            savepoint.commit().await?;
        } else {
            debug!(
                requested = seat_ids.len(),
                claimed = claimed.len(),
                "partial claim, releasing row locks"
            );
            savepoint.rollback().await?;
        }
        Ok(claimed)
    }

    async fn mark_booked(
        &mut self,
        seat_ids: &[i64],
        owner: UserId,
        at: DateTime<Utc>,
    ) -> BookingResult<u64> {
        let result = sqlx::query(
            "UPDATE seats
             SET is_booked = TRUE, booked_by = $1, booked_at = $2
             WHERE id = ANY($3) AND is_booked = FALSE",
        )
        .bind(owner)
        .bind(at)
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_free(&mut self, release: SeatRelease<'_>) -> BookingResult<u64> {
        let result = match release {
            SeatRelease::Everything => {
                sqlx::query(
                    "UPDATE seats SET is_booked = FALSE, booked_by = NULL, booked_at = NULL
                     WHERE is_booked = TRUE",
                )
                .execute(&mut *self.tx)
                .await?
            }
            SeatRelease::OwnedBy { seat_ids, owner } => {
                sqlx::query(
                    "UPDATE seats SET is_booked = FALSE, booked_by = NULL, booked_at = NULL
                     WHERE id = ANY($1) AND booked_by = $2",
                )
                .bind(seat_ids)
                .bind(owner)
                .execute(&mut *self.tx)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BookingStore for PgTx {
    async fn insert_booking(
        &mut self,
        owner: UserId,
        seat_ids: &[i64],
        reference: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<i64> {
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO bookings (user_id, seat_ids, booking_reference, created_at, is_active)
             VALUES ($1, $2, $3, $4, TRUE)
             ON CONFLICT (booking_reference) DO NOTHING
             RETURNING id",
        )
        .bind(owner)
        .bind(encode_seat_ids(seat_ids)?)
        .bind(reference)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await;

        match inserted {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(BookingError::DuplicateReference(reference.to_string())),
            // единственный оставшийся unique - одна активная бронь на пользователя
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(BookingError::AlreadyBooked)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_active_by_reference(
        &mut self,
        reference: &str,
        owner: UserId,
    ) -> BookingResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE booking_reference = $1 AND user_id = $2 AND is_active = TRUE
             FOR UPDATE"
        ))
        .bind(reference)
        .bind(owner)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or(BookingError::NotFound)?.try_into()
    }

    async fn count_active_by_owner(&mut self, owner: UserId) -> BookingResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(owner)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn deactivate(&mut self, booking_id: i64) -> BookingResult<()> {
        let result = sqlx::query("UPDATE bookings SET is_active = FALSE WHERE id = $1 AND is_active = TRUE")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BookingError::NotFound);
        }
        Ok(())
    }

    async fn deactivate_all(&mut self) -> BookingResult<u64> {
        let result = sqlx::query("UPDATE bookings SET is_active = FALSE WHERE is_active = TRUE")
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> BookingResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BookingResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
