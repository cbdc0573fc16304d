use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::{Backend, BookingStore, SeatRelease, SeatStore, Store, StoreTx, UserId};
use crate::config::DatabaseConfig;
use crate::error::{BookingError, BookingResult};
use crate::models::booking::encode_seat_ids;
use crate::models::{seat_layout, Booking, BookingRow, Seat};

const SEAT_COLUMNS: &str =
    "id, seat_number, row_number, position_in_row, is_booked, booked_by, booked_at";

const BOOKING_COLUMNS: &str =
    "id, user_id, seat_ids, booking_reference, created_at, is_active";

/// SQLite не умеет `SKIP LOCKED`, поэтому все пишущие транзакции
/// выстраиваются в очередь за одним замком.
#[derive(Clone)]
pub struct SqliteStore {
    pub pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> BookingResult<Self> {
        let in_memory = config.url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.lock_timeout());
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // in-memory база живёт, пока жив её единственный коннект
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.pool_size)
        };

        let pool = pool_options
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool, config.lock_timeout()))
    }

    pub fn from_pool(pool: SqlitePool, lock_timeout: Duration) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            lock_timeout,
        }
    }

    async fn acquire_write_lock(&self) -> BookingResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.lock_timeout, self.write_lock.clone().lock_owned())
            .await
            .map_err(|_| {
                warn!(timeout_ms = self.lock_timeout.as_millis() as u64, "write lock wait timed out");
                BookingError::Busy("timed out waiting for the booking write lock".to_string())
            })
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn begin(&self) -> BookingResult<Box<dyn StoreTx>> {
        let guard = self.acquire_write_lock().await?;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx, _guard: guard }))
    }

    async fn provision(&self) -> BookingResult<()> {
        info!("Running database migrations (sqlite)...");
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;

        let _guard = self.acquire_write_lock().await?;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for position in seat_layout() {
            inserted += sqlx::query(
                "INSERT INTO seats (seat_number, row_number, position_in_row)
                 VALUES (?, ?, ?)
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
        let free = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seats WHERE is_booked = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(free)
    }

    async fn list_active_bookings(&self, owner: UserId) -> BookingResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE user_id = ? AND is_active = 1
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

pub struct SqliteTx {
    // tx объявлен первым: при drop откат ставится в очередь до снятия замка
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, seat_ids: &[i64]) {
    builder.push("(");
    let mut ids = builder.separated(", ");
    for id in seat_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
}

#[async_trait]
impl SeatStore for SqliteTx {
    async fn count_free(&mut self) -> BookingResult<i64> {
        let free = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seats WHERE is_booked = 0")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(free)
    }

    async fn select_free_seats(&mut self, limit: Option<i64>) -> BookingResult<Vec<Seat>> {
        // LIMIT -1 в sqlite означает "без ограничения"
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats
             WHERE is_booked = 0
             ORDER BY row_number, position_in_row
             LIMIT ?"
        ))
        .bind(limit.unwrap_or(-1))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(seats)
    }

    async fn claim_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<i64>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Под глобальным замком конкурентов нет: достаточно перечитать статус
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM seats WHERE is_booked = 0 AND id IN ");
        push_id_list(&mut builder, seat_ids);
        builder.push(" ORDER BY row_number, position_in_row");

        let claimed = builder
            .build_query_scalar::<i64>()
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(claimed)
    }

    async fn mark_booked(
        &mut self,
        seat_ids: &[i64],
        owner: UserId,
        at: DateTime<Utc>,
    ) -> BookingResult<u64> {
        if seat_ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE seats SET is_booked = 1, booked_by = ");
        builder.push_bind(owner);
        builder.push(", booked_at = ");
        builder.push_bind(at);
        builder.push(" WHERE is_booked = 0 AND id IN ");
        push_id_list(&mut builder, seat_ids);

        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn mark_free(&mut self, release: SeatRelease<'_>) -> BookingResult<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "UPDATE seats SET is_booked = 0, booked_by = NULL, booked_at = NULL WHERE ",
        );
        match release {
            SeatRelease::Everything => {
                builder.push("is_booked = 1");
            }
            SeatRelease::OwnedBy { seat_ids, owner } => {
                if seat_ids.is_empty() {
                    return Ok(0);
                }
                builder.push("booked_by = ");
                builder.push_bind(owner);
                builder.push(" AND id IN ");
                push_id_list(&mut builder, seat_ids);
            }
        }

        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BookingStore for SqliteTx {
    async fn insert_booking(
        &mut self,
        owner: UserId,
        seat_ids: &[i64],
        reference: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<i64> {
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO bookings (user_id, seat_ids, booking_reference, created_at, is_active)
             VALUES (?, ?, ?, ?, 1)
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
             WHERE booking_reference = ? AND user_id = ? AND is_active = 1"
        ))
        .bind(reference)
        .bind(owner)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or(BookingError::NotFound)?.try_into()
    }

    async fn count_active_by_owner(&mut self, owner: UserId) -> BookingResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE user_id = ? AND is_active = 1",
        )
        .bind(owner)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn deactivate(&mut self, booking_id: i64) -> BookingResult<()> {
        let result = sqlx::query("UPDATE bookings SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BookingError::NotFound);
        }
        Ok(())
    }

    async fn deactivate_all(&mut self) -> BookingResult<u64> {
        let result = sqlx::query("UPDATE bookings SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn commit(self: Box<Self>) -> BookingResult<()> {
        let SqliteTx { tx, _guard } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BookingResult<()> {
        let SqliteTx { tx, _guard } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
