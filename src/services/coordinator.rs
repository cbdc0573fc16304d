//! coordinator.rs
//!
//! Единственный писатель таблиц `seats` и `bookings`. Каждая операция
//! выполняется в одной транзакции: либо коммит целиком, либо откат.
//!
//! Жизненный цикл брони: `none -> active -> inactive`, обратного пути нет.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingConfirmation, ResetSummary, Seat, SeatDetail};
use crate::services::allocator::{
    Allocation, Allocator, MAX_SEATS_PER_BOOKING, MIN_SEATS_PER_BOOKING,
};
use crate::services::reference::{is_well_formed, RandomReference, ReferenceGenerator};
use crate::store::{BookingStore, SeatRelease, SeatStore, Store, StoreTx, UserId};

#[derive(Clone)]
pub struct BookingCoordinator {
    store: Arc<dyn Store>,
    allocator: Allocator,
    references: Arc<dyn ReferenceGenerator>,
    settings: BookingConfig,
}

impl BookingCoordinator {
    pub fn new(store: Arc<dyn Store>, settings: BookingConfig) -> Self {
        Self {
            store,
            allocator: Allocator::new(),
            references: Arc::new(RandomReference),
            settings,
        }
    }

    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Books `num_seats` seats for `owner`.
    ///
    /// Fails with `AlreadyBooked` if the owner still holds an active booking and
    /// with `InsufficientSeats` if the pool (minus seats claimed by concurrent
    /// bookings) cannot cover the request.
    #[instrument(skip(self), fields(backend = ?self.store.backend()))]
    pub async fn create_booking(
        &self,
        owner: UserId,
        num_seats: i64,
    ) -> BookingResult<BookingConfirmation> {
        let requested = validate_seat_count(num_seats)?;

        let mut tx = self.store.begin().await?;
        let outcome = self.create_in(&mut *tx, owner, requested).await;
        let confirmation = finish(tx, outcome).await?;

        info!(
            reference = %confirmation.booking_reference,
            seats = ?confirmation.seat_ids,
            "booking created"
        );
        Ok(confirmation)
    }

    /// Cancels the owner's active booking. Unknown, foreign and already
    /// cancelled references all yield `NotFound`.
    #[instrument(skip(self), fields(backend = ?self.store.backend()))]
    pub async fn cancel_booking(&self, owner: UserId, reference: &str) -> BookingResult<u64> {
        if !is_well_formed(reference) {
            return Err(BookingError::NotFound);
        }

        let mut tx = self.store.begin().await?;
        let outcome = self.cancel_in(&mut *tx, owner, reference).await;
        let freed = finish(tx, outcome).await?;

        info!(freed, "booking cancelled");
        Ok(freed)
    }

    /// Frees every seat and deactivates every active booking. Callers must
    /// check admin rights before getting here.
    #[instrument(skip(self), fields(backend = ?self.store.backend()))]
    pub async fn reset_all(&self) -> BookingResult<ResetSummary> {
        warn!("RESET: freeing all seats and deactivating all bookings");

        let mut tx = self.store.begin().await?;
        let outcome = reset_in(&mut *tx).await;
        let summary = finish(tx, outcome).await?;

        warn!(
            seats_freed = summary.seats_freed,
            bookings_deactivated = summary.bookings_deactivated,
            "RESET: done"
        );
        Ok(summary)
    }

    // Чтения идут мимо транзакции и могут быть слегка устаревшими
    pub async fn list_seats(&self) -> BookingResult<Vec<Seat>> {
        self.store.list_seats().await
    }

    pub async fn list_bookings(&self, owner: UserId) -> BookingResult<Vec<Booking>> {
        self.store.list_active_bookings(owner).await
    }

    pub async fn count_free(&self) -> BookingResult<i64> {
        self.store.count_free().await
    }

    async fn create_in(
        &self,
        tx: &mut dyn StoreTx,
        owner: UserId,
        requested: usize,
    ) -> BookingResult<BookingConfirmation> {
        if tx.count_active_by_owner(owner).await? > 0 {
            return Err(BookingError::AlreadyBooked);
        }

        let available = tx.count_free().await?;
        if available < requested as i64 {
            return Err(BookingError::InsufficientSeats {
                requested: requested as i64,
                available,
            });
        }

        let allocation = self.claim(tx, requested).await?;
        let seat_ids = allocation.seat_ids();
        let now = Utc::now();

        let (booking_id, booking_reference) =
            self.insert_with_fresh_reference(tx, owner, &seat_ids, now).await?;

        let marked = tx.mark_booked(&seat_ids, owner, now).await?;
        if marked != seat_ids.len() as u64 {
            // места захвачены этой же транзакцией, сюда попадать не должны
            error!(marked, expected = seat_ids.len(), "claimed seats changed under the lock");
            return Err(BookingError::Busy(
                "claimed seats changed before they could be booked".to_string(),
            ));
        }

        Ok(BookingConfirmation {
            booking_id,
            booking_reference,
            seats: allocation.seats.iter().map(SeatDetail::from).collect(),
            seat_ids,
        })
    }

    /// Plans over a snapshot, then claims. Seats lost to a concurrent
    /// transaction are excluded and the plan is rebuilt until it is claimed
    /// or the allocator runs short of selectable seats.
    async fn claim(&self, tx: &mut dyn StoreTx, requested: usize) -> BookingResult<Allocation> {
        let mut contended: HashSet<i64> = HashSet::new();

        // каждый неудачный раунд добавляет в contended хотя бы одно место,
        // поэтому раундов не больше, чем мест в пуле
        let mut round = 0u32;
        loop {
            round += 1;
            let free: Vec<Seat> = tx
                .select_free_seats(None)
                .await?
                .into_iter()
                .filter(|seat| !contended.contains(&seat.id))
                .collect();

            let allocation = self.allocator.allocate(requested, &free)?;
            let wanted = allocation.seat_ids();
            let claimed = tx.claim_seats(&wanted).await?;

            if claimed.len() == wanted.len() {
                debug!(round, strategy = ?allocation.strategy, seats = ?wanted, "seats claimed");
                return Ok(allocation);
            }

            let lost: Vec<i64> = wanted
                .iter()
                .copied()
                .filter(|id| !claimed.contains(id))
                .collect();
            if lost.is_empty() {
                error!(?wanted, ?claimed, "claim returned seats outside the plan");
                return Err(BookingError::StoreUnavailable(
                    "seat claim returned unexpected ids".to_string(),
                ));
            }
            debug!(round, ?lost, "seats taken by a concurrent booking, re-planning");
            contended.extend(lost);
        }
    }

    async fn insert_with_fresh_reference(
        &self,
        tx: &mut dyn StoreTx,
        owner: UserId,
        seat_ids: &[i64],
        at: DateTime<Utc>,
    ) -> BookingResult<(i64, String)> {
        for attempt in 1..=self.settings.reference_attempts {
            let reference = self.references.generate();
            match tx.insert_booking(owner, seat_ids, &reference, at).await {
                Ok(booking_id) => return Ok((booking_id, reference)),
                Err(BookingError::DuplicateReference(taken)) => {
                    warn!(attempt, reference = %taken, "booking reference collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
        Err(BookingError::ReferenceGenerationFailed(self.settings.reference_attempts))
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn StoreTx,
        owner: UserId,
        reference: &str,
    ) -> BookingResult<u64> {
        let booking = tx.find_active_by_reference(reference, owner).await?;

        let freed = tx
            .mark_free(SeatRelease::OwnedBy {
                seat_ids: &booking.seat_ids,
                owner,
            })
            .await?;
        if freed < booking.seat_ids.len() as u64 {
            // чужие или уже свободные места пропускаем молча
            debug!(
                freed,
                expected = booking.seat_ids.len(),
                "some seats were no longer held by the owner"
            );
        }

        tx.deactivate(booking.id).await?;
        Ok(freed)
    }
}

// Порядок блокировок как в cancel: сначала брони, потом места
async fn reset_in(tx: &mut dyn StoreTx) -> BookingResult<ResetSummary> {
    let bookings_deactivated = tx.deactivate_all().await?;
    let seats_freed = tx.mark_free(SeatRelease::Everything).await?;
    Ok(ResetSummary {
        seats_freed,
        bookings_deactivated,
    })
}

fn validate_seat_count(num_seats: i64) -> BookingResult<usize> {
    let min = MIN_SEATS_PER_BOOKING as i64;
    let max = MAX_SEATS_PER_BOOKING as i64;
    if !(min..=max).contains(&num_seats) {
        return Err(BookingError::InvalidRequest(format!(
            "You can book between {min} and {max} seats"
        )));
    }
    Ok(num_seats as usize)
}

/// Коммит при успехе, откат при любой ошибке.
async fn finish<T>(tx: Box<dyn StoreTx>, outcome: BookingResult<T>) -> BookingResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await.inspect_err(log_store_failure)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed, connection will be discarded");
            }
            log_store_failure(&e);
            Err(e)
        }
    }
}

fn log_store_failure(err: &BookingError) {
    match err {
        BookingError::StoreUnavailable(_) => error!(error = %err, "store failure"),
        BookingError::Busy(_) => warn!(error = %err, "store busy"),
        _ => debug!(kind = err.kind(), "request rejected"),
    }
}
