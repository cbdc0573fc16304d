//! Store wrapper that loses seat claims on demand and records the order of
//! writes, standing in for concurrent transactions on a single-writer engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use seat_booking::error::BookingResult;
use seat_booking::models::{Booking, Seat};
use seat_booking::store::{
    Backend, BookingStore, SeatRelease, SeatStore, SqliteStore, Store, StoreTx, UserId,
};

pub struct ScriptedStore {
    inner: Arc<SqliteStore>,
    losses: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptedStore {
    /// The first `losses` claims each lose the lowest seat they asked for.
    pub fn losing(inner: Arc<SqliteStore>, losses: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            losses: Arc::new(AtomicUsize::new(losses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for ScriptedStore {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn begin(&self) -> BookingResult<Box<dyn StoreTx>> {
        Ok(Box::new(ScriptedTx {
            inner: self.inner.begin().await?,
            losses: self.losses.clone(),
            calls: self.calls.clone(),
        }))
    }

    async fn provision(&self) -> BookingResult<()> {
        self.inner.provision().await
    }

    async fn list_seats(&self) -> BookingResult<Vec<Seat>> {
        self.inner.list_seats().await
    }

    async fn count_free(&self) -> BookingResult<i64> {
        Store::count_free(self.inner.as_ref()).await
    }

    async fn list_active_bookings(&self, owner: UserId) -> BookingResult<Vec<Booking>> {
        self.inner.list_active_bookings(owner).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

struct ScriptedTx {
    inner: Box<dyn StoreTx>,
    losses: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptedTx {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SeatStore for ScriptedTx {
    async fn count_free(&mut self) -> BookingResult<i64> {
        self.inner.count_free().await
    }

    async fn select_free_seats(&mut self, limit: Option<i64>) -> BookingResult<Vec<Seat>> {
        self.inner.select_free_seats(limit).await
    }

    async fn claim_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<i64>> {
        self.record("claim_seats");
        let mut claimed = self.inner.claim_seats(seat_ids).await?;
        let lose = self
            .losses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose && !claimed.is_empty() {
            claimed.remove(0);
        }
        Ok(claimed)
    }

    async fn mark_booked(
        &mut self,
        seat_ids: &[i64],
        owner: UserId,
        at: DateTime<Utc>,
    ) -> BookingResult<u64> {
        self.record("mark_booked");
        self.inner.mark_booked(seat_ids, owner, at).await
    }

    async fn mark_free(&mut self, release: SeatRelease<'_>) -> BookingResult<u64> {
        self.record("mark_free");
        self.inner.mark_free(release).await
    }
}

#[async_trait]
impl BookingStore for ScriptedTx {
    async fn insert_booking(
        &mut self,
        owner: UserId,
        seat_ids: &[i64],
        reference: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<i64> {
        self.record("insert_booking");
        self.inner.insert_booking(owner, seat_ids, reference, at).await
    }

    async fn find_active_by_reference(
        &mut self,
        reference: &str,
        owner: UserId,
    ) -> BookingResult<Booking> {
        self.record("find_active_by_reference");
        self.inner.find_active_by_reference(reference, owner).await
    }

    async fn count_active_by_owner(&mut self, owner: UserId) -> BookingResult<i64> {
        self.inner.count_active_by_owner(owner).await
    }

    async fn deactivate(&mut self, booking_id: i64) -> BookingResult<()> {
        self.record("deactivate");
        self.inner.deactivate(booking_id).await
    }

    async fn deactivate_all(&mut self) -> BookingResult<u64> {
        self.record("deactivate_all");
        self.inner.deactivate_all().await
    }
}

#[async_trait]
impl StoreTx for ScriptedTx {
    async fn commit(self: Box<Self>) -> BookingResult<()> {
        let ScriptedTx { inner, .. } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> BookingResult<()> {
        let ScriptedTx { inner, .. } = *self;
        inner.rollback().await
    }
}
