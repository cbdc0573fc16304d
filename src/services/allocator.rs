//! allocator.rs
//!
//! Выбор мест под запрос из снимка свободных мест. Чистая логика без
//! обращений к БД; захват выбранных мест делает координатор.
//!
//! Политика (по приоритету):
//! 1.  **ContiguousRun**: самый короткий непрерывный отрезок свободных мест
//!     в одном ряду, вмещающий запрос. При равной длине побеждает ряд с
//!     меньшим номером.
//! 2.  **SameRow**: непрерывного отрезка нет, но в каком-то ряду свободно
//!     не меньше `n` мест; берём первые `n` мест самого "тесного" ряда.
//! 3.  **RowMajor**: первые `n` свободных мест в порядке (ряд, место).
//!
//! Политика жадная и детерминированная, оптимальной упаковки не ищет.

use std::collections::BTreeMap;

use crate::error::BookingError;
use crate::models::Seat;

pub const MIN_SEATS_PER_BOOKING: usize = 1;
pub const MAX_SEATS_PER_BOOKING: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    ContiguousRun,
    SameRow,
    RowMajor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub seats: Vec<Seat>,
    pub strategy: AllocationStrategy,
}

impl Allocation {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.seats.iter().map(|seat| seat.id).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Allocator;

impl Allocator {
    pub fn new() -> Self {
        Self
    }

    /// Picks exactly `requested` seats out of `free`.
    ///
    /// `free` is the caller's snapshot of unbooked seats in any order; booked
    /// seats that slip into it are ignored.
    pub fn allocate(&self, requested: usize, free: &[Seat]) -> Result<Allocation, BookingError> {
        if !(MIN_SEATS_PER_BOOKING..=MAX_SEATS_PER_BOOKING).contains(&requested) {
            return Err(BookingError::InvalidRequest(format!(
                "You can book between {} and {} seats",
                MIN_SEATS_PER_BOOKING, MAX_SEATS_PER_BOOKING
            )));
        }

        let mut ordered: Vec<&Seat> = free.iter().filter(|seat| !seat.is_booked).collect();
        ordered.sort_by_key(|seat| (seat.row_number, seat.position_in_row));

        if ordered.len() < requested {
            return Err(BookingError::InsufficientSeats {
                requested: requested as i64,
                available: ordered.len() as i64,
            });
        }

        let mut rows: BTreeMap<i32, Vec<&Seat>> = BTreeMap::new();
        for seat in ordered.iter().copied() {
            rows.entry(seat.row_number).or_default().push(seat);
        }

        if let Some(run) = tightest_run(&rows, requested) {
            return Ok(Allocation {
                seats: take(run, requested),
                strategy: AllocationStrategy::ContiguousRun,
            });
        }

        // строгое `<`: при равенстве остаётся ряд с меньшим номером
        let mut best_row: Option<&[&Seat]> = None;
        for seats in rows.values() {
            if seats.len() >= requested && best_row.map_or(true, |best| seats.len() < best.len()) {
                best_row = Some(seats.as_slice());
            }
        }
        if let Some(row) = best_row {
            return Ok(Allocation {
                seats: take(row, requested),
                strategy: AllocationStrategy::SameRow,
            });
        }

        Ok(Allocation {
            seats: take(&ordered, requested),
            strategy: AllocationStrategy::RowMajor,
        })
    }
}

fn tightest_run<'a>(rows: &'a BTreeMap<i32, Vec<&'a Seat>>, requested: usize) -> Option<&'a [&'a Seat]> {
    let mut best: Option<&[&Seat]> = None;
    for seats in rows.values() {
        for run in seats.chunk_by(|a, b| b.position_in_row == a.position_in_row + 1) {
            if run.len() >= requested && best.map_or(true, |b| run.len() < b.len()) {
                best = Some(run);
            }
        }
    }
    best
}

fn take(seats: &[&Seat], requested: usize) -> Vec<Seat> {
    seats.iter().take(requested).map(|seat| (*seat).clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{seat_label, seat_layout};
    use proptest::prelude::*;

    fn seat(id: i64, row_number: i32, position_in_row: i32) -> Seat {
        Seat {
            id,
            seat_number: seat_label(row_number, position_in_row),
            row_number,
            position_in_row,
            is_booked: false,
            booked_by: None,
            booked_at: None,
        }
    }

    fn full_pool() -> Vec<Seat> {
        seat_layout()
            .enumerate()
            .map(|(i, p)| seat(i as i64 + 1, p.row_number, p.position_in_row))
            .collect()
    }

    fn labels(allocation: &Allocation) -> Vec<String> {
        allocation.seats.iter().map(|s| s.seat_number.clone()).collect()
    }

    #[test]
    fn only_row_one_free_takes_its_first_seats() {
        let free: Vec<Seat> = full_pool().into_iter().filter(|s| s.row_number == 1).collect();

        let allocation = Allocator::new().allocate(5, &free).unwrap();

        assert_eq!(labels(&allocation), ["R1-S1", "R1-S2", "R1-S3", "R1-S4", "R1-S5"]);
        assert_eq!(allocation.strategy, AllocationStrategy::ContiguousRun);
    }

    #[test]
    fn scattered_seats_fall_back_to_row_major() {
        let free = vec![
            seat(30, 5, 2),
            seat(3, 1, 3),
            seat(80, 12, 3),
            seat(10, 2, 3),
            seat(21, 3, 7),
        ];

        let allocation = Allocator::new().allocate(5, &free).unwrap();

        assert_eq!(labels(&allocation), ["R1-S3", "R2-S3", "R3-S7", "R5-S2", "R12-S3"]);
        assert_eq!(allocation.strategy, AllocationStrategy::RowMajor);
    }

    #[test]
    fn fresh_pool_books_seven_in_row_one() {
        let allocation = Allocator::new().allocate(7, &full_pool()).unwrap();
        assert_eq!(allocation.seats.first().map(|s| s.seat_number.as_str()), Some("R1-S1"));
        assert!(allocation.seats.iter().all(|s| s.row_number == 1));
    }

    #[test]
    fn prefers_the_tightest_run_that_fits() {
        // ряд 12 ровно на 3 места лучше любого ряда на 7
        let allocation = Allocator::new().allocate(3, &full_pool()).unwrap();
        assert_eq!(labels(&allocation), ["R12-S1", "R12-S2", "R12-S3"]);
    }

    #[test]
    fn equal_runs_go_to_the_lower_row() {
        let free = vec![seat(1, 4, 1), seat(2, 4, 2), seat(3, 2, 5), seat(4, 2, 6)];
        let allocation = Allocator::new().allocate(2, &free).unwrap();
        assert_eq!(labels(&allocation), ["R2-S5", "R2-S6"]);
    }

    #[test]
    fn non_contiguous_row_beats_spreading_across_rows() {
        let free = vec![seat(1, 1, 1), seat(3, 1, 3), seat(5, 1, 5), seat(9, 2, 1)];
        let allocation = Allocator::new().allocate(3, &free).unwrap();
        assert_eq!(labels(&allocation), ["R1-S1", "R1-S3", "R1-S5"]);
        assert_eq!(allocation.strategy, AllocationStrategy::SameRow);
    }

    #[test]
    fn rejects_counts_outside_one_to_seven() {
        let pool = full_pool();
        for requested in [0, 8] {
            let err = Allocator::new().allocate(requested, &pool).unwrap_err();
            assert_eq!(err.kind(), "invalid_request");
        }
    }

    #[test]
    fn reports_available_count_when_short() {
        let free = vec![seat(1, 1, 1), seat(2, 3, 4)];
        match Allocator::new().allocate(4, &free) {
            Err(BookingError::InsufficientSeats { requested, available }) => {
                assert_eq!((requested, available), (4, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn booked_seats_in_snapshot_are_ignored() {
        let mut free = full_pool();
        free.iter_mut().filter(|s| s.row_number != 2).for_each(|s| {
            s.is_booked = true;
            s.booked_by = Some(1);
        });
        let allocation = Allocator::new().allocate(7, &free).unwrap();
        assert!(allocation.seats.iter().all(|s| s.row_number == 2));
    }

    fn arbitrary_free_set() -> impl Strategy<Value = Vec<Seat>> {
        proptest::collection::vec(any::<bool>(), 80).prop_map(|mask| {
            full_pool()
                .into_iter()
                .zip(mask)
                .filter_map(|(s, keep)| keep.then_some(s))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn allocation_is_exact_distinct_and_free(free in arbitrary_free_set(), requested in 1usize..=7) {
            match Allocator::new().allocate(requested, &free) {
                Ok(allocation) => {
                    prop_assert_eq!(allocation.seats.len(), requested);
                    let mut ids = allocation.seat_ids();
                    ids.sort_unstable();
                    ids.dedup();
                    prop_assert_eq!(ids.len(), requested);
                    prop_assert!(allocation.seats.iter().all(|s| free.contains(s)));
                }
                Err(BookingError::InsufficientSeats { available, .. }) => {
                    prop_assert!(free.len() < requested);
                    prop_assert_eq!(available, free.len() as i64);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        #[test]
        fn single_row_whenever_some_row_fits(free in arbitrary_free_set(), requested in 1usize..=7) {
            let row_fits = (1..=12).any(|row| free.iter().filter(|s| s.row_number == row).count() >= requested);
            if let Ok(allocation) = Allocator::new().allocate(requested, &free) {
                let first_row = allocation.seats[0].row_number;
                let same_row = allocation.seats.iter().all(|s| s.row_number == first_row);
                prop_assert_eq!(same_row || !row_fits, true);
            }
        }

        #[test]
        fn allocation_is_deterministic(free in arbitrary_free_set(), requested in 1usize..=7) {
            let mut shuffled = free.clone();
            shuffled.reverse();
            let a = Allocator::new().allocate(requested, &free).ok();
            let b = Allocator::new().allocate(requested, &shuffled).ok();
            prop_assert_eq!(a, b);
        }
    }
}
