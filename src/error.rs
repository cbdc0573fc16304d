use thiserror::Error;

/// SQLSTATE / SQLite codes that mean "someone else holds the lock, try again".
const BUSY_CODES: &[&str] = &[
    "55P03", // postgres lock_not_available (lock_timeout)
    "40001", // postgres serialization_failure
    "40P01", // postgres deadlock_detected
    "5",     // SQLITE_BUSY
    "6",     // SQLITE_LOCKED
    "261",   // SQLITE_BUSY_RECOVERY
    "517",   // SQLITE_BUSY_SNAPSHOT
];

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("you already have an active booking")]
    AlreadyBooked,

    #[error("not enough seats available: requested {requested}, available {available}")]
    InsufficientSeats { requested: i64, available: i64 },

    #[error("booking not found")]
    NotFound,

    #[error("booking reference {0} is already taken")]
    DuplicateReference(String),

    #[error("could not generate a unique booking reference after {0} attempts")]
    ReferenceGenerationFailed(u32),

    #[error("seat store is busy, retry the request: {0}")]
    Busy(String),

    #[error("seat store unavailable: {0}")]
    StoreUnavailable(String),
}

impl BookingError {
    /// Стабильный идентификатор вида ошибки для клиентов.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidRequest(_) => "invalid_request",
            BookingError::AlreadyBooked => "already_booked",
            BookingError::InsufficientSeats { .. } => "insufficient_seats",
            BookingError::NotFound => "not_found",
            BookingError::DuplicateReference(_) => "duplicate_reference",
            BookingError::ReferenceGenerationFailed(_) => "reference_generation_failed",
            BookingError::Busy(_) => "busy",
            BookingError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Busy(_))
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                BookingError::Busy("timed out waiting for a store connection".to_string())
            }
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if BUSY_CODES.contains(&code.as_ref()) => {
                    BookingError::Busy(db.message().to_string())
                }
                _ => BookingError::StoreUnavailable(err.to_string()),
            },
            _ => BookingError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for BookingError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BookingError::StoreUnavailable(format!("migration failed: {err}"))
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_retryable() {
        let err = BookingError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), "busy");
        assert!(err.is_retryable());
    }

    #[test]
    fn other_driver_errors_are_fatal() {
        let err = BookingError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "store_unavailable");
        assert!(!err.is_retryable());
    }

    #[test]
    fn insufficient_seats_message_carries_counts() {
        let err = BookingError::InsufficientSeats { requested: 5, available: 2 };
        assert_eq!(
            err.to_string(),
            "not enough seats available: requested 5, available 2"
        );
    }
}
