use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ApplicationStatus, DateRange};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("time slot not found: {0}")]
    SlotNotFound(Ulid),

    #[error("time slot {0} is closed for new bookings")]
    SlotClosed(Ulid),

    #[error("requested {requested:?} falls outside slot window {window:?}")]
    DateRangeOutOfBounds {
        requested: DateRange,
        window: DateRange,
    },

    #[error("stay of {requested_days} days is shorter than the minimum of {minimum_days}")]
    MinimumStayViolation { requested_days: u32, minimum_days: u32 },

    #[error("{0} is not bookable")]
    CapacityRecordMissing(NaiveDate),

    #[error("{0} has no available slots")]
    CapacityExceeded(NaiveDate),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("user {user_id} already has a live application {existing} for this slot")]
    DuplicateApplication { user_id: Ulid, existing: Ulid },

    #[error("cannot move application from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    #[error("not permitted: {0}")]
    NotPermitted(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("capacity {capacity} for {date} is below the {booked} already booked")]
    CapacityBelowBooked {
        date: NaiveDate,
        capacity: u32,
        booked: u32,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Transient failures where retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }
}
