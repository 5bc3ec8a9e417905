//! Error types for the allocation engine.
//!
//! [`AllocationError`] is what every engine operation returns. Callers branch on
//! [`AllocationError::kind`] (or the variant), never on the message. Collaborator failures
//! ride along as `#[source]` for diagnostics.

use thiserror::Error;

use crate::types::{CabId, CabStatus, RequestId, RequestStatus, TripId};

/// Failure reported by a [`crate::store::RideStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("lock wait exceeded the unit-of-work deadline")]
    LockTimeout,

    #[error("{table} row {id} written without holding its lock")]
    NotLocked { table: &'static str, id: u64 },

    #[error("{table} row {id} does not exist")]
    MissingRow { table: &'static str, id: u64 },

    #[error("unit of work already committed")]
    Finished,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure reported by a [`crate::surge::SurgeCache`] implementation.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Coarse classification used for status mapping and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CapacityExceeded,
    Unavailable,
    Timeout,
    Invalid,
    Internal,
}

#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("ride request {0} not found")]
    RequestNotFound(RequestId),

    #[error("trip {0} not found")]
    TripNotFound(TripId),

    #[error("cab {0} not found")]
    CabNotFound(CabId),

    #[error("ride request {0} is already matched to a trip")]
    AlreadyMatched(RequestId),

    #[error("ride request {id} is {status:?}, expected pending")]
    RequestNotPending { id: RequestId, status: RequestStatus },

    #[error("ride request {0} is already cancelled")]
    AlreadyCancelled(RequestId),

    #[error("ride request {id} is {status:?} and cannot be cancelled")]
    CannotCancel { id: RequestId, status: RequestStatus },

    #[error(
        "cab {cab_id} is full: {seats_remaining} seats / {luggage_remaining} luggage left, need {seats_needed} / {luggage_needed}"
    )]
    CabFull {
        cab_id: CabId,
        seats_remaining: u32,
        seats_needed: u8,
        luggage_remaining: u32,
        luggage_needed: u8,
    },

    #[error("cab {cab_id} is {status:?}, not bookable")]
    CabNotAvailable { cab_id: CabId, status: CabStatus },

    #[error("trip {trip_id} cannot take this booking: {reason}")]
    TripUnavailable { trip_id: TripId, reason: &'static str },

    #[error("no available cab found nearby")]
    NoCabNearby,

    #[error("timed out waiting for a record lock")]
    LockTimeout,

    #[error("ride request {0} was reassigned by concurrent writers on every lock attempt")]
    ConcurrentReassignment(RequestId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl From<StoreError> for AllocationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => AllocationError::LockTimeout,
            other => AllocationError::Storage(other),
        }
    }
}

impl AllocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocationError::RequestNotFound(_)
            | AllocationError::TripNotFound(_)
            | AllocationError::CabNotFound(_) => ErrorKind::NotFound,
            AllocationError::AlreadyMatched(_)
            | AllocationError::RequestNotPending { .. }
            | AllocationError::AlreadyCancelled(_)
            | AllocationError::CannotCancel { .. } => ErrorKind::Conflict,
            AllocationError::CabFull { .. } => ErrorKind::CapacityExceeded,
            AllocationError::CabNotAvailable { .. }
            | AllocationError::TripUnavailable { .. }
            | AllocationError::NoCabNearby => ErrorKind::Unavailable,
            AllocationError::LockTimeout | AllocationError::ConcurrentReassignment(_) => {
                ErrorKind::Timeout
            }
            AllocationError::InvalidRequest(_) => ErrorKind::Invalid,
            AllocationError::Storage(_) | AllocationError::Cache(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            AllocationError::RequestNotFound(_) => "not_found",
            AllocationError::TripNotFound(_) => "trip_not_found",
            AllocationError::CabNotFound(_) => "cab_not_found",
            AllocationError::AlreadyMatched(_) => "already_matched",
            AllocationError::RequestNotPending { .. } => "not_pending",
            AllocationError::AlreadyCancelled(_) => "already_cancelled",
            AllocationError::CannotCancel { .. } => "cannot_cancel",
            AllocationError::CabFull { .. } => "cab_full",
            AllocationError::CabNotAvailable { .. } => "cab_unavailable",
            AllocationError::TripUnavailable { .. } => "trip_unavailable",
            AllocationError::NoCabNearby => "no_cab",
            AllocationError::LockTimeout => "lock_timeout",
            AllocationError::ConcurrentReassignment(_) => "concurrent_update",
            AllocationError::InvalidRequest(_) => "invalid_request",
            AllocationError::Storage(_) => "storage_error",
            AllocationError::Cache(_) => "cache_error",
        }
    }

    /// Timeouts and unavailability are worth retrying; everything else is final for
    /// this attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Unavailable)
    }
}
