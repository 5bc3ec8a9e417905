//! Persistence and spatial-query collaborator.
//!
//! [`RideStore`] answers non-locking reads and proximity queries and opens units of work.
//! A [`StoreTx`] holds exclusive row locks until it is committed or dropped; dropping it
//! without committing discards every staged write. Lock waits are bounded by the deadline
//! passed to [`RideStore::begin`].

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::types::{
    Cab, CabId, CabStatus, CandidateTrip, Direction, Load, Location, NewCab, NewRideRequest,
    RequestId, RequestStatus, RideRequest, Trip, TripId, TripStatus,
};

/// Pending requests and available cabs inside a circle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AreaCounts {
    pub pending_requests: u32,
    pub available_cabs: u32,
}

#[async_trait]
pub trait RideStore: Send + Sync {
    /// Inserts a `pending` request and assigns its id.
    async fn insert_request(&self, new: NewRideRequest) -> Result<RideRequest, StoreError>;

    async fn get_request(&self, id: RequestId) -> Result<Option<RideRequest>, StoreError>;

    async fn insert_cab(&self, new: NewCab) -> Result<Cab, StoreError>;

    async fn get_cab(&self, id: CabId) -> Result<Option<Cab>, StoreError>;

    async fn get_trip(&self, id: TripId) -> Result<Option<Trip>, StoreError>;

    /// Planned trips in `direction` with an active passenger picked up within `radius_m`
    /// of `origin`, nearest centroid first (trip id breaks ties), at most `limit`.
    async fn nearby_candidate_trips(
        &self,
        origin: Location,
        direction: Direction,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<CandidateTrip>, StoreError>;

    /// Closest `available` cab with a known location within `radius_m` meeting the
    /// minimum capacities.
    async fn nearby_available_cab(
        &self,
        origin: Location,
        radius_m: f64,
        min_seats: u8,
        min_luggage: u8,
    ) -> Result<Option<Cab>, StoreError>;

    async fn count_demand_supply(
        &self,
        center: Location,
        radius_m: f64,
    ) -> Result<AreaCounts, StoreError>;

    /// Opens a unit of work. Lock waits fail with [`StoreError::LockTimeout`] once
    /// `deadline` passes, and so does a commit attempted after it.
    async fn begin(&self, deadline: Instant) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// A unit of work. Reads through a lock see the transaction's own staged writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Locks and reads a cab. Re-locking a row already held is a no-op.
    async fn lock_cab(&mut self, id: CabId) -> Result<Option<Cab>, StoreError>;

    async fn lock_request(&mut self, id: RequestId) -> Result<Option<RideRequest>, StoreError>;

    async fn lock_trip(&mut self, id: TripId) -> Result<Option<Trip>, StoreError>;

    /// Seat and luggage sums over the trip's matched and confirmed requests.
    async fn trip_load(&mut self, id: TripId) -> Result<Load, StoreError>;

    /// Stages a `planned` trip with no passengers; the new row is locked by this unit.
    async fn insert_trip(&mut self, cab_id: CabId, direction: Direction)
        -> Result<Trip, StoreError>;

    async fn set_request_status(
        &mut self,
        id: RequestId,
        status: RequestStatus,
        trip_id: Option<TripId>,
    ) -> Result<(), StoreError>;

    async fn set_trip_passengers(&mut self, id: TripId, count: u32) -> Result<(), StoreError>;

    async fn set_trip_status(&mut self, id: TripId, status: TripStatus) -> Result<(), StoreError>;

    async fn set_cab_status(&mut self, id: CabId, status: CabStatus) -> Result<(), StoreError>;

    /// Applies all staged writes atomically and releases the locks.
    async fn commit(&mut self) -> Result<(), StoreError>;
}
