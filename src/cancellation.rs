//! Ride cancellation and capacity release.
//!
//! A pending request is simply marked cancelled. A matched request also gives its seats
//! back to the trip; when the trip is left without active passengers it is cancelled and
//! its cab returns to the available pool. Locks are taken cab, request, trip, the same
//! order booking uses.

use std::sync::Arc;

use log::{debug, info};
use tokio::time::Instant;

use crate::config::BookingConfig;
use crate::error::AllocationError;
use crate::store::RideStore;
use crate::surge::DemandSupplyCache;
use crate::types::{CabStatus, CancelResult, RequestId, RequestStatus, RideRequest, TripId, TripStatus};

/// Lock passes attempted when the request changes trip between peek and lock.
const MAX_LOCK_PASSES: u32 = 3;

pub struct CancellationEngine {
    store: Arc<dyn RideStore>,
    demand: Arc<DemandSupplyCache>,
    config: BookingConfig,
}

impl CancellationEngine {
    pub fn new(
        store: Arc<dyn RideStore>,
        demand: Arc<DemandSupplyCache>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            demand,
            config,
        }
    }

    pub async fn cancel_ride(&self, request_id: RequestId) -> Result<CancelResult, AllocationError> {
        let deadline = Instant::now() + self.config.lock_timeout;
        let mut pass = 0;
        loop {
            pass += 1;
            // Unlocked peek: learn which cab to lock before the request row.
            let peek = self
                .store
                .get_request(request_id)
                .await?
                .ok_or(AllocationError::RequestNotFound(request_id))?;
            ensure_cancellable(&peek)?;
            let expected_trip = active_trip(&peek);
            let cab_id = match expected_trip {
                Some(trip_id) => self.store.get_trip(trip_id).await?.map(|t| t.cab_id),
                None => None,
            };

            let mut tx = self.store.begin(deadline).await?;
            if let Some(cab_id) = cab_id {
                tx.lock_cab(cab_id).await?;
            }
            let request = tx
                .lock_request(request_id)
                .await?
                .ok_or(AllocationError::RequestNotFound(request_id))?;
            ensure_cancellable(&request)?;
            if active_trip(&request) != expected_trip {
                if pass >= MAX_LOCK_PASSES {
                    return Err(AllocationError::ConcurrentReassignment(request_id));
                }
                debug!(
                    "request moved while locking, retrying request_id={} pass={}",
                    request_id, pass
                );
                continue;
            }

            let mut result = CancelResult {
                request_id,
                previous_trip_id: None,
                trip_cancelled: false,
                cab_freed: false,
                origin: Some(request.origin),
            };
            tx.set_request_status(request_id, RequestStatus::Cancelled, None)
                .await?;

            if let Some(trip_id) = expected_trip {
                result.previous_trip_id = Some(trip_id);
                let trip = tx
                    .lock_trip(trip_id)
                    .await?
                    .ok_or(AllocationError::TripNotFound(trip_id))?;
                let remaining = trip
                    .passenger_count
                    .saturating_sub(u32::from(request.seats_needed));
                tx.set_trip_passengers(trip_id, remaining).await?;
                if tx.trip_load(trip_id).await?.seats == 0 {
                    tx.set_trip_status(trip_id, TripStatus::Cancelled).await?;
                    result.trip_cancelled = true;
                    let cab = tx.lock_cab(trip.cab_id).await?;
                    if cab.map(|c| c.status) == Some(CabStatus::EnRoute) {
                        tx.set_cab_status(trip.cab_id, CabStatus::Available).await?;
                        result.cab_freed = true;
                    }
                }
            }

            tx.commit().await?;
            info!(
                "ride cancelled request_id={} previous_trip_id={:?} trip_cancelled={} cab_freed={}",
                request_id, result.previous_trip_id.map(|t| t.0), result.trip_cancelled, result.cab_freed
            );
            self.demand.invalidate_quietly(request.origin).await;
            return Ok(result);
        }
    }
}

fn ensure_cancellable(request: &RideRequest) -> Result<(), AllocationError> {
    match request.status {
        RequestStatus::Pending | RequestStatus::Matched => Ok(()),
        RequestStatus::Cancelled => Err(AllocationError::AlreadyCancelled(request.id)),
        status @ (RequestStatus::Confirmed | RequestStatus::Completed) => {
            Err(AllocationError::CannotCancel {
                id: request.id,
                status,
            })
        }
    }
}

/// Trip whose capacity this request currently holds.
fn active_trip(request: &RideRequest) -> Option<TripId> {
    match request.status {
        RequestStatus::Matched => request.trip_id,
        _ => None,
    }
}
