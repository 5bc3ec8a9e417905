//! Transactional seat booking.
//!
//! Every booking runs in one unit of work that locks cab, request and trip rows in that
//! order, recomputes the trip's load under the locks and only then writes. Two bookers
//! racing for the last seat serialize on the cab lock; the loser sees the winner's seat
//! and gets [`AllocationError::CabFull`]. Lock waits are bounded by
//! [`BookingConfig::lock_timeout`].

use std::sync::Arc;

use log::{debug, info};
use tokio::time::Instant;

use crate::config::BookingConfig;
use crate::error::AllocationError;
use crate::matching::MatchingEngine;
use crate::store::{RideStore, StoreTx};
use crate::surge::DemandSupplyCache;
use crate::types::{
    BookingResult, Cab, CabId, CabStatus, Direction, Location, RequestId, RequestStatus,
    RideRequest, Trip, TripId, TripStatus,
};

pub struct BookingEngine {
    store: Arc<dyn RideStore>,
    matcher: Arc<MatchingEngine>,
    demand: Arc<DemandSupplyCache>,
    config: BookingConfig,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn RideStore>,
        matcher: Arc<MatchingEngine>,
        demand: Arc<DemandSupplyCache>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            demand,
            config,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.lock_timeout
    }

    /// Commits a seat for `request_id` on an existing trip of `cab_id`.
    pub async fn book_ride(
        &self,
        request_id: RequestId,
        cab_id: CabId,
        trip_id: TripId,
    ) -> Result<BookingResult, AllocationError> {
        let mut tx = self.store.begin(self.deadline()).await?;
        let result = commit_seat(tx.as_mut(), request_id, cab_id, trip_id, false).await?;
        tx.commit().await?;
        log_booking(&result);
        Ok(result)
    }

    /// Opens an empty `planned` trip on an `available` cab.
    pub async fn create_trip(
        &self,
        cab_id: CabId,
        direction: Direction,
    ) -> Result<Trip, AllocationError> {
        let mut tx = self.store.begin(self.deadline()).await?;
        let trip = open_trip(tx.as_mut(), cab_id, direction).await?;
        tx.commit().await?;
        info!("trip created trip_id={} cab_id={} direction={:?}", trip.id, cab_id, direction);
        Ok(trip)
    }

    /// Nearest `available` cab within `radius_m` with at least the given capacities.
    pub async fn find_available_cab_near(
        &self,
        location: Location,
        radius_m: f64,
        min_seats: u8,
        min_luggage: u8,
    ) -> Result<Cab, AllocationError> {
        self.store
            .nearby_available_cab(location, radius_m, min_seats, min_luggage)
            .await?
            .ok_or(AllocationError::NoCabNearby)
    }

    /// Books a pending request: joins the best matching trip, or opens a trip on the
    /// nearest free cab when nothing matches.
    pub async fn book(&self, request_id: RequestId) -> Result<BookingResult, AllocationError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(AllocationError::RequestNotFound(request_id))?;
        if request.status != RequestStatus::Pending {
            return Err(AllocationError::RequestNotPending {
                id: request_id,
                status: request.status,
            });
        }
        let result = match self.matcher.match_riders(request_id).await {
            Ok(Some(m)) => self.book_ride(request_id, m.cab_id, m.trip_id).await?,
            Ok(None) => self.book_new_trip(&request).await?,
            Err(AllocationError::AlreadyMatched(_)) => {
                return Err(self.not_pending(request_id).await);
            }
            Err(e) => return Err(e),
        };
        self.demand.invalidate_quietly(request.origin).await;
        Ok(result)
    }

    /// Creates the trip and books the seat in one unit of work, so a cab cannot end up
    /// with two fresh trips from concurrent bookers.
    async fn book_new_trip(&self, request: &RideRequest) -> Result<BookingResult, AllocationError> {
        let cab = self
            .find_available_cab_near(
                request.origin,
                self.config.cab_search_radius_m,
                request.seats_needed,
                request.luggage_count,
            )
            .await?;
        debug!("opening trip request_id={} cab_id={}", request.id, cab.id);
        let mut tx = self.store.begin(self.deadline()).await?;
        let trip = open_trip(tx.as_mut(), cab.id, request.direction).await?;
        let result = commit_seat(tx.as_mut(), request.id, cab.id, trip.id, true).await?;
        tx.commit().await?;
        log_booking(&result);
        Ok(result)
    }

    async fn not_pending(&self, request_id: RequestId) -> AllocationError {
        match self.store.get_request(request_id).await {
            Ok(Some(r)) => AllocationError::RequestNotPending {
                id: request_id,
                status: r.status,
            },
            Ok(None) => AllocationError::RequestNotFound(request_id),
            Err(e) => e.into(),
        }
    }
}

fn log_booking(result: &BookingResult) {
    info!(
        "seat booked request_id={} trip_id={} cab_id={} seats={} seats_remaining={} luggage_remaining={} new_trip={}",
        result.request_id,
        result.trip_id,
        result.cab_id,
        result.seats_booked,
        result.seats_remaining,
        result.luggage_remaining,
        result.new_trip
    );
}

async fn open_trip(
    tx: &mut dyn StoreTx,
    cab_id: CabId,
    direction: Direction,
) -> Result<Trip, AllocationError> {
    let cab = tx
        .lock_cab(cab_id)
        .await?
        .ok_or(AllocationError::CabNotFound(cab_id))?;
    if cab.status != CabStatus::Available {
        return Err(AllocationError::CabNotAvailable {
            cab_id,
            status: cab.status,
        });
    }
    Ok(tx.insert_trip(cab_id, direction).await?)
}

/// Validates and stages one seat. Lock order: cab, request, trip.
async fn commit_seat(
    tx: &mut dyn StoreTx,
    request_id: RequestId,
    cab_id: CabId,
    trip_id: TripId,
    new_trip: bool,
) -> Result<BookingResult, AllocationError> {
    let cab = tx
        .lock_cab(cab_id)
        .await?
        .ok_or(AllocationError::CabNotFound(cab_id))?;
    let request = tx
        .lock_request(request_id)
        .await?
        .ok_or(AllocationError::RequestNotFound(request_id))?;
    if request.status != RequestStatus::Pending {
        return Err(AllocationError::RequestNotPending {
            id: request_id,
            status: request.status,
        });
    }
    if !cab.status.is_bookable() {
        return Err(AllocationError::CabNotAvailable {
            cab_id,
            status: cab.status,
        });
    }
    let trip = tx
        .lock_trip(trip_id)
        .await?
        .ok_or(AllocationError::TripNotFound(trip_id))?;
    let unavailable = |reason: &'static str| AllocationError::TripUnavailable { trip_id, reason };
    if trip.cab_id != cab_id {
        return Err(unavailable("trip belongs to another cab"));
    }
    if trip.status != TripStatus::Planned {
        return Err(unavailable("trip is no longer planned"));
    }
    if trip.direction != request.direction {
        return Err(unavailable("trip runs in the other direction"));
    }

    let load = tx.trip_load(trip_id).await?;
    let seats_remaining = u32::from(cab.seat_capacity).saturating_sub(load.seats);
    let luggage_remaining = u32::from(cab.luggage_capacity).saturating_sub(load.luggage);
    let seats_needed = u32::from(request.seats_needed);
    let luggage_needed = u32::from(request.luggage_count);
    if seats_needed > seats_remaining || luggage_needed > luggage_remaining {
        debug!(
            "booking rejected cab full request_id={} trip_id={} seats_remaining={} luggage_remaining={}",
            request_id, trip_id, seats_remaining, luggage_remaining
        );
        return Err(AllocationError::CabFull {
            cab_id,
            seats_remaining,
            seats_needed: request.seats_needed,
            luggage_remaining,
            luggage_needed: request.luggage_count,
        });
    }

    tx.set_request_status(request_id, RequestStatus::Matched, Some(trip_id))
        .await?;
    tx.set_trip_passengers(trip_id, trip.passenger_count + seats_needed)
        .await?;
    if cab.status == CabStatus::Available {
        tx.set_cab_status(cab_id, CabStatus::EnRoute).await?;
    }
    Ok(BookingResult {
        request_id,
        trip_id,
        cab_id,
        seats_booked: request.seats_needed,
        seats_remaining: seats_remaining - seats_needed,
        luggage_booked: request.luggage_count,
        luggage_remaining: luggage_remaining - luggage_needed,
        new_trip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;
    use crate::spatial::bucket_key;
    use crate::store::MemoryStore;
    use crate::surge::{MemoryCache, SurgeCache};
    use crate::test_support::{add_cab, new_request, seed_trip};
    use std::time::Duration;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        booking: BookingEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let matcher = Arc::new(MatchingEngine::new(store.clone(), MatchingConfig::default()));
        let demand = Arc::new(DemandSupplyCache::new(store.clone(), cache.clone(), Duration::from_secs(30)));
        let booking = BookingEngine::new(store.clone(), matcher, demand, BookingConfig::default());
        Fixture { store, cache, booking }
    }

    const PICKUP: Location = Location { lat: 12.970, lon: 77.590 };

    #[tokio::test]
    async fn first_rider_opens_trip_on_nearest_cab() {
        init_log();
        let f = fixture();
        let cab_id = add_cab(&f.store, Location::new(12.975, 77.595), 4, 3).await;
        let r = f.store.insert_request(new_request(PICKUP, 2, 1, None)).await.unwrap();
        let booked = f.booking.book(r.id).await.unwrap();
        assert!(booked.new_trip);
        assert_eq!(booked.cab_id, cab_id);
        assert_eq!((booked.seats_remaining, booked.luggage_remaining), (2, 2));
        let trip = f.store.get_trip(booked.trip_id).await.unwrap().unwrap();
        assert_eq!((trip.passenger_count, trip.status), (2, TripStatus::Planned));
        assert_eq!(f.store.get_cab(cab_id).await.unwrap().unwrap().status, CabStatus::EnRoute);
        let stored = f.store.get_request(r.id).await.unwrap().unwrap();
        assert_eq!((stored.status, stored.trip_id), (RequestStatus::Matched, Some(trip.id)));
    }

    #[tokio::test]
    async fn second_rider_pools_into_existing_trip() {
        let f = fixture();
        let (cab_id, trip_id, _) = seed_trip(&f.store, PICKUP, 4, 4, &[(PICKUP, 1, 1)]).await;
        add_cab(&f.store, PICKUP, 4, 4).await;
        let r = f.store.insert_request(new_request(Location::new(12.971, 77.591), 1, 1, Some(2000))).await.unwrap();
        let booked = f.booking.book(r.id).await.unwrap();
        assert!(!booked.new_trip);
        assert_eq!((booked.trip_id, booked.cab_id), (trip_id, cab_id));
        assert_eq!(booked.seats_remaining, 2);
        assert_eq!(f.store.get_trip(trip_id).await.unwrap().unwrap().passenger_count, 2);
    }

    #[tokio::test]
    async fn over_capacity_is_cab_full_and_changes_nothing() {
        let f = fixture();
        let (cab_id, trip_id, _) = seed_trip(&f.store, PICKUP, 4, 4, &[(PICKUP, 3, 0)]).await;
        let r = f.store.insert_request(new_request(PICKUP, 2, 0, None)).await.unwrap();
        let err = f.booking.book_ride(r.id, cab_id, trip_id).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::CabFull { seats_remaining: 1, seats_needed: 2, .. }
        ));
        assert_eq!(f.store.get_request(r.id).await.unwrap().unwrap().status, RequestStatus::Pending);
        assert_eq!(f.store.get_trip(trip_id).await.unwrap().unwrap().passenger_count, 3);
    }

    #[tokio::test]
    async fn luggage_overflow_is_cab_full() {
        let f = fixture();
        let (cab_id, trip_id, _) = seed_trip(&f.store, PICKUP, 4, 2, &[(PICKUP, 1, 2)]).await;
        let r = f.store.insert_request(new_request(PICKUP, 1, 1, None)).await.unwrap();
        let err = f.booking.book_ride(r.id, cab_id, trip_id).await.unwrap_err();
        assert_eq!(err.code(), "cab_full");
    }

    #[tokio::test]
    async fn non_pending_request_rejected() {
        let f = fixture();
        let (cab_id, trip_id, riders) = seed_trip(&f.store, PICKUP, 4, 4, &[(PICKUP, 1, 0)]).await;
        let err = f.booking.book_ride(riders[0], cab_id, trip_id).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::RequestNotPending { status: RequestStatus::Matched, .. }
        ));
        let err = f.booking.book(riders[0]).await.unwrap_err();
        assert!(matches!(err, AllocationError::RequestNotPending { .. }));
    }

    #[tokio::test]
    async fn trip_of_another_cab_is_unavailable() {
        let f = fixture();
        let (_, trip_id, _) = seed_trip(&f.store, PICKUP, 4, 4, &[(PICKUP, 1, 0)]).await;
        let other = add_cab(&f.store, PICKUP, 4, 4).await;
        let r = f.store.insert_request(new_request(PICKUP, 1, 0, None)).await.unwrap();
        let err = f.booking.book_ride(r.id, other, trip_id).await.unwrap_err();
        assert!(matches!(err, AllocationError::TripUnavailable { .. }));
        let err = f.booking.book_ride(r.id, other, TripId(999)).await.unwrap_err();
        assert!(matches!(err, AllocationError::TripNotFound(_)));
    }

    #[tokio::test]
    async fn no_cab_in_range() {
        let f = fixture();
        add_cab(&f.store, Location::new(13.5, 78.2), 4, 4).await;
        let r = f.store.insert_request(new_request(PICKUP, 1, 0, None)).await.unwrap();
        let err = f.booking.book(r.id).await.unwrap_err();
        assert!(matches!(err, AllocationError::NoCabNearby));
        assert!(f.booking.book(RequestId(404)).await.unwrap_err().kind() == crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_trip_requires_available_cab() {
        let f = fixture();
        let (cab_id, _, _) = seed_trip(&f.store, PICKUP, 4, 4, &[(PICKUP, 1, 0)]).await;
        let err = f.booking.create_trip(cab_id, Direction::ToAirport).await.unwrap_err();
        assert!(matches!(err, AllocationError::CabNotAvailable { status: CabStatus::EnRoute, .. }));
        let free = add_cab(&f.store, PICKUP, 4, 4).await;
        let trip = f.booking.create_trip(free, Direction::FromAirport).await.unwrap();
        assert_eq!((trip.passenger_count, trip.status), (0, TripStatus::Planned));
        assert!(matches!(
            f.booking.create_trip(CabId(77), Direction::ToAirport).await,
            Err(AllocationError::CabNotFound(CabId(77)))
        ));
    }

    #[tokio::test]
    async fn booking_invalidates_origin_bucket() {
        let f = fixture();
        add_cab(&f.store, PICKUP, 4, 4).await;
        let r = f.store.insert_request(new_request(PICKUP, 1, 0, None)).await.unwrap();
        f.cache.set(&bucket_key(PICKUP), "{}".into(), Duration::from_secs(30)).await.unwrap();
        f.booking.book(r.id).await.unwrap();
        assert_eq!(f.cache.get(&bucket_key(PICKUP)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_cab_respects_capacity() {
        let f = fixture();
        add_cab(&f.store, PICKUP, 2, 0).await;
        let err = f.booking.find_available_cab_near(PICKUP, 10_000.0, 3, 0).await.unwrap_err();
        assert!(matches!(err, AllocationError::NoCabNearby));
        assert!(f.booking.find_available_cab_near(PICKUP, 10_000.0, 2, 0).await.is_ok());
    }
}
