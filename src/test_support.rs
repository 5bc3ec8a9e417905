//! Fixtures shared by unit tests.

use std::time::Duration;

use tokio::time::Instant;

use crate::store::{MemoryStore, RideStore};
use crate::types::{
    CabId, CabStatus, Direction, Location, NewCab, NewRideRequest, RequestId, RequestStatus,
    RiderId, TripId,
};

pub const AIRPORT: Location = Location {
    lat: 13.1986,
    lon: 77.7066,
};

pub fn new_request(
    origin: Location,
    seats: u8,
    luggage: u8,
    tolerance_m: Option<u32>,
) -> NewRideRequest {
    NewRideRequest {
        rider_id: RiderId(1),
        origin,
        destination: AIRPORT,
        direction: Direction::ToAirport,
        seats_needed: seats,
        luggage_count: luggage,
        detour_tolerance_m: tolerance_m,
    }
}

pub async fn add_cab(store: &MemoryStore, at: Location, seats: u8, luggage: u8) -> CabId {
    store
        .insert_cab(NewCab {
            seat_capacity: seats,
            luggage_capacity: luggage,
            location: Some(at),
            status: CabStatus::Available,
        })
        .await
        .unwrap()
        .id
}

/// A planned trip on a fresh en-route cab carrying `riders` as `(origin, seats, luggage)`.
pub async fn seed_trip(
    store: &MemoryStore,
    cab_at: Location,
    seat_capacity: u8,
    luggage_capacity: u8,
    riders: &[(Location, u8, u8)],
) -> (CabId, TripId, Vec<RequestId>) {
    let cab_id = add_cab(store, cab_at, seat_capacity, luggage_capacity).await;
    let mut ids = Vec::new();
    for (origin, seats, luggage) in riders {
        let r = store
            .insert_request(new_request(*origin, *seats, *luggage, Some(2000)))
            .await
            .unwrap();
        ids.push(r.id);
    }
    let mut tx = store
        .begin(Instant::now() + Duration::from_secs(1))
        .await
        .unwrap();
    tx.lock_cab(cab_id).await.unwrap();
    let trip = tx.insert_trip(cab_id, Direction::ToAirport).await.unwrap();
    let mut seats = 0;
    for (id, (_, s, _)) in ids.iter().zip(riders) {
        tx.lock_request(*id).await.unwrap();
        tx.set_request_status(*id, RequestStatus::Matched, Some(trip.id))
            .await
            .unwrap();
        seats += u32::from(*s);
    }
    tx.set_trip_passengers(trip.id, seats).await.unwrap();
    tx.set_cab_status(cab_id, CabStatus::EnRoute).await.unwrap();
    tx.commit().await.unwrap();
    (cab_id, trip.id, ids)
}
