//! Core types and IDs for the allocation engine (ride requests, cabs, trips).
//!
//! All identifiers are newtype wrappers. [`RideRequest`], [`Cab`] and [`Trip`] are the
//! persisted rows; [`CandidateTrip`] and [`MatchResult`] are per-call views that are never
//! stored.

/// Ride request identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RequestId(pub u64);

/// Trip identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TripId(pub u64);

/// Cab identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CabId(pub u64);

/// Rider (requesting user) identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RiderId(pub u64);

macro_rules! display_id {
    ($($id:ty),*) => {
        $(impl std::fmt::Display for $id {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_id!(RequestId, TripId, CabId, RiderId);

pub const MIN_SEATS_PER_REQUEST: u8 = 1;
pub const MAX_SEATS_PER_REQUEST: u8 = 6;
pub const MAX_LUGGAGE_PER_REQUEST: u8 = 8;
pub const MIN_CAB_SEATS: u8 = 1;
pub const MAX_CAB_SEATS: u8 = 8;
pub const MAX_CAB_LUGGAGE: u8 = 10;

/// WGS-84 point in degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Direction of travel relative to the airport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToAirport,
    FromAirport,
}

/// Ride request lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Matched,
    Confirmed,
    Cancelled,
    Completed,
}

impl RequestStatus {
    /// Matched and confirmed requests occupy seats on their trip.
    pub fn occupies_seat(self) -> bool {
        matches!(self, RequestStatus::Matched | RequestStatus::Confirmed)
    }
}

/// Cab availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabStatus {
    Available,
    EnRoute,
    OnTrip,
    Offline,
}

impl CabStatus {
    /// A cab can take another booking while idle or while collecting passengers.
    pub fn is_bookable(self) -> bool {
        matches!(self, CabStatus::Available | CabStatus::EnRoute)
    }
}

/// Trip lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

/// Persisted ride request.
///
/// `detour_tolerance_m` of `None` (or zero) means the engine falls back to its default
/// search radius for both the spatial query and the detour ceiling.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RideRequest {
    pub id: RequestId,
    pub rider_id: RiderId,
    pub origin: Location,
    pub destination: Location,
    pub direction: Direction,
    pub seats_needed: u8,
    pub luggage_count: u8,
    #[serde(default)]
    pub detour_tolerance_m: Option<u32>,
    pub status: RequestStatus,
    #[serde(default)]
    pub trip_id: Option<TripId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RideRequest {
    /// Tolerance in meters, `None` when unset or zero.
    pub fn tolerance_m(&self) -> Option<u32> {
        self.detour_tolerance_m.filter(|m| *m > 0)
    }
}

/// Payload for creating a ride request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewRideRequest {
    pub rider_id: RiderId,
    pub origin: Location,
    pub destination: Location,
    pub direction: Direction,
    pub seats_needed: u8,
    #[serde(default)]
    pub luggage_count: u8,
    #[serde(default)]
    pub detour_tolerance_m: Option<u32>,
}

impl NewRideRequest {
    /// Checks coordinate validity and the seat/luggage ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !self.origin.is_valid() {
            return Err("origin coordinates out of range".into());
        }
        if !self.destination.is_valid() {
            return Err("destination coordinates out of range".into());
        }
        if !(MIN_SEATS_PER_REQUEST..=MAX_SEATS_PER_REQUEST).contains(&self.seats_needed) {
            return Err(format!(
                "seats_needed must be between {} and {}, got {}",
                MIN_SEATS_PER_REQUEST, MAX_SEATS_PER_REQUEST, self.seats_needed
            ));
        }
        if self.luggage_count > MAX_LUGGAGE_PER_REQUEST {
            return Err(format!(
                "luggage_count must be between 0 and {}, got {}",
                MAX_LUGGAGE_PER_REQUEST, self.luggage_count
            ));
        }
        Ok(())
    }
}

/// Persisted cab.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Cab {
    pub id: CabId,
    pub seat_capacity: u8,
    pub luggage_capacity: u8,
    #[serde(default)]
    pub location: Option<Location>,
    pub status: CabStatus,
}

/// Payload for registering a cab.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewCab {
    pub seat_capacity: u8,
    pub luggage_capacity: u8,
    pub location: Option<Location>,
    pub status: CabStatus,
}

impl NewCab {
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_CAB_SEATS..=MAX_CAB_SEATS).contains(&self.seat_capacity) {
            return Err(format!(
                "seat_capacity must be between {} and {}, got {}",
                MIN_CAB_SEATS, MAX_CAB_SEATS, self.seat_capacity
            ));
        }
        if self.luggage_capacity > MAX_CAB_LUGGAGE {
            return Err(format!(
                "luggage_capacity must be between 0 and {}, got {}",
                MAX_CAB_LUGGAGE, self.luggage_capacity
            ));
        }
        if let Some(loc) = self.location {
            if !loc.is_valid() {
                return Err("cab location out of range".into());
            }
        }
        Ok(())
    }
}

/// Persisted trip. `passenger_count` counts seats of matched/confirmed requests.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub cab_id: CabId,
    pub direction: Direction,
    pub passenger_count: u32,
    pub status: TripStatus,
    pub created_at: u64,
}

/// Aggregate seat/luggage load of a trip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Load {
    pub seats: u32,
    pub luggage: u32,
}

/// Denormalized view of a planned trip for one matching call.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateTrip {
    pub trip_id: TripId,
    pub cab_id: CabId,
    pub direction: Direction,
    pub seat_capacity: u8,
    pub luggage_capacity: u8,
    pub load: Load,
    /// Existing pickups in booking order, then the shared destination.
    pub route: Vec<Location>,
    /// Meters from the centroid of existing pickups to the new request's origin.
    pub distance_to_request_m: f64,
}

impl CandidateTrip {
    pub fn has_room_for(&self, seats: u8, luggage: u8) -> bool {
        self.has_seats_for(seats) && self.has_luggage_room_for(luggage)
    }

    pub fn has_seats_for(&self, seats: u8) -> bool {
        self.load.seats + u32::from(seats) <= u32::from(self.seat_capacity)
    }

    pub fn has_luggage_room_for(&self, luggage: u8) -> bool {
        self.load.luggage + u32::from(luggage) <= u32::from(self.luggage_capacity)
    }
}

/// Best compatible trip for a request.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchResult {
    pub trip_id: TripId,
    pub cab_id: CabId,
    pub added_detour_minutes: f64,
}

/// Seat committed to a trip.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookingResult {
    pub request_id: RequestId,
    pub trip_id: TripId,
    pub cab_id: CabId,
    pub seats_booked: u8,
    pub seats_remaining: u32,
    pub luggage_booked: u8,
    pub luggage_remaining: u32,
    pub new_trip: bool,
}

/// Outcome of a cancellation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CancelResult {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_trip_id: Option<TripId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trip_cancelled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cab_freed: bool,
    /// Used to invalidate the surge bucket; not part of the response.
    #[serde(skip)]
    pub origin: Option<Location>,
}

/// Unix seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(seats: u8, luggage: u8) -> NewRideRequest {
        NewRideRequest {
            rider_id: RiderId(1),
            origin: Location::new(12.97, 77.59),
            destination: Location::new(13.2, 77.7),
            direction: Direction::ToAirport,
            seats_needed: seats,
            luggage_count: luggage,
            detour_tolerance_m: Some(2000),
        }
    }

    #[test]
    fn seats_and_luggage_ranges_enforced() {
        assert!(new_request(1, 0).validate().is_ok());
        assert!(new_request(6, 8).validate().is_ok());
        assert!(new_request(0, 0).validate().unwrap_err().contains("seats_needed"));
        assert!(new_request(7, 0).validate().is_err());
        assert!(new_request(2, 9).validate().unwrap_err().contains("luggage_count"));
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let mut req = new_request(1, 0);
        req.origin = Location::new(91.0, 0.0);
        assert!(req.validate().is_err());
        req.origin = Location::new(f64::NAN, 0.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn zero_tolerance_means_unset() {
        let mut r = RideRequest {
            id: RequestId(1),
            rider_id: RiderId(1),
            origin: Location::new(0.0, 0.0),
            destination: Location::new(0.0, 0.1),
            direction: Direction::ToAirport,
            seats_needed: 1,
            luggage_count: 0,
            detour_tolerance_m: Some(0),
            status: RequestStatus::Pending,
            trip_id: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(r.tolerance_m(), None);
        r.detour_tolerance_m = Some(1500);
        assert_eq!(r.tolerance_m(), Some(1500));
    }

    #[test]
    fn cancel_result_omits_empty_fields() {
        let result = CancelResult {
            request_id: RequestId(3),
            previous_trip_id: None,
            trip_cancelled: false,
            cab_freed: false,
            origin: Some(Location::new(1.0, 1.0)),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({ "request_id": 3 }));
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(serde_json::to_value(CabStatus::EnRoute).unwrap(), "en_route");
        assert_eq!(serde_json::to_value(Direction::ToAirport).unwrap(), "to_airport");
    }
}
