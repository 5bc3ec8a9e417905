//! Distance, travel time and route-insertion scoring.
//!
//! Haversine on WGS-84 coordinates with a fixed average city speed standing in for a
//! routing engine. Everything here is pure and allocation-light.

use crate::types::Location;

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Assumed average pooled-cab speed.
pub const AVERAGE_SPEED_KMPH: f64 = 30.0;

/// Great-circle distance in kilometers.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in meters.
pub fn haversine_m(a: Location, b: Location) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// Direct travel time between two points in minutes.
pub fn travel_time_minutes(a: Location, b: Location) -> f64 {
    haversine_km(a, b) / AVERAGE_SPEED_KMPH * 60.0
}

/// Minutes needed to cover `meters` at the reference speed.
pub fn meters_to_minutes(meters: f64) -> f64 {
    meters / 1000.0 / AVERAGE_SPEED_KMPH * 60.0
}

/// Total distance over consecutive stops.
pub fn route_distance_km(route: &[Location]) -> f64 {
    route.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Total travel time over consecutive stops.
pub fn route_time_minutes(route: &[Location]) -> f64 {
    route_distance_km(route) / AVERAGE_SPEED_KMPH * 60.0
}

/// Returns a copy of `route` with `stop` inserted at `index`.
pub fn insert_stop(route: &[Location], index: usize, stop: Location) -> Vec<Location> {
    let mut out = Vec::with_capacity(route.len() + 1);
    out.extend_from_slice(&route[..index]);
    out.push(stop);
    out.extend_from_slice(&route[index..]);
    out
}

/// Finds where inserting `stop` adds the least travel time.
///
/// Every position `0..=route.len()` is tried, so the stop may be prepended or appended.
/// Returns `(index, added_minutes)`; on ties the earliest index wins. A route with fewer
/// than two points has no meaningful detour and yields `(0, 0.0)`. O(S²) in stops.
pub fn find_best_insertion_index(route: &[Location], stop: Location) -> (usize, f64) {
    if route.len() < 2 {
        return (0, 0.0);
    }
    let current = route_time_minutes(route);
    let mut best_index = 0;
    let mut best_added = f64::INFINITY;
    for index in 0..=route.len() {
        let added = route_time_minutes(&insert_stop(route, index, stop)) - current;
        if added < best_added {
            best_added = added;
            best_index = index;
        }
    }
    (best_index, best_added)
}
