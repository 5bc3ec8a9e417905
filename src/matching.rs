//! Greedy, spatially scoped trip matching.
//!
//! [`MatchingEngine::match_riders`] proposes the open trip that can absorb a pending
//! request with the least added travel time. It takes no locks and writes nothing; a
//! proposal may be stale by the time it is booked, which the booking transaction
//! re-validates.

use std::sync::Arc;

use log::{debug, info};

use crate::config::MatchingConfig;
use crate::error::AllocationError;
use crate::geo::{find_best_insertion_index, meters_to_minutes};
use crate::store::RideStore;
use crate::types::{CandidateTrip, MatchResult, RequestId, RequestStatus, RideRequest};

pub struct MatchingEngine {
    store: Arc<dyn RideStore>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn RideStore>, config: MatchingConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Best compatible trip for a pending request, or `None` when nothing fits.
    ///
    /// Errors: `RequestNotFound`; `AlreadyMatched` for any non-pending request.
    pub async fn match_riders(
        &self,
        request_id: RequestId,
    ) -> Result<Option<MatchResult>, AllocationError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(AllocationError::RequestNotFound(request_id))?;
        if request.status != RequestStatus::Pending {
            return Err(AllocationError::AlreadyMatched(request_id));
        }
        let radius_m = effective_tolerance_m(&request, &self.config);
        let candidates = self
            .store
            .nearby_candidate_trips(
                request.origin,
                request.direction,
                radius_m,
                self.config.max_candidates,
            )
            .await?;
        if candidates.is_empty() {
            debug!("no candidate trips request_id={} radius_m={}", request_id, radius_m);
            return Ok(None);
        }
        let result = select_best_candidate(&request, &candidates, &self.config);
        match &result {
            Some(m) => info!(
                "match found request_id={} trip_id={} cab_id={} added_detour_minutes={:.2} candidates={}",
                request_id,
                m.trip_id,
                m.cab_id,
                m.added_detour_minutes,
                candidates.len()
            ),
            None => info!(
                "no compatible trip request_id={} candidates={}",
                request_id,
                candidates.len()
            ),
        }
        Ok(result)
    }
}

/// Request tolerance in meters, or the default search radius when unset.
pub fn effective_tolerance_m(request: &RideRequest, config: &MatchingConfig) -> f64 {
    request
        .tolerance_m()
        .map(f64::from)
        .unwrap_or(config.default_search_radius_m)
}

/// Picks the candidate with the least added detour among those with room.
///
/// Candidates are scanned in the given order; on equal detour the earlier one wins.
pub fn select_best_candidate(
    request: &RideRequest,
    candidates: &[CandidateTrip],
    config: &MatchingConfig,
) -> Option<MatchResult> {
    let tolerance_minutes = meters_to_minutes(effective_tolerance_m(request, config));
    let ceiling = tolerance_minutes.min(config.max_detour_minutes);
    let mut best: Option<MatchResult> = None;
    for candidate in candidates {
        if candidate.direction != request.direction {
            continue;
        }
        if !candidate.has_seats_for(request.seats_needed) {
            debug!(
                "candidate rejected trip_id={} reason=seats load={} capacity={}",
                candidate.trip_id, candidate.load.seats, candidate.seat_capacity
            );
            continue;
        }
        if !candidate.has_luggage_room_for(request.luggage_count) {
            debug!(
                "candidate rejected trip_id={} reason=luggage load={} capacity={}",
                candidate.trip_id, candidate.load.luggage, candidate.luggage_capacity
            );
            continue;
        }
        let (_, added) = find_best_insertion_index(&candidate.route, request.origin);
        if added > ceiling {
            debug!(
                "candidate rejected trip_id={} reason=detour added_minutes={:.2} ceiling={:.2}",
                candidate.trip_id, added, ceiling
            );
            continue;
        }
        if best.map_or(true, |b| added < b.added_detour_minutes) {
            best = Some(MatchResult {
                trip_id: candidate.trip_id,
                cab_id: candidate.cab_id,
                added_detour_minutes: added,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{new_request, seed_trip, AIRPORT};
    use crate::types::{CabId, Direction, Load, Location, RiderId, TripId};

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn request(origin: Location, seats: u8, luggage: u8, tolerance: Option<u32>) -> RideRequest {
        RideRequest {
            id: RequestId(100),
            rider_id: RiderId(1),
            origin,
            destination: AIRPORT,
            direction: Direction::ToAirport,
            seats_needed: seats,
            luggage_count: luggage,
            detour_tolerance_m: tolerance,
            status: RequestStatus::Pending,
            trip_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn candidate(trip: u64, pickup: Location, load: Load, seats: u8, luggage: u8) -> CandidateTrip {
        CandidateTrip {
            trip_id: TripId(trip),
            cab_id: CabId(trip),
            direction: Direction::ToAirport,
            seat_capacity: seats,
            luggage_capacity: luggage,
            load,
            route: vec![pickup, AIRPORT],
            distance_to_request_m: 0.0,
        }
    }

    #[test]
    fn full_trip_is_skipped() {
        let origin = Location::new(12.970, 77.590);
        let full = candidate(1, origin, Load { seats: 4, luggage: 0 }, 4, 4);
        let roomy = candidate(2, Location::new(12.975, 77.595), Load { seats: 1, luggage: 0 }, 4, 4);
        let picked = select_best_candidate(&request(origin, 1, 0, None), &[full, roomy], &MatchingConfig::default());
        assert_eq!(picked.map(|m| m.trip_id), Some(TripId(2)));
    }

    #[test]
    fn luggage_limit_is_hard() {
        let origin = Location::new(12.970, 77.590);
        let c = candidate(1, origin, Load { seats: 1, luggage: 3 }, 4, 4);
        let cfg = MatchingConfig::default();
        assert!(select_best_candidate(&request(origin, 1, 2, None), &[c.clone()], &cfg).is_none());
        assert!(select_best_candidate(&request(origin, 1, 1, None), &[c], &cfg).is_some());
    }

    #[test]
    fn least_detour_wins_and_ties_keep_scan_order() {
        let origin = Location::new(12.970, 77.590);
        let on_the_way = candidate(1, Location::new(12.960, 77.585), Load::default(), 4, 4);
        let off_route = candidate(2, Location::new(12.965, 77.570), Load::default(), 4, 4);
        let twin = candidate(3, Location::new(12.960, 77.585), Load::default(), 4, 4);
        let cfg = MatchingConfig::default();
        let req = request(origin, 1, 0, Some(5000));
        let picked = select_best_candidate(&req, &[off_route, on_the_way, twin], &cfg).unwrap();
        assert_eq!(picked.trip_id, TripId(1));
    }

    #[test]
    fn detour_above_tolerance_rejected() {
        // ~3.3 km off a 2 km-tolerance route.
        let origin = Location::new(12.970, 77.620);
        let c = candidate(1, Location::new(12.970, 77.590), Load::default(), 4, 4);
        let cfg = MatchingConfig::default();
        assert!(select_best_candidate(&request(origin, 1, 0, Some(200)), &[c.clone()], &cfg).is_none());
        let ceiling_only = MatchingConfig {
            max_detour_minutes: 0.0,
            ..MatchingConfig::default()
        };
        assert!(select_best_candidate(&request(origin, 1, 0, Some(50_000)), &[c], &ceiling_only).is_none());
    }

    #[test]
    fn effective_tolerance_defaults_when_unset() {
        let cfg = MatchingConfig::default();
        let origin = Location::new(0.0, 0.0);
        assert_eq!(effective_tolerance_m(&request(origin, 1, 0, None), &cfg), 2000.0);
        assert_eq!(effective_tolerance_m(&request(origin, 1, 0, Some(0)), &cfg), 2000.0);
        assert_eq!(effective_tolerance_m(&request(origin, 1, 0, Some(750)), &cfg), 750.0);
    }

    #[tokio::test]
    async fn pooling_joins_nearby_trip_and_is_idempotent() {
        init_log();
        let store = Arc::new(MemoryStore::new());
        let pickup = Location::new(12.970, 77.590);
        let (cab_id, trip_id, _) = seed_trip(&store, pickup, 4, 4, &[(pickup, 1, 1)]).await;
        let r = store
            .insert_request(new_request(Location::new(12.972, 77.592), 1, 1, Some(2000)))
            .await
            .unwrap();
        let engine = MatchingEngine::new(store.clone(), MatchingConfig::default());
        let first = engine.match_riders(r.id).await.unwrap().unwrap();
        assert_eq!((first.trip_id, first.cab_id), (trip_id, cab_id));
        assert!(first.added_detour_minutes <= meters_to_minutes(2000.0));
        let second = engine.match_riders(r.id).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn no_candidates_is_none_and_missing_request_errors() {
        let store = Arc::new(MemoryStore::new());
        let r = store
            .insert_request(new_request(Location::new(12.97, 77.59), 1, 0, None))
            .await
            .unwrap();
        let engine = MatchingEngine::new(store.clone(), MatchingConfig::default());
        assert_eq!(engine.match_riders(r.id).await.unwrap(), None);
        let err = engine.match_riders(RequestId(999)).await.unwrap_err();
        assert!(matches!(err, AllocationError::RequestNotFound(RequestId(999))));
    }

    #[tokio::test]
    async fn matched_request_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let pickup = Location::new(12.97, 77.59);
        let (_, _, riders) = seed_trip(&store, pickup, 4, 4, &[(pickup, 1, 0)]).await;
        let engine = MatchingEngine::new(store.clone(), MatchingConfig::default());
        let err = engine.match_riders(riders[0]).await.unwrap_err();
        assert!(matches!(err, AllocationError::AlreadyMatched(_)));
    }
}
