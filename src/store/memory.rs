//! In-process [`RideStore`]: committed rows behind one mutex, one async mutex per row for
//! exclusive locks, and H3 indexes over request origins and cab positions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tokio::time::Instant;

use super::{AreaCounts, RideStore, StoreTx};
use crate::error::StoreError;
use crate::geo::haversine_m;
use crate::persistence::StoreSnapshot;
use crate::spatial::SpatialIndex;
use crate::types::{
    now_secs, Cab, CabId, CabStatus, CandidateTrip, Direction, Load, Location, NewCab,
    NewRideRequest, RequestId, RequestStatus, RideRequest, Trip, TripId, TripStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Cab(CabId),
    Request(RequestId),
    Trip(TripId),
}

#[derive(Debug, Default)]
struct Tables {
    requests: BTreeMap<RequestId, RideRequest>,
    cabs: BTreeMap<CabId, Cab>,
    trips: BTreeMap<TripId, Trip>,
    /// Requests currently referencing each trip, any status.
    passengers: HashMap<TripId, BTreeSet<RequestId>>,
    request_index: SpatialIndex<RequestId>,
    cab_index: SpatialIndex<CabId>,
    next_request_id: u64,
    next_cab_id: u64,
    next_trip_id: u64,
}

impl Tables {
    fn put_request(&mut self, request: RideRequest) {
        let previous = self.requests.get(&request.id).and_then(|r| r.trip_id);
        if previous != request.trip_id {
            if let Some(old) = previous {
                if let Some(ids) = self.passengers.get_mut(&old) {
                    ids.remove(&request.id);
                }
            }
        }
        if let Some(trip_id) = request.trip_id {
            self.passengers.entry(trip_id).or_default().insert(request.id);
        }
        if !self.requests.contains_key(&request.id) {
            self.request_index.insert(request.id, request.origin);
        }
        self.requests.insert(request.id, request);
    }

    fn put_cab(&mut self, cab: Cab) {
        match cab.location {
            Some(loc) => self.cab_index.insert(cab.id, loc),
            None => self.cab_index.remove(cab.id),
        }
        self.cabs.insert(cab.id, cab);
    }

    /// Active passengers of a trip in pickup order.
    fn active_passengers(&self, trip_id: TripId) -> Vec<&RideRequest> {
        let mut riders: Vec<&RideRequest> = self
            .passengers
            .get(&trip_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.trip_id == Some(trip_id) && r.status.occupies_seat())
            .collect();
        riders.sort_by_key(|r| (r.created_at, r.id));
        riders
    }

    fn candidate(&self, trip: &Trip, origin: Location) -> Option<CandidateTrip> {
        let cab = self.cabs.get(&trip.cab_id)?;
        let riders = self.active_passengers(trip.id);
        let first = riders.first()?;
        let mut load = Load::default();
        let mut route = Vec::with_capacity(riders.len() + 1);
        let (mut lat, mut lon) = (0.0, 0.0);
        for r in &riders {
            load.seats += u32::from(r.seats_needed);
            load.luggage += u32::from(r.luggage_count);
            route.push(r.origin);
            lat += r.origin.lat;
            lon += r.origin.lon;
        }
        route.push(first.destination);
        let n = riders.len() as f64;
        let centroid = Location::new(lat / n, lon / n);
        Some(CandidateTrip {
            trip_id: trip.id,
            cab_id: cab.id,
            direction: trip.direction,
            seat_capacity: cab.seat_capacity,
            luggage_capacity: cab.luggage_capacity,
            load,
            route,
            distance_to_request_m: haversine_m(centroid, origin),
        })
    }
}

/// Cloning shares the same tables and lock registry.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    locks: Arc<Mutex<HashMap<RowKey, Arc<RowLock<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds indexes and id sequences from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut tables = Tables::default();
        for cab in snapshot.cabs {
            tables.next_cab_id = tables.next_cab_id.max(cab.id.0);
            tables.put_cab(cab);
        }
        for trip in snapshot.trips {
            tables.next_trip_id = tables.next_trip_id.max(trip.id.0);
            tables.trips.insert(trip.id, trip);
        }
        for request in snapshot.requests {
            tables.next_request_id = tables.next_request_id.max(request.id.0);
            tables.put_request(request);
        }
        Self {
            tables: Arc::new(Mutex::new(tables)),
            locks: Arc::default(),
        }
    }

    /// Committed state only; staged writes of open units of work are not included.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let tables = self.tables()?;
        Ok(StoreSnapshot {
            cabs: tables.cabs.values().cloned().collect(),
            trips: tables.trips.values().cloned().collect(),
            requests: tables.requests.values().cloned().collect(),
        })
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("tables mutex poisoned".into()))
    }

    fn row_lock(&self, key: RowKey) -> Result<Arc<RowLock<()>>, StoreError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Backend("lock registry poisoned".into()))?;
        Ok(locks.entry(key).or_default().clone())
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert_request(&self, new: NewRideRequest) -> Result<RideRequest, StoreError> {
        let mut tables = self.tables()?;
        tables.next_request_id += 1;
        let now = now_secs();
        let request = RideRequest {
            id: RequestId(tables.next_request_id),
            rider_id: new.rider_id,
            origin: new.origin,
            destination: new.destination,
            direction: new.direction,
            seats_needed: new.seats_needed,
            luggage_count: new.luggage_count,
            detour_tolerance_m: new.detour_tolerance_m,
            status: RequestStatus::Pending,
            trip_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.put_request(request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<RideRequest>, StoreError> {
        Ok(self.tables()?.requests.get(&id).cloned())
    }

    async fn insert_cab(&self, new: NewCab) -> Result<Cab, StoreError> {
        let mut tables = self.tables()?;
        tables.next_cab_id += 1;
        let cab = Cab {
            id: CabId(tables.next_cab_id),
            seat_capacity: new.seat_capacity,
            luggage_capacity: new.luggage_capacity,
            location: new.location,
            status: new.status,
        };
        tables.put_cab(cab.clone());
        Ok(cab)
    }

    async fn get_cab(&self, id: CabId) -> Result<Option<Cab>, StoreError> {
        Ok(self.tables()?.cabs.get(&id).cloned())
    }

    async fn get_trip(&self, id: TripId) -> Result<Option<Trip>, StoreError> {
        Ok(self.tables()?.trips.get(&id).cloned())
    }

    async fn nearby_candidate_trips(
        &self,
        origin: Location,
        direction: Direction,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<CandidateTrip>, StoreError> {
        let tables = self.tables()?;
        let trip_ids: BTreeSet<TripId> = tables
            .request_index
            .candidates_within(origin, radius_m)
            .into_iter()
            .filter_map(|id| tables.requests.get(&id))
            .filter(|r| r.status.occupies_seat() && haversine_m(origin, r.origin) <= radius_m)
            .filter_map(|r| r.trip_id)
            .collect();
        let mut candidates: Vec<CandidateTrip> = trip_ids
            .into_iter()
            .filter_map(|id| tables.trips.get(&id))
            .filter(|t| t.status == TripStatus::Planned && t.direction == direction)
            .filter_map(|t| tables.candidate(t, origin))
            .collect();
        candidates.sort_by(|a, b| {
            a.distance_to_request_m
                .total_cmp(&b.distance_to_request_m)
                .then(a.trip_id.cmp(&b.trip_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn nearby_available_cab(
        &self,
        origin: Location,
        radius_m: f64,
        min_seats: u8,
        min_luggage: u8,
    ) -> Result<Option<Cab>, StoreError> {
        let tables = self.tables()?;
        let best = tables
            .cab_index
            .candidates_within(origin, radius_m)
            .into_iter()
            .filter_map(|id| tables.cabs.get(&id))
            .filter(|c| {
                c.status == CabStatus::Available
                    && c.seat_capacity >= min_seats
                    && c.luggage_capacity >= min_luggage
            })
            .filter_map(|c| c.location.map(|loc| (haversine_m(origin, loc), c)))
            .filter(|(d, _)| *d <= radius_m)
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)))
            .map(|(_, c)| c.clone());
        Ok(best)
    }

    async fn count_demand_supply(
        &self,
        center: Location,
        radius_m: f64,
    ) -> Result<AreaCounts, StoreError> {
        let tables = self.tables()?;
        let pending_requests = tables
            .request_index
            .candidates_within(center, radius_m)
            .into_iter()
            .filter_map(|id| tables.requests.get(&id))
            .filter(|r| r.status == RequestStatus::Pending && haversine_m(center, r.origin) <= radius_m)
            .count() as u32;
        let available_cabs = tables
            .cab_index
            .candidates_within(center, radius_m)
            .into_iter()
            .filter_map(|id| tables.cabs.get(&id))
            .filter(|c| c.status == CabStatus::Available)
            .filter(|c| c.location.is_some_and(|loc| haversine_m(center, loc) <= radius_m))
            .count() as u32;
        Ok(AreaCounts {
            pending_requests,
            available_cabs,
        })
    }

    async fn begin(&self, deadline: Instant) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            deadline,
            held: HashMap::new(),
            requests: BTreeMap::new(),
            trips: BTreeMap::new(),
            cabs: BTreeMap::new(),
            finished: false,
        }))
    }
}

struct MemoryTx {
    store: MemoryStore,
    deadline: Instant,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    requests: BTreeMap<RequestId, RideRequest>,
    trips: BTreeMap<TripId, Trip>,
    cabs: BTreeMap<CabId, Cab>,
    finished: bool,
}

impl MemoryTx {
    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let lock = self.store.row_lock(key)?;
        let guard = tokio::time::timeout_at(self.deadline, lock.lock_owned())
            .await
            .map_err(|_| {
                debug!("row lock wait expired row={:?}", key);
                StoreError::LockTimeout
            })?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn require(&self, key: RowKey, table: &'static str, id: u64) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        if self.held.contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::NotLocked { table, id })
        }
    }

    fn current_request(&self, id: RequestId) -> Result<Option<RideRequest>, StoreError> {
        if let Some(staged) = self.requests.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.tables()?.requests.get(&id).cloned())
    }

    fn current_trip(&self, id: TripId) -> Result<Option<Trip>, StoreError> {
        if let Some(staged) = self.trips.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.tables()?.trips.get(&id).cloned())
    }

    fn current_cab(&self, id: CabId) -> Result<Option<Cab>, StoreError> {
        if let Some(staged) = self.cabs.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.tables()?.cabs.get(&id).cloned())
    }

    fn staged_trip(&mut self, id: TripId) -> Result<&mut Trip, StoreError> {
        if !self.trips.contains_key(&id) {
            let trip = self
                .current_trip(id)?
                .ok_or(StoreError::MissingRow { table: "trips", id: id.0 })?;
            self.trips.insert(id, trip);
        }
        self.trips
            .get_mut(&id)
            .ok_or(StoreError::MissingRow { table: "trips", id: id.0 })
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_cab(&mut self, id: CabId) -> Result<Option<Cab>, StoreError> {
        self.acquire(RowKey::Cab(id)).await?;
        self.current_cab(id)
    }

    async fn lock_request(&mut self, id: RequestId) -> Result<Option<RideRequest>, StoreError> {
        self.acquire(RowKey::Request(id)).await?;
        self.current_request(id)
    }

    async fn lock_trip(&mut self, id: TripId) -> Result<Option<Trip>, StoreError> {
        self.acquire(RowKey::Trip(id)).await?;
        self.current_trip(id)
    }

    async fn trip_load(&mut self, id: TripId) -> Result<Load, StoreError> {
        let tables = self.store.tables()?;
        let mut ids: BTreeSet<RequestId> =
            tables.passengers.get(&id).cloned().unwrap_or_default();
        ids.extend(
            self.requests
                .values()
                .filter(|r| r.trip_id == Some(id))
                .map(|r| r.id),
        );
        let mut load = Load::default();
        for rid in ids {
            let row = self.requests.get(&rid).or_else(|| tables.requests.get(&rid));
            if let Some(r) = row {
                if r.trip_id == Some(id) && r.status.occupies_seat() {
                    load.seats += u32::from(r.seats_needed);
                    load.luggage += u32::from(r.luggage_count);
                }
            }
        }
        Ok(load)
    }

    async fn insert_trip(
        &mut self,
        cab_id: CabId,
        direction: Direction,
    ) -> Result<Trip, StoreError> {
        self.require(RowKey::Cab(cab_id), "cabs", cab_id.0)?;
        let id = {
            let mut tables = self.store.tables()?;
            tables.next_trip_id += 1;
            TripId(tables.next_trip_id)
        };
        let guard = self
            .store
            .row_lock(RowKey::Trip(id))?
            .try_lock_owned()
            .map_err(|_| StoreError::Backend(format!("fresh trip row {} already locked", id)))?;
        self.held.insert(RowKey::Trip(id), guard);
        let trip = Trip {
            id,
            cab_id,
            direction,
            passenger_count: 0,
            status: TripStatus::Planned,
            created_at: now_secs(),
        };
        self.trips.insert(id, trip.clone());
        Ok(trip)
    }

    async fn set_request_status(
        &mut self,
        id: RequestId,
        status: RequestStatus,
        trip_id: Option<TripId>,
    ) -> Result<(), StoreError> {
        self.require(RowKey::Request(id), "ride_requests", id.0)?;
        let mut request = self
            .current_request(id)?
            .ok_or(StoreError::MissingRow { table: "ride_requests", id: id.0 })?;
        request.status = status;
        request.trip_id = trip_id;
        request.updated_at = now_secs();
        self.requests.insert(id, request);
        Ok(())
    }

    async fn set_trip_passengers(&mut self, id: TripId, count: u32) -> Result<(), StoreError> {
        self.require(RowKey::Trip(id), "trips", id.0)?;
        self.staged_trip(id)?.passenger_count = count;
        Ok(())
    }

    async fn set_trip_status(&mut self, id: TripId, status: TripStatus) -> Result<(), StoreError> {
        self.require(RowKey::Trip(id), "trips", id.0)?;
        self.staged_trip(id)?.status = status;
        Ok(())
    }

    async fn set_cab_status(&mut self, id: CabId, status: CabStatus) -> Result<(), StoreError> {
        self.require(RowKey::Cab(id), "cabs", id.0)?;
        let mut cab = self
            .current_cab(id)?
            .ok_or(StoreError::MissingRow { table: "cabs", id: id.0 })?;
        cab.status = status;
        self.cabs.insert(id, cab);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        self.finished = true;
        if Instant::now() > self.deadline {
            self.held.clear();
            return Err(StoreError::LockTimeout);
        }
        {
            let mut tables = self.store.tables()?;
            for (id, trip) in std::mem::take(&mut self.trips) {
                tables.trips.insert(id, trip);
            }
            for (_, cab) in std::mem::take(&mut self.cabs) {
                tables.put_cab(cab);
            }
            for (_, request) in std::mem::take(&mut self.requests) {
                tables.put_request(request);
            }
        }
        self.held.clear();
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        let staged = self.requests.len() + self.trips.len() + self.cabs.len();
        if !self.finished && staged > 0 {
            debug!("unit of work rolled back staged_rows={}", staged);
        }
    }
}
