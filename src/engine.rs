//! Single-entry allocation facade.
//!
//! [`Allocator`] wires the matching, booking, cancellation and pricing engines to one
//! store, one surge cache and one audit sink, so the protocol layer never assembles them
//! itself.

use std::sync::Arc;

use log::{info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::booking::BookingEngine;
use crate::cancellation::CancellationEngine;
use crate::config::AllocatorConfig;
use crate::error::AllocationError;
use crate::matching::MatchingEngine;
use crate::pricing::{FareEstimate, PricingEngine};
use crate::store::RideStore;
use crate::surge::{DemandSupplyCache, SurgeCache};
use crate::types::{
    BookingResult, CancelResult, Location, MatchResult, NewRideRequest, RequestId, RideRequest,
};

/// Actor recorded on audit events raised through the facade.
const ACTOR: &str = "api";

/// Allocation engine for one store.
///
/// Use [`Allocator::create_ride`] to add requests, [`Allocator::book_ride`] to seat them
/// (pooling into an open trip or opening a new one) and [`Allocator::cancel_ride`] to
/// release them.
pub struct Allocator {
    store: Arc<dyn RideStore>,
    matcher: Arc<MatchingEngine>,
    booking: BookingEngine,
    cancellation: CancellationEngine,
    pricing: PricingEngine,
    demand: Arc<DemandSupplyCache>,
    audit: Arc<dyn AuditSink>,
}

impl Allocator {
    pub fn new(
        store: Arc<dyn RideStore>,
        cache: Arc<dyn SurgeCache>,
        config: AllocatorConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let demand = Arc::new(DemandSupplyCache::new(
            store.clone(),
            cache,
            config.surge_cache_ttl,
        ));
        let matcher = Arc::new(MatchingEngine::new(store.clone(), config.matching));
        let booking = BookingEngine::new(
            store.clone(),
            matcher.clone(),
            demand.clone(),
            config.booking.clone(),
        );
        let cancellation = CancellationEngine::new(store.clone(), demand.clone(), config.booking);
        let pricing = PricingEngine::new(demand.clone(), config.fare);
        Self {
            store,
            matcher,
            booking,
            cancellation,
            pricing,
            demand,
            audit,
        }
    }

    pub fn store(&self) -> &Arc<dyn RideStore> {
        &self.store
    }

    pub fn matcher(&self) -> &MatchingEngine {
        &self.matcher
    }

    /// Lower-level booking operations (explicit trip, trip creation, cab search).
    pub fn booking(&self) -> &BookingEngine {
        &self.booking
    }

    pub fn demand_supply(&self) -> &DemandSupplyCache {
        &self.demand
    }

    /// Validates and stores a new `pending` request.
    pub async fn create_ride(&self, new: NewRideRequest) -> Result<RideRequest, AllocationError> {
        new.validate().map_err(AllocationError::InvalidRequest)?;
        let ride = self.store.insert_request(new).await?;
        info!(
            "ride created request_id={} rider_id={} direction={:?} seats={} luggage={}",
            ride.id, ride.rider_id, ride.direction, ride.seats_needed, ride.luggage_count
        );
        self.demand.invalidate_quietly(ride.origin).await;
        Ok(ride)
    }

    pub async fn get_ride(&self, id: RequestId) -> Result<RideRequest, AllocationError> {
        self.store
            .get_request(id)
            .await?
            .ok_or(AllocationError::RequestNotFound(id))
    }

    /// Proposal only; nothing is reserved.
    pub async fn match_ride(&self, id: RequestId) -> Result<Option<MatchResult>, AllocationError> {
        self.matcher.match_riders(id).await
    }

    pub async fn book_ride(&self, id: RequestId) -> Result<BookingResult, AllocationError> {
        let outcome = self.booking.book(id).await;
        self.record(AuditEvent::booking(ACTOR, id, &outcome), outcome.as_ref().err());
        outcome
    }

    pub async fn cancel_ride(&self, id: RequestId) -> Result<CancelResult, AllocationError> {
        let outcome = self.cancellation.cancel_ride(id).await;
        self.record(AuditEvent::cancellation(ACTOR, id, &outcome), outcome.as_ref().err());
        outcome
    }

    pub async fn estimate_fare(
        &self,
        origin: Location,
        destination: Location,
    ) -> Result<FareEstimate, AllocationError> {
        self.pricing.estimate_fare(origin, destination).await
    }

    fn record(&self, event: AuditEvent, error: Option<&AllocationError>) {
        if let Some(e) = error {
            warn!(
                "{} rejected request_id={} code={} error={}",
                event.action.as_str(),
                event.request_id,
                e.code(),
                e
            );
        }
        self.audit.emit(&event);
    }
}
