//! # Cabpool Engine
//!
//! Shared-cab allocation for airport ride pooling: spatially scoped greedy matching,
//! race-safe seat booking, cancellation with capacity release, and demand-driven surge
//! pricing.
//!
//! ## Entry point
//!
//! Use [`Allocator`] as the single entry point: create with [`Allocator::new`] from a
//! [`RideStore`], a [`SurgeCache`] and an [`AuditSink`], then [`Allocator::create_ride`],
//! [`Allocator::book_ride`], [`Allocator::cancel_ride`] and [`Allocator::estimate_fare`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cabpool_engine::{
//!     Allocator, AllocatorConfig, CabStatus, Direction, InMemoryAuditSink, Location,
//!     MemoryCache, MemoryStore, NewCab, NewRideRequest, RideStore, RiderId,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! store
//!     .insert_cab(NewCab {
//!         seat_capacity: 4,
//!         luggage_capacity: 3,
//!         location: Some(Location::new(12.972, 77.595)),
//!         status: CabStatus::Available,
//!     })
//!     .await
//!     .unwrap();
//! let allocator = Allocator::new(
//!     store,
//!     Arc::new(MemoryCache::new()),
//!     AllocatorConfig::default(),
//!     Arc::new(InMemoryAuditSink::new()),
//! );
//! let ride = allocator
//!     .create_ride(NewRideRequest {
//!         rider_id: RiderId(1),
//!         origin: Location::new(12.9716, 77.5946),
//!         destination: Location::new(13.1986, 77.7066),
//!         direction: Direction::ToAirport,
//!         seats_needed: 2,
//!         luggage_count: 1,
//!         detour_tolerance_m: None,
//!     })
//!     .await
//!     .unwrap();
//! let booking = allocator.book_ride(ride.id).await.unwrap();
//! assert!(booking.new_trip);
//! assert_eq!(booking.seats_remaining, 2);
//! # });
//! ```
//!
//! ## Lower-level API
//!
//! [`MatchingEngine`], [`BookingEngine`], [`CancellationEngine`] and [`PricingEngine`] can
//! be composed directly; [`geo`] holds the pure distance and insertion math.

pub mod api;
pub mod audit;
pub mod booking;
pub mod cancellation;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matching;
pub mod middleware;
pub mod persistence;
pub mod pricing;
pub mod scenario_gen;
pub mod spatial;
pub mod store;
pub mod surge;
pub mod types;

#[cfg(test)]
mod test_support;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, LogAuditSink};
pub use booking::BookingEngine;
pub use cancellation::CancellationEngine;
pub use config::{AllocatorConfig, BookingConfig, FareConfig, MatchingConfig, ServerConfig};
pub use engine::Allocator;
pub use error::{AllocationError, CacheError, ErrorKind, StoreError};
pub use matching::{select_best_candidate, MatchingEngine};
pub use persistence::{FilePersistence, PersistenceError, StoreSnapshot};
pub use pricing::{FareEstimate, PricingEngine, SurgeTier};
pub use scenario_gen::{seed_store, Scenario, ScenarioConfig, ScenarioGenerator};
pub use store::{AreaCounts, MemoryStore, RideStore, StoreTx};
pub use surge::{DemandSupply, DemandSupplyCache, MemoryCache, SurgeCache};
pub use types::{
    BookingResult, Cab, CabId, CabStatus, CancelResult, CandidateTrip, Direction, Load,
    Location, MatchResult, NewCab, NewRideRequest, RequestId, RequestStatus, RideRequest,
    RiderId, Trip, TripId, TripStatus,
};
