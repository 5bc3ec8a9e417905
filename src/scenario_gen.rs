//! Synthetic fleet and demand generator.
//!
//! Deterministic, configurable cabs and ride requests around an airport for property
//! tests, benchmarks and demo seeding. Same seed ⇒ same scenario.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::geo::EARTH_RADIUS_KM;
use crate::store::RideStore;
use crate::types::{
    Cab, CabStatus, Direction, Location, NewCab, NewRideRequest, RideRequest, RiderId,
    MAX_CAB_LUGGAGE, MAX_SEATS_PER_REQUEST,
};

/// Configuration for the scenario generator. All ranges are inclusive.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// RNG seed. Same seed ⇒ same scenario.
    pub seed: u64,
    pub airport: Location,
    /// Center of the pickup area for airport-bound rides.
    pub city_center: Location,
    pub num_cabs: usize,
    pub num_requests: usize,
    /// Scatter radius around the city center (and around the airport for arrivals).
    pub spread_m: f64,
    /// Probability of an airport-bound request (0.0..=1.0). Arrival otherwise.
    pub to_airport_ratio: f64,
    /// Probability that a cab waits at the airport rather than in the city.
    pub cab_at_airport_ratio: f64,
    pub seats_max: u8,
    pub luggage_max: u8,
    /// Seat capacities cabs are drawn from.
    pub cab_seat_options: Vec<u8>,
    /// Detour tolerances requests are drawn from; `None` uses the engine default.
    pub tolerance_options: Vec<Option<u32>>,
    /// Number of distinct riders (1..=num_riders).
    pub num_riders: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            airport: Location::new(13.1986, 77.7066),
            city_center: Location::new(12.9716, 77.5946),
            num_cabs: 20,
            num_requests: 100,
            spread_m: 3000.0,
            to_airport_ratio: 0.8,
            cab_at_airport_ratio: 0.2,
            seats_max: 3,
            luggage_max: 2,
            cab_seat_options: vec![4, 6],
            tolerance_options: vec![None, Some(1500), Some(3000)],
            num_riders: 50,
        }
    }
}

/// A generated fleet and request pool, not yet inserted anywhere.
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    pub cabs: Vec<NewCab>,
    pub requests: Vec<NewRideRequest>,
}

pub struct ScenarioGenerator {
    rng: StdRng,
    config: ScenarioConfig,
}

impl ScenarioGenerator {
    pub fn new(config: ScenarioConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    pub fn next_cab(&mut self) -> NewCab {
        let anchor = if self.rng.gen::<f64>() < self.config.cab_at_airport_ratio {
            self.config.airport
        } else {
            self.config.city_center
        };
        let location = self.scatter(anchor);
        let seat_capacity = pick(&mut self.rng, &self.config.cab_seat_options).unwrap_or(4);
        NewCab {
            seat_capacity,
            luggage_capacity: self.rng.gen_range(seat_capacity.min(MAX_CAB_LUGGAGE)..=MAX_CAB_LUGGAGE),
            location: Some(location),
            status: CabStatus::Available,
        }
    }

    pub fn next_request(&mut self) -> NewRideRequest {
        let (direction, origin, destination) = if self.rng.gen::<f64>() < self.config.to_airport_ratio {
            (
                Direction::ToAirport,
                self.scatter(self.config.city_center),
                self.config.airport,
            )
        } else {
            (
                Direction::FromAirport,
                self.scatter(self.config.airport),
                self.scatter(self.config.city_center),
            )
        };
        let seats_max = self.config.seats_max.clamp(1, MAX_SEATS_PER_REQUEST);
        NewRideRequest {
            rider_id: RiderId(self.rng.gen_range(1..=self.config.num_riders.max(1))),
            origin,
            destination,
            direction,
            seats_needed: self.rng.gen_range(1..=seats_max),
            luggage_count: self.rng.gen_range(0..=self.config.luggage_max),
            detour_tolerance_m: pick(&mut self.rng, &self.config.tolerance_options).flatten(),
        }
    }

    /// Fleet and request pool sized by the config.
    pub fn scenario(&mut self) -> Scenario {
        let cabs = (0..self.config.num_cabs).map(|_| self.next_cab()).collect();
        let requests = (0..self.config.num_requests)
            .map(|_| self.next_request())
            .collect();
        Scenario { cabs, requests }
    }

    /// Uniform point within `spread_m` of `anchor` (equirectangular offset).
    fn scatter(&mut self, anchor: Location) -> Location {
        let distance_km = self.config.spread_m / 1000.0 * self.rng.gen::<f64>().sqrt();
        let bearing = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let dlat = (distance_km * bearing.cos() / EARTH_RADIUS_KM).to_degrees();
        let dlon = (distance_km * bearing.sin() / (EARTH_RADIUS_KM * anchor.lat.to_radians().cos()))
            .to_degrees();
        Location::new(anchor.lat + dlat, anchor.lon + dlon)
    }
}

fn pick<T: Copy>(rng: &mut StdRng, options: &[T]) -> Option<T> {
    if options.is_empty() {
        None
    } else {
        Some(options[rng.gen_range(0..options.len())])
    }
}

/// Inserts a scenario into a store; returns the stored rows in generation order.
pub async fn seed_store(
    store: &dyn RideStore,
    scenario: &Scenario,
) -> Result<(Vec<Cab>, Vec<RideRequest>), StoreError> {
    let mut cabs = Vec::with_capacity(scenario.cabs.len());
    for cab in &scenario.cabs {
        cabs.push(store.insert_cab(cab.clone()).await?);
    }
    let mut requests = Vec::with_capacity(scenario.requests.len());
    for request in &scenario.requests {
        requests.push(store.insert_request(request.clone()).await?);
    }
    Ok((cabs, requests))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_m;
    use crate::store::MemoryStore;

    #[test]
    fn same_seed_same_scenario() {
        let config = ScenarioConfig {
            seed: 42,
            num_cabs: 5,
            num_requests: 10,
            ..Default::default()
        };
        let a = ScenarioGenerator::new(config.clone()).scenario();
        let b = ScenarioGenerator::new(config).scenario();
        assert_eq!(a, b);
        assert_eq!((a.cabs.len(), a.requests.len()), (5, 10));
    }

    #[test]
    fn different_seed_different_scenario() {
        let a = ScenarioGenerator::new(ScenarioConfig { seed: 1, ..Default::default() }).scenario();
        let b = ScenarioGenerator::new(ScenarioConfig { seed: 2, ..Default::default() }).scenario();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_rows_are_valid_and_within_spread() {
        let config = ScenarioConfig {
            seed: 7,
            to_airport_ratio: 1.0,
            ..Default::default()
        };
        let scenario = ScenarioGenerator::new(config.clone()).scenario();
        for request in &scenario.requests {
            assert!(request.validate().is_ok());
            assert_eq!(request.direction, Direction::ToAirport);
            assert!(haversine_m(config.city_center, request.origin) <= config.spread_m + 1.0);
        }
        for cab in &scenario.cabs {
            assert!(cab.validate().is_ok());
            assert!(cab.luggage_capacity >= cab.seat_capacity.min(MAX_CAB_LUGGAGE));
        }
    }

    #[tokio::test]
    async fn seed_store_inserts_everything() {
        let store = MemoryStore::new();
        let scenario = ScenarioGenerator::new(ScenarioConfig {
            seed: 3,
            num_cabs: 4,
            num_requests: 6,
            ..Default::default()
        })
        .scenario();
        let (cabs, requests) = seed_store(&store, &scenario).await.unwrap();
        assert_eq!((cabs.len(), requests.len()), (4, 6));
        let snapshot = store.snapshot().unwrap();
        assert_eq!((snapshot.cabs.len(), snapshot.requests.len()), (4, 6));
    }
}
