//! Demand/supply readings behind surge pricing, cached per coarse spatial bucket.
//!
//! Cache-aside: a hit returns the stored reading, a miss (or an unreachable cache) counts
//! pending requests and available cabs in the store and writes the reading back with a
//! TTL. Cache failures never fail the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{AllocationError, CacheError};
use crate::spatial::bucket_key;
use crate::store::RideStore;
use crate::types::Location;

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait SurgeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process [`SurgeCache`]. Expiry follows the tokio clock, so paused-time tests work.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("cache mutex poisoned".into()))
    }
}

#[async_trait]
impl SurgeCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some((value, expires)) if Instant::now() < *expires => return Ok(Some(value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries()?
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Pending requests (demand) against available cabs (supply) near a point.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DemandSupply {
    pub demand: u32,
    pub supply: u32,
    pub ratio: f64,
}

impl DemandSupply {
    /// `demand / supply`, or `demand` itself when there is no supply.
    pub fn from_counts(demand: u32, supply: u32) -> Self {
        let ratio = if supply > 0 {
            f64::from(demand) / f64::from(supply)
        } else {
            f64::from(demand)
        };
        Self {
            demand,
            supply,
            ratio,
        }
    }

    /// Reading used when the real one is unavailable; never triggers surge.
    pub fn neutral() -> Self {
        Self {
            demand: 0,
            supply: 1,
            ratio: 0.0,
        }
    }
}

pub struct DemandSupplyCache {
    store: Arc<dyn RideStore>,
    cache: Arc<dyn SurgeCache>,
    ttl: Duration,
}

impl DemandSupplyCache {
    pub fn new(store: Arc<dyn RideStore>, cache: Arc<dyn SurgeCache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    pub async fn get_demand_supply(
        &self,
        location: Location,
        radius_m: f64,
    ) -> Result<DemandSupply, AllocationError> {
        let key = bucket_key(location);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<DemandSupply>(&raw) {
                Ok(reading) => {
                    debug!("demand/supply cache hit key={}", key);
                    return Ok(reading);
                }
                Err(e) => warn!("discarding undecodable demand/supply entry key={} error={}", key, e),
            },
            Ok(None) => {}
            Err(e) => warn!("demand/supply cache read failed key={} error={}", key, e),
        }
        let counts = self.store.count_demand_supply(location, radius_m).await?;
        let reading = DemandSupply::from_counts(counts.pending_requests, counts.available_cabs);
        match serde_json::to_string(&reading) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, self.ttl).await {
                    warn!("demand/supply cache write failed key={} error={}", key, e);
                }
            }
            Err(e) => warn!("demand/supply encode failed key={} error={}", key, e),
        }
        debug!(
            "demand/supply computed key={} demand={} supply={} ratio={:.2}",
            key, reading.demand, reading.supply, reading.ratio
        );
        Ok(reading)
    }

    /// Drops the cached reading for the bucket containing `location`.
    pub async fn invalidate(&self, location: Location) -> Result<(), AllocationError> {
        self.cache.delete(&bucket_key(location)).await?;
        Ok(())
    }

    /// [`Self::invalidate`], logging instead of returning a failure.
    pub(crate) async fn invalidate_quietly(&self, location: Location) {
        if let Err(e) = self.invalidate(location).await {
            warn!(
                "surge cache invalidation failed lat={} lon={} error={}",
                location.lat, location.lon, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::new_request;
    use crate::types::{CabStatus, NewCab};

    struct BrokenCache;

    #[async_trait]
    impl SurgeCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    const CENTER: Location = Location { lat: 12.97, lon: 77.59 };

    async fn area(pending: usize, cabs: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..pending {
            store.insert_request(new_request(CENTER, 1, 0, None)).await.unwrap();
        }
        for _ in 0..cabs {
            store
                .insert_cab(NewCab {
                    seat_capacity: 4,
                    luggage_capacity: 2,
                    location: Some(CENTER),
                    status: CabStatus::Available,
                })
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn ratio_without_supply_is_demand() {
        assert_eq!(DemandSupply::from_counts(3, 0).ratio, 3.0);
        assert_eq!(DemandSupply::from_counts(0, 0).ratio, 0.0);
        assert_eq!(DemandSupply::from_counts(3, 2).ratio, 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(30)).await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_reading_served_until_invalidated_or_expired() {
        let store = area(2, 1).await;
        let demand = DemandSupplyCache::new(store.clone(), Arc::new(MemoryCache::new()), Duration::from_secs(30));
        let first = demand.get_demand_supply(CENTER, 5000.0).await.unwrap();
        assert_eq!((first.demand, first.supply), (2, 1));

        store.insert_request(new_request(CENTER, 1, 0, None)).await.unwrap();
        assert_eq!(demand.get_demand_supply(CENTER, 5000.0).await.unwrap(), first);

        demand.invalidate(CENTER).await.unwrap();
        let fresh = demand.get_demand_supply(CENTER, 5000.0).await.unwrap();
        assert_eq!(fresh.demand, 3);

        store.insert_request(new_request(CENTER, 1, 0, None)).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(demand.get_demand_supply(CENTER, 5000.0).await.unwrap().demand, 4);
    }

    #[tokio::test]
    async fn broken_cache_falls_back_to_store() {
        let store = area(1, 2).await;
        let demand = DemandSupplyCache::new(store, Arc::new(BrokenCache), Duration::from_secs(30));
        let reading = demand.get_demand_supply(CENTER, 5000.0).await.unwrap();
        assert_eq!((reading.demand, reading.supply), (1, 2));
        assert!(demand.invalidate(CENTER).await.is_err());
        demand.invalidate_quietly(CENTER).await;
    }
}
