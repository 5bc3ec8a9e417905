//! Engine and server configuration.
//!
//! Every struct has production defaults; [`AllocatorConfig::from_env`] and
//! [`ServerConfig::from_env`] override individual values from environment variables.
//! Unparseable values fall back to the default.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Matcher limits.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchingConfig {
    /// Search radius when a request carries no tolerance.
    pub default_search_radius_m: f64,
    /// Upper bound on candidate trips scored per call.
    pub max_candidates: usize,
    /// Hard ceiling on added detour for any insertion.
    pub max_detour_minutes: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_search_radius_m: 2000.0,
            max_candidates: 20,
            max_detour_minutes: 15.0,
        }
    }
}

/// Booking and cancellation unit-of-work limits.
#[derive(Clone, Debug, PartialEq)]
pub struct BookingConfig {
    /// Deadline for a whole unit of work, lock waits included.
    pub lock_timeout: Duration,
    /// Radius for picking a cab when no existing trip fits.
    pub cab_search_radius_m: f64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            cab_search_radius_m: 10_000.0,
        }
    }
}

/// Fare parameters in currency units.
#[derive(Clone, Debug, PartialEq)]
pub struct FareConfig {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub per_min_rate: Decimal,
    pub min_fare: Decimal,
    /// Radius for the demand/supply reading behind surge.
    pub surge_radius_m: f64,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: Decimal::from(50),
            per_km_rate: Decimal::from(12),
            per_min_rate: Decimal::from(2),
            min_fare: Decimal::from(75),
            surge_radius_m: 5000.0,
        }
    }
}

/// Everything the [`crate::Allocator`] needs.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocatorConfig {
    pub matching: MatchingConfig,
    pub booking: BookingConfig,
    pub fare: FareConfig,
    /// TTL of cached demand/supply readings.
    pub surge_cache_ttl: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            booking: BookingConfig::default(),
            fare: FareConfig::default(),
            surge_cache_ttl: Duration::from_secs(30),
        }
    }
}

impl AllocatorConfig {
    /// Defaults overridden by `MATCH_RADIUS_M`, `MAX_CANDIDATES`, `MAX_DETOUR_MINUTES`,
    /// `BOOKING_TIMEOUT_MS`, `CAB_SEARCH_RADIUS_M`, `BASE_FARE`, `PER_KM_RATE`,
    /// `PER_MIN_RATE`, `MIN_FARE`, `SURGE_RADIUS_M` and `SURGE_CACHE_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("MATCH_RADIUS_M") {
            config.matching.default_search_radius_m = v;
        }
        if let Some(v) = env_parse("MAX_CANDIDATES") {
            config.matching.max_candidates = v;
        }
        if let Some(v) = env_parse("MAX_DETOUR_MINUTES") {
            config.matching.max_detour_minutes = v;
        }
        if let Some(ms) = env_parse("BOOKING_TIMEOUT_MS") {
            config.booking.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_parse("CAB_SEARCH_RADIUS_M") {
            config.booking.cab_search_radius_m = v;
        }
        if let Some(v) = env_parse("BASE_FARE") {
            config.fare.base_fare = v;
        }
        if let Some(v) = env_parse("PER_KM_RATE") {
            config.fare.per_km_rate = v;
        }
        if let Some(v) = env_parse("PER_MIN_RATE") {
            config.fare.per_min_rate = v;
        }
        if let Some(v) = env_parse("MIN_FARE") {
            config.fare.min_fare = v;
        }
        if let Some(v) = env_parse("SURGE_RADIUS_M") {
            config.fare.surge_radius_m = v;
        }
        if let Some(secs) = env_parse("SURGE_CACHE_TTL_SECS") {
            config.surge_cache_ttl = Duration::from_secs(secs);
        }
        config
    }
}

/// Process-level settings for the HTTP binary.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    /// JSON snapshot loaded at startup and written after shutdown.
    pub snapshot_path: Option<PathBuf>,
    /// Seeds a synthetic fleet and request pool when no snapshot exists.
    pub demo_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            snapshot_path: None,
            demo_seed: None,
        }
    }
}

impl ServerConfig {
    /// Reads `PORT`, `SNAPSHOT_PATH` and `DEMO_SEED`.
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8080),
            snapshot_path: std::env::var("SNAPSHOT_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            demo_seed: env_parse("DEMO_SEED"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
