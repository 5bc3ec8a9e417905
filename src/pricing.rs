//! Fare estimation with demand-driven surge.
//!
//! Money is [`Decimal`] in currency units. Component fares are rounded to cents half away
//! from zero; the surge multiplier applies to the subtotal and the result is floored at
//! the minimum fare.

use std::sync::Arc;

use log::{info, warn};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::FareConfig;
use crate::error::AllocationError;
use crate::geo::{haversine_km, travel_time_minutes};
use crate::surge::{DemandSupply, DemandSupplyCache};
use crate::types::Location;

/// Surge band selected by the demand/supply ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurgeTier {
    None,
    Moderate,
    High,
}

impl SurgeTier {
    /// `High` above 2.0, `Moderate` above 1.5, otherwise `None`.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 2.0 {
            SurgeTier::High
        } else if ratio > 1.5 {
            SurgeTier::Moderate
        } else {
            SurgeTier::None
        }
    }

    pub fn multiplier(self) -> Decimal {
        match self {
            SurgeTier::None => Decimal::ONE,
            SurgeTier::Moderate => Decimal::new(12, 1),
            SurgeTier::High => Decimal::new(15, 1),
        }
    }
}

/// Fare breakdown returned to riders.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FareEstimate {
    pub base_fare: Decimal,
    pub distance_fare: Decimal,
    pub time_fare: Decimal,
    pub subtotal: Decimal,
    pub surge_multiplier: Decimal,
    pub surge_tier: SurgeTier,
    pub total: Decimal,
    pub distance_km: f64,
    pub estimated_minutes: f64,
    pub demand_supply: DemandSupply,
}

pub struct PricingEngine {
    demand: Arc<DemandSupplyCache>,
    config: FareConfig,
}

impl PricingEngine {
    pub fn new(demand: Arc<DemandSupplyCache>, config: FareConfig) -> Self {
        Self { demand, config }
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    /// Fare for a direct ride, surged by demand around `origin`.
    ///
    /// A failed demand/supply lookup prices without surge.
    pub async fn estimate_fare(
        &self,
        origin: Location,
        destination: Location,
    ) -> Result<FareEstimate, AllocationError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(AllocationError::InvalidRequest(
                "fare coordinates out of range".into(),
            ));
        }
        let demand = self
            .demand
            .get_demand_supply(origin, self.config.surge_radius_m)
            .await
            .unwrap_or_else(|e| {
                warn!("demand/supply unavailable, pricing without surge error={}", e);
                DemandSupply::neutral()
            });
        let estimate = self.price(
            haversine_km(origin, destination),
            travel_time_minutes(origin, destination),
            demand,
        );
        info!(
            "fare estimated distance_km={:.2} minutes={:.1} surge={} total={}",
            estimate.distance_km, estimate.estimated_minutes, estimate.surge_multiplier, estimate.total
        );
        Ok(estimate)
    }

    /// Pure fare computation for a known distance, duration and demand reading.
    pub fn price(&self, distance_km: f64, minutes: f64, demand: DemandSupply) -> FareEstimate {
        let c = &self.config;
        let distance_fare = cents(decimal(distance_km) * c.per_km_rate);
        let time_fare = cents(decimal(minutes) * c.per_min_rate);
        let subtotal = c.base_fare + distance_fare + time_fare;
        let surge_tier = SurgeTier::from_ratio(demand.ratio);
        let surge_multiplier = surge_tier.multiplier();
        let total = cents(subtotal * surge_multiplier).max(c.min_fare);
        FareEstimate {
            base_fare: c.base_fare,
            distance_fare,
            time_fare,
            subtotal,
            surge_multiplier,
            surge_tier,
            total,
            distance_km,
            estimated_minutes: minutes,
            demand_supply: demand,
        }
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
