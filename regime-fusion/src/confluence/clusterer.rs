//! Confluence zone clustering.
//!
//! Groups price-anchored factors into zones with a tolerance-based
//! single-linkage pass over the price-sorted factors, re-centering the
//! zone on its `strength × weight` centroid after every admission.
//! Sorting uses a total order over every factor field, so the result does
//! not depend on input order.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{FactorKind, SpatialFactor};
use crate::error::{FusionError, FusionResult};

/// Zone role relative to a reference price, computed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// Zone lies below the price.
    Support,
    /// Zone lies above the price.
    Resistance,
    /// Price is inside the zone.
    Neutral,
}

/// Clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Max distance from the running centroid, in price units.
    pub tolerance: Decimal,
    /// A single-member zone survives only above this strength.
    pub solo_significance: f64,
    /// Bonus per member beyond the first.
    pub count_bonus_step: f64,
    pub max_count_bonus: f64,
    /// Bonus per distinct kind beyond the first.
    pub diversity_bonus_step: f64,
    pub max_diversity_bonus: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::ONE,
            solo_significance: 0.8,
            count_bonus_step: 0.05,
            max_count_bonus: 0.15,
            diversity_bonus_step: 0.05,
            max_diversity_bonus: 0.15,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> FusionResult<()> {
        validate_tolerance(self.tolerance)?;
        if !self.solo_significance.is_finite() || !(0.0..=1.0).contains(&self.solo_significance) {
            return Err(FusionError::InvalidConfiguration(format!(
                "solo_significance must be in [0, 1], got {}",
                self.solo_significance
            )));
        }
        let bonuses = [
            self.count_bonus_step,
            self.max_count_bonus,
            self.diversity_bonus_step,
            self.max_diversity_bonus,
        ];
        if bonuses.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(FusionError::InvalidConfiguration(
                "zone bonuses must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_tolerance(tolerance: Decimal) -> FusionResult<()> {
    if tolerance <= Decimal::ZERO {
        return Err(FusionError::InvalidConfiguration(format!(
            "cluster tolerance must be positive, got {}",
            tolerance
        )));
    }
    Ok(())
}

/// A price region where several factors agree.
///
/// Members borrow from the factor set of the cycle that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfluenceZone<'a> {
    /// Weighted centroid of the members.
    pub center: Decimal,
    /// `center - tolerance`.
    pub lower: Decimal,
    /// `center + tolerance`.
    pub upper: Decimal,
    /// Members in price order.
    pub members: Vec<&'a SpatialFactor>,
    pub aggregate_strength: f64,
    pub confidence: f64,
    /// Number of distinct factor kinds.
    pub diversity: usize,
}

impl<'a> ConfluenceZone<'a> {
    /// Role of the zone for the given reference price.
    pub fn zone_type(&self, reference_price: Decimal) -> ZoneType {
        if reference_price > self.upper {
            ZoneType::Support
        } else if reference_price < self.lower {
            ZoneType::Resistance
        } else {
            ZoneType::Neutral
        }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.lower && price <= self.upper
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn kinds(&self) -> BTreeSet<FactorKind> {
        self.members.iter().map(|f| f.kind).collect()
    }

    pub fn distance_to(&self, price: Decimal) -> Decimal {
        (self.center - price).abs()
    }
}

/// Closest zone below the price.
pub fn nearest_support<'z, 'a>(
    zones: &'z [ConfluenceZone<'a>],
    reference_price: Decimal,
) -> Option<&'z ConfluenceZone<'a>> {
    zones
        .iter()
        .filter(|z| z.zone_type(reference_price) == ZoneType::Support)
        .min_by_key(|z| z.distance_to(reference_price))
}

/// Closest zone above the price.
pub fn nearest_resistance<'z, 'a>(
    zones: &'z [ConfluenceZone<'a>],
    reference_price: Decimal,
) -> Option<&'z ConfluenceZone<'a>> {
    zones
        .iter()
        .filter(|z| z.zone_type(reference_price) == ZoneType::Resistance)
        .min_by_key(|z| z.distance_to(reference_price))
}

struct Candidate<'a> {
    factor: &'a SpatialFactor,
    price: f64,
    mass: f64,
}

fn canonical_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.factor
        .price
        .cmp(&b.factor.price)
        .then_with(|| a.factor.kind.cmp(&b.factor.kind))
        .then_with(|| a.factor.strength.total_cmp(&b.factor.strength))
        .then_with(|| a.factor.weight.total_cmp(&b.factor.weight))
        .then_with(|| a.factor.observed_at.cmp(&b.factor.observed_at))
}

/// Stateless zone builder.
#[derive(Debug, Clone)]
pub struct FactorClusterer {
    config: ClusterConfig,
}

impl FactorClusterer {
    pub fn new(config: ClusterConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cluster with the configured tolerance.
    pub fn cluster_default<'a>(&self, factors: &'a [SpatialFactor]) -> Vec<ConfluenceZone<'a>> {
        self.build_zones(factors, self.config.tolerance)
    }

    /// Cluster `factors` into zones no wider than `2 × tolerance`.
    pub fn cluster<'a>(
        &self,
        factors: &'a [SpatialFactor],
        tolerance: Decimal,
    ) -> FusionResult<Vec<ConfluenceZone<'a>>> {
        validate_tolerance(tolerance)?;
        Ok(self.build_zones(factors, tolerance))
    }

    fn build_zones<'a>(
        &self,
        factors: &'a [SpatialFactor],
        tolerance: Decimal,
    ) -> Vec<ConfluenceZone<'a>> {
        let mut candidates: Vec<Candidate<'a>> = Vec::with_capacity(factors.len());
        for factor in factors {
            if let Err(e) = factor.validate() {
                warn!(kind = factor.kind.as_str(), error = %e, "Skipping invalid factor");
                continue;
            }
            let mass = factor.mass();
            match factor.price.to_f64() {
                Some(price) if mass > 0.0 => candidates.push(Candidate { factor, price, mass }),
                _ => {}
            }
        }
        candidates.sort_by(canonical_order);

        let tol = tolerance.to_f64().unwrap_or(0.0);
        let mut zones = Vec::new();
        let mut i = 0;

        while i < candidates.len() {
            let seed = &candidates[i];
            let mut weighted_sum = seed.price * seed.mass;
            let mut mass_sum = seed.mass;
            let mut centroid = seed.price;
            let mut members = vec![seed.factor];

            let mut j = i + 1;
            while j < candidates.len() {
                let next = &candidates[j];
                // Sorted ascending and the centroid never exceeds the last
                // admitted price, so the first miss ends the zone.
                if next.price - centroid > tol {
                    break;
                }
                weighted_sum += next.price * next.mass;
                mass_sum += next.mass;
                centroid = weighted_sum / mass_sum;
                members.push(next.factor);
                j += 1;
            }
            i = j;

            if let Some(zone) = self.finish_zone(members, centroid, tolerance) {
                zones.push(zone);
            }
        }

        debug!(
            factors = factors.len(),
            usable = candidates.len(),
            zones = zones.len(),
            "Clustered factors"
        );
        zones
    }

    fn finish_zone<'a>(
        &self,
        members: Vec<&'a SpatialFactor>,
        centroid: f64,
        tolerance: Decimal,
    ) -> Option<ConfluenceZone<'a>> {
        let count = members.len();
        if count == 1 && members[0].strength <= self.config.solo_significance {
            return None;
        }

        let center = Decimal::from_f64(centroid)
            .map(|c| c.round_dp(8))
            .unwrap_or(members[0].price);

        let weight_sum: f64 = members.iter().map(|f| f.weight).sum();
        let avg_strength = if weight_sum > 0.0 {
            members.iter().map(|f| f.strength * f.weight).sum::<f64>() / weight_sum
        } else {
            0.0
        };

        let diversity = members.iter().map(|f| f.kind).collect::<BTreeSet<_>>().len();
        let count_bonus =
            (self.config.count_bonus_step * (count - 1) as f64).min(self.config.max_count_bonus);
        let diversity_bonus = (self.config.diversity_bonus_step * (diversity - 1) as f64)
            .min(self.config.max_diversity_bonus);

        let aggregate_strength = (avg_strength + count_bonus + diversity_bonus).clamp(0.0, 1.0);
        let coverage = 1.0 - 0.5_f64.powi(count as i32);
        let confidence = (aggregate_strength * coverage).clamp(0.0, 1.0);

        Some(ConfluenceZone {
            center,
            lower: center - tolerance,
            upper: center + tolerance,
            members,
            aggregate_strength,
            confidence,
            diversity,
        })
    }
}

impl Default for FactorClusterer {
    fn default() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }
}
