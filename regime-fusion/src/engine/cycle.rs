//! Per-context evaluation engine.
//!
//! Runs one evaluation cycle:
//! 1. Cluster spatial factors into confluence zones
//! 2. Feed each dimension's metric to the regime tracker
//! 3. Apply configured source weights and fuse the signal components
//! 4. Classify the market condition
//!
//! The tracker is the only state carried between cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::confluence::{ClusterConfig, ConfluenceZone, FactorClusterer};
use crate::data::{Dimension, SignalComponent, SignalSource, SpatialFactor};
use crate::error::{FusionError, FusionResult};
use crate::fusion::{FusionConfig, SignalFusion, UnifiedSignal};
use crate::regime::{
    ClassifierConfig, ConditionAssessment, MarketConditionClassifier, RegimeState, RegimeTracker,
    RegimeTrackerConfig,
};

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub regime: RegimeTrackerConfig,
    #[serde(default)]
    pub clustering: ClusterConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Per-source weight overriding the producer's `weight`.
    #[serde(default)]
    pub source_weights: HashMap<SignalSource, f64>,
}

impl EngineConfig {
    pub fn validate(&self) -> FusionResult<()> {
        self.regime.validate()?;
        self.clustering.validate()?;
        self.fusion.validate()?;
        self.classifier.validate()?;
        for (source, weight) in &self.source_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(FusionError::InvalidConfiguration(format!(
                    "weight for {} must be finite and >= 0, got {}",
                    source, weight
                )));
            }
        }
        Ok(())
    }
}

/// Everything the upstream collaborators hand over for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleInput {
    pub cycle_time: DateTime<Utc>,
    pub reference_price: Decimal,
    #[serde(default)]
    pub components: Vec<SignalComponent>,
    #[serde(default)]
    pub factors: Vec<SpatialFactor>,
    #[serde(default)]
    pub metrics: BTreeMap<Dimension, f64>,
}

/// Result of one cycle. Zones borrow the input's factors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutput<'a> {
    /// 1-based cycle counter of the engine.
    pub cycle: u64,
    pub cycle_time: DateTime<Utc>,
    pub zones: Vec<ConfluenceZone<'a>>,
    pub regimes: BTreeMap<Dimension, RegimeState>,
    pub unified: UnifiedSignal,
    pub assessment: ConditionAssessment,
    /// Dimensions whose metric was rejected; their state was retained.
    pub rejected_metrics: Vec<Dimension>,
}

/// Engine for one `(symbol, timeframe)` context.
#[derive(Debug)]
pub struct FusionEngine {
    config: EngineConfig,
    tracker: RegimeTracker,
    clusterer: FactorClusterer,
    fusion: SignalFusion,
    classifier: MarketConditionClassifier,
    cycles: u64,
}

impl FusionEngine {
    pub fn new(config: EngineConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self {
            tracker: RegimeTracker::new(config.regime.clone())?,
            clusterer: FactorClusterer::new(config.clustering.clone())?,
            fusion: SignalFusion::new(config.fusion.clone())?,
            classifier: MarketConditionClassifier::new(config.classifier.clone())?,
            config,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &RegimeTracker {
        &self.tracker
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Stop tracking a dimension.
    pub fn remove_dimension(&mut self, dimension: Dimension) -> Option<RegimeState> {
        self.tracker.remove(dimension)
    }

    /// Evaluate one cycle.
    ///
    /// Rejected metrics do not fail the cycle; they are listed in the output.
    pub fn evaluate<'a>(&mut self, input: &'a CycleInput) -> FusionResult<CycleOutput<'a>> {
        if input.reference_price <= Decimal::ZERO {
            return Err(FusionError::InvalidInput(format!(
                "reference price must be positive, got {}",
                input.reference_price
            )));
        }

        let zones = self.clusterer.cluster_default(&input.factors);

        let mut rejected_metrics = Vec::new();
        let mut observed = BTreeSet::new();
        for (dimension, value) in &input.metrics {
            match self.tracker.update(*dimension, *value, input.cycle_time) {
                Ok(_) => {
                    observed.insert(*dimension);
                }
                Err(e) => {
                    warn!(%dimension, error = %e, "Metric rejected, regime retained");
                    rejected_metrics.push(*dimension);
                }
            }
        }
        self.tracker.clear_stale_warnings(&observed);

        let unified = if self.config.source_weights.is_empty() {
            self.fusion.fuse(&input.components)
        } else {
            let weighted: Vec<SignalComponent> = input
                .components
                .iter()
                .map(|c| match self.config.source_weights.get(&c.source) {
                    Some(weight) => c.clone().with_weight(*weight),
                    None => c.clone(),
                })
                .collect();
            self.fusion.fuse(&weighted)
        };

        let regimes = self.tracker.snapshot();
        let assessment =
            self.classifier
                .classify(&regimes, &unified, &zones, input.reference_price);

        self.cycles += 1;
        debug!(
            cycle = self.cycles,
            zones = zones.len(),
            dimensions = regimes.len(),
            condition = ?assessment.condition,
            "Cycle evaluated"
        );

        Ok(CycleOutput {
            cycle: self.cycles,
            cycle_time: input.cycle_time,
            zones,
            regimes,
            unified,
            assessment,
            rejected_metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Direction, FactorKind};
    use crate::fusion::Consensus;
    use crate::regime::{MarketCondition, RegimeLabel};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t(cycle: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 13, 0, 0).unwrap() + Duration::hours(cycle)
    }

    fn input(cycle: i64, metrics: &[(Dimension, f64)]) -> CycleInput {
        CycleInput {
            cycle_time: t(cycle),
            reference_price: dec!(250),
            components: vec![
                SignalComponent::new(SignalSource::Trend, Direction::Bullish, 0.8, 0.9, 1.0, t(cycle))
                    .unwrap(),
                SignalComponent::new(SignalSource::Momentum, Direction::Bullish, 0.7, 0.8, 1.0, t(cycle))
                    .unwrap(),
            ],
            factors: vec![
                SpatialFactor::new(FactorKind::Level, dec!(245), 0.7, 1.0, t(cycle)).unwrap(),
                SpatialFactor::new(FactorKind::MovingAverage, dec!(245.4), 0.6, 1.0, t(cycle))
                    .unwrap(),
            ],
            metrics: metrics.iter().copied().collect(),
        }
    }

    #[test]
    fn test_engine_rejects_bad_config() {
        let mut config = EngineConfig::default();
        config.regime.default.band.exit_high = 0.9;
        assert!(matches!(
            FusionEngine::new(config),
            Err(FusionError::InvalidConfiguration(_))
        ));

        let mut config = EngineConfig::default();
        config.source_weights.insert(SignalSource::Pattern, -1.0);
        assert!(FusionEngine::new(config).is_err());
    }

    #[test]
    fn test_cycle_flow() {
        let mut engine = FusionEngine::new(EngineConfig::default()).unwrap();

        let first = input(0, &[(Dimension::Trend, 0.5), (Dimension::Volatility, 0.5)]);
        let out = engine.evaluate(&first).unwrap();
        assert_eq!(out.cycle, 1);
        assert_eq!(out.zones.len(), 1);
        assert_eq!(out.unified.consensus, Consensus::StrongAgreement);
        assert_eq!(out.assessment.condition, MarketCondition::Mixed);
        assert!(out.assessment.nearest_support.is_some());

        let second = input(1, &[(Dimension::Trend, 0.9), (Dimension::Volatility, 0.5)]);
        let out = engine.evaluate(&second).unwrap();
        assert_eq!(out.regimes[&Dimension::Trend].label, RegimeLabel::High);
        assert_eq!(out.assessment.condition, MarketCondition::Trending);
        assert_eq!(engine.cycles(), 2);
    }

    #[test]
    fn test_rejected_metric_keeps_cycle_running() {
        let mut engine = FusionEngine::new(EngineConfig::default()).unwrap();
        let first = input(0, &[(Dimension::Volatility, 0.5)]);
        engine.evaluate(&first).unwrap();

        let second = input(1, &[(Dimension::Volatility, f64::NAN)]);
        let out = engine.evaluate(&second).unwrap();
        assert_eq!(out.rejected_metrics, vec![Dimension::Volatility]);
        assert_eq!(out.regimes[&Dimension::Volatility].observations, 1);
    }

    #[test]
    fn test_source_weights_override() {
        let mut config = EngineConfig::default();
        config.source_weights.insert(SignalSource::Trend, 0.0);
        config.source_weights.insert(SignalSource::Momentum, 0.0);
        let mut engine = FusionEngine::new(config).unwrap();

        let cycle = input(0, &[(Dimension::Trend, 0.5)]);
        let out = engine.evaluate(&cycle).unwrap();
        assert_eq!(out.unified.consensus, Consensus::Unknown);
        assert_eq!(out.unified.ignored, 2);
        assert_eq!(out.assessment.condition, MarketCondition::Indeterminate);
    }

    #[test]
    fn test_warning_expires_when_dimension_not_reported() {
        let mut config = EngineConfig::default();
        config.regime.default.momentum_window = 3;
        let mut engine = FusionEngine::new(config).unwrap();

        let mut last = None;
        for (i, trend) in [0.5, 0.9, 0.95, 0.75].iter().enumerate() {
            let cycle = input(i as i64, &[(Dimension::Trend, *trend), (Dimension::Volatility, 0.5)]);
            last = Some(engine.evaluate(&cycle).unwrap().assessment);
        }
        let warned = last.unwrap();
        assert_eq!(warned.early_warnings, vec![Dimension::Trend]);
        assert_eq!(warned.condition, MarketCondition::Transitional);

        let quiet = input(4, &[(Dimension::Volatility, 0.5)]);
        let out = engine.evaluate(&quiet).unwrap();
        assert_eq!(out.regimes[&Dimension::Trend].label, RegimeLabel::High);
        assert!(!out.regimes[&Dimension::Trend].pending_change);
        assert!(out.assessment.early_warnings.is_empty());
        assert_eq!(out.assessment.condition, MarketCondition::Trending);
    }

    #[test]
    fn test_invalid_reference_price() {
        let mut engine = FusionEngine::new(EngineConfig::default()).unwrap();
        let mut bad = input(0, &[]);
        bad.reference_price = dec!(0);
        assert!(matches!(engine.evaluate(&bad), Err(FusionError::InvalidInput(_))));
        assert_eq!(engine.cycles(), 0);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let mut config = EngineConfig::default();
        config.source_weights.insert(SignalSource::Sentiment, 0.5);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let sparse: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(sparse, EngineConfig::default());
    }
}
