//! Market condition classifier.
//!
//! Combines the tracked regimes, the fused signal and the confluence
//! zones of one cycle into a qualitative condition and a trading stance.
//! A small decision table, evaluated most conservative rule first.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confluence::{nearest_resistance, nearest_support, ConfluenceZone};
use crate::data::Dimension;
use crate::error::{FusionError, FusionResult};
use crate::fusion::{Consensus, UnifiedSignal};

use super::tracker::{RegimeLabel, RegimeState};

/// Qualitative market condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    /// Strong trend confirmed by the fused bias.
    Trending,
    /// Volatile or turning; directional calls are unsafe.
    Transitional,
    /// Quiet regimes and no directional conviction.
    Ranging,
    /// No rule fired decisively.
    Mixed,
    /// Not enough data to classify.
    Indeterminate,
}

impl MarketCondition {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Trending => "Trending market",
            Self::Transitional => "Volatile or transitional market",
            Self::Ranging => "Range-bound market",
            Self::Mixed => "Mixed conditions",
            Self::Indeterminate => "Insufficient data",
        }
    }
}

/// Recommended stance for the strategy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStance {
    FavorLong,
    FavorShort,
    /// Fade the edges of the range.
    RangeTrade,
    ReduceExposure,
    StandAside,
}

impl TradingStance {
    /// Whether new positions are allowed at all.
    pub fn allows_new_positions(&self) -> bool {
        !matches!(self, Self::ReduceExposure | Self::StandAside)
    }

    /// Suggested position size multiplier.
    pub fn position_size_multiplier(&self) -> f64 {
        match self {
            Self::FavorLong | Self::FavorShort => 1.0,
            Self::RangeTrade => 0.5,
            Self::ReduceExposure => 0.25,
            Self::StandAside => 0.0,
        }
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Dimension holding signed trend strength.
    pub trend_dimension: Dimension,
    /// Dimension holding volatility level.
    pub volatility_dimension: Dimension,
    /// `|bias|` below this counts as directionless.
    pub ranging_max_bias: f64,
    /// Early warning on the trend dimension downgrades Trending to Transitional.
    pub warning_blocks_trend: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            trend_dimension: Dimension::Trend,
            volatility_dimension: Dimension::Volatility,
            ranging_max_bias: 0.2,
            warning_blocks_trend: true,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> FusionResult<()> {
        if self.trend_dimension == self.volatility_dimension {
            return Err(FusionError::InvalidConfiguration(
                "trend and volatility dimensions must differ".to_string(),
            ));
        }
        if !self.ranging_max_bias.is_finite() || !(0.0..=1.0).contains(&self.ranging_max_bias) {
            return Err(FusionError::InvalidConfiguration(format!(
                "ranging_max_bias must be in [0, 1], got {}",
                self.ranging_max_bias
            )));
        }
        Ok(())
    }
}

/// Owned summary of a zone, detached from the cycle's factor set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub center: Decimal,
    pub lower: Decimal,
    pub upper: Decimal,
    pub aggregate_strength: f64,
    pub confidence: f64,
    pub members: usize,
}

impl ZoneSummary {
    fn from_zone(zone: &ConfluenceZone<'_>) -> Self {
        Self {
            center: zone.center,
            lower: zone.lower,
            upper: zone.upper,
            aggregate_strength: zone.aggregate_strength,
            confidence: zone.confidence,
            members: zone.member_count(),
        }
    }
}

/// Output of one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionAssessment {
    pub condition: MarketCondition,
    pub stance: TradingStance,
    pub bias: f64,
    pub confidence: f64,
    pub consensus: Consensus,
    /// Dimensions whose momentum runs against their label.
    pub early_warnings: Vec<Dimension>,
    pub nearest_support: Option<ZoneSummary>,
    pub nearest_resistance: Option<ZoneSummary>,
    /// Reference price sits inside a zone.
    pub inside_zone: bool,
    pub reasons: Vec<String>,
}

/// Decision table over regimes, fused signal and zones.
#[derive(Debug, Clone)]
pub struct MarketConditionClassifier {
    config: ClassifierConfig,
}

impl MarketConditionClassifier {
    pub fn new(config: ClassifierConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(
        &self,
        regimes: &BTreeMap<Dimension, RegimeState>,
        unified: &UnifiedSignal,
        zones: &[ConfluenceZone<'_>],
        reference_price: Decimal,
    ) -> ConditionAssessment {
        let mut reasons = Vec::new();

        let early_warnings: Vec<Dimension> = regimes
            .values()
            .filter(|s| s.is_established() && s.pending_change)
            .map(|s| s.dimension)
            .collect();

        let label_of = |dimension: Dimension| {
            regimes
                .get(&dimension)
                .map(|s| s.label)
                .unwrap_or(RegimeLabel::Unknown)
        };
        let trend = label_of(self.config.trend_dimension);
        let volatility = label_of(self.config.volatility_dimension);
        let trend_warning = self.config.warning_blocks_trend
            && early_warnings.contains(&self.config.trend_dimension);

        let any_established = regimes.values().any(|s| s.is_established());
        let trend_agrees = match trend {
            RegimeLabel::High => unified.bias > 0.0,
            RegimeLabel::Low => unified.bias < 0.0,
            RegimeLabel::Normal | RegimeLabel::Unknown => false,
        };
        let all_normal =
            !regimes.is_empty() && regimes.values().all(|s| s.label == RegimeLabel::Normal);

        let condition = if !any_established {
            reasons.push("no established regime".to_string());
            MarketCondition::Indeterminate
        } else if !unified.has_weight() {
            reasons.push("no weighted signal components".to_string());
            MarketCondition::Indeterminate
        } else if volatility == RegimeLabel::High && unified.consensus == Consensus::Conflicted {
            reasons.push(format!(
                "{} high with conflicted signals (conflict {:.2})",
                self.config.volatility_dimension, unified.conflict_score
            ));
            MarketCondition::Transitional
        } else if trend_agrees && trend_warning {
            reasons.push(format!(
                "{} {:?} agrees with bias {:.2} but momentum is turning",
                self.config.trend_dimension, trend, unified.bias
            ));
            MarketCondition::Transitional
        } else if trend_agrees {
            reasons.push(format!(
                "{} {:?} confirmed by bias {:.2}",
                self.config.trend_dimension, trend, unified.bias
            ));
            MarketCondition::Trending
        } else if all_normal && unified.bias.abs() < self.config.ranging_max_bias {
            reasons.push(format!(
                "all regimes normal, |bias| {:.2} < {:.2}",
                unified.bias.abs(),
                self.config.ranging_max_bias
            ));
            MarketCondition::Ranging
        } else {
            reasons.push("no rule matched decisively".to_string());
            MarketCondition::Mixed
        };

        let stance = match condition {
            MarketCondition::Trending if unified.bias > 0.0 => TradingStance::FavorLong,
            MarketCondition::Trending => TradingStance::FavorShort,
            MarketCondition::Ranging => TradingStance::RangeTrade,
            MarketCondition::Transitional => TradingStance::ReduceExposure,
            MarketCondition::Mixed | MarketCondition::Indeterminate => TradingStance::StandAside,
        };

        for dimension in &early_warnings {
            reasons.push(format!("{} momentum diverging from label", dimension));
        }

        let confidence = match condition {
            MarketCondition::Indeterminate => 0.0,
            _ => unified.confidence,
        };

        debug!(
            condition = ?condition,
            stance = ?stance,
            bias = %format!("{:.3}", unified.bias),
            warnings = early_warnings.len(),
            "Classified market condition"
        );

        ConditionAssessment {
            condition,
            stance,
            bias: unified.bias,
            confidence,
            consensus: unified.consensus,
            early_warnings,
            nearest_support: nearest_support(zones, reference_price).map(ZoneSummary::from_zone),
            nearest_resistance: nearest_resistance(zones, reference_price)
                .map(ZoneSummary::from_zone),
            inside_zone: zones.iter().any(|z| z.contains(reference_price)),
            reasons,
        }
    }
}

impl Default for MarketConditionClassifier {
    fn default() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }
}
