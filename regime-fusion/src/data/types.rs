//! Core input types for the fusion core.
//!
//! Upstream producers (indicator engines, level detectors, pattern
//! recognisers) emit these records fresh every evaluation cycle. Nothing
//! here is mutated in place between cycles.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};

/// Directional opinion of a signal component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    /// Sign used when folding a direction into a bias.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Direction of a bias, treating `|bias| <= neutral_band` as neutral.
    pub fn from_bias(bias: f64, neutral_band: f64) -> Self {
        if bias > neutral_band {
            Self::Bullish
        } else if bias < -neutral_band {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        }
    }
}

/// Producer of a signal component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Trend,
    Momentum,
    Volatility,
    Volume,
    Sentiment,
    Correlation,
    Pattern,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Momentum => "momentum",
            Self::Volatility => "volatility",
            Self::Volume => "volume",
            Self::Sentiment => "sentiment",
            Self::Correlation => "correlation",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of price-anchored observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    /// Fitted trend line projected to the current bar.
    TrendLine,
    /// Horizontal support/resistance level.
    Level,
    /// Measured-move target of a chart pattern.
    PatternTarget,
    /// Classic floor-trader pivot.
    Pivot,
    /// Fibonacci retracement or extension.
    Fibonacci,
    /// Moving average value.
    MovingAverage,
    /// High-volume node of a volume profile.
    VolumeNode,
}

impl FactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrendLine => "trend_line",
            Self::Level => "level",
            Self::PatternTarget => "pattern_target",
            Self::Pivot => "pivot",
            Self::Fibonacci => "fibonacci",
            Self::MovingAverage => "moving_average",
            Self::VolumeNode => "volume_node",
        }
    }
}

/// Monitored regime dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Volatility level (e.g. normalised ATR or realised vol).
    Volatility,
    /// Signed trend strength: positive for up-trends.
    Trend,
    Sentiment,
    Correlation,
    Liquidity,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volatility => "volatility",
            Self::Trend => "trend",
            Self::Sentiment => "sentiment",
            Self::Correlation => "correlation",
            Self::Liquidity => "liquidity",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_unit(name: &str, value: f64) -> FusionResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FusionError::InvalidInput(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )))
    }
}

fn check_weight(value: f64) -> FusionResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidInput(format!(
            "weight must be finite and >= 0, got {}",
            value
        )))
    }
}

/// One directional opinion from one upstream producer.
///
/// Lifetime is one evaluation cycle: each cycle rebuilds the component
/// set from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalComponent {
    /// Producing collaborator.
    pub source: SignalSource,
    /// Direction of the opinion.
    pub direction: Direction,
    /// Magnitude in [0, 1].
    pub strength: f64,
    /// Producer's self-reported reliability in [0, 1].
    pub confidence: f64,
    /// Engine-configured importance, >= 0.
    pub weight: f64,
    /// Cycle time the component was produced.
    pub timestamp: DateTime<Utc>,
    /// Whether the component is valid this cycle.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl SignalComponent {
    /// Build an active component, rejecting out-of-range fields.
    pub fn new(
        source: SignalSource,
        direction: Direction,
        strength: f64,
        confidence: f64,
        weight: f64,
        timestamp: DateTime<Utc>,
    ) -> FusionResult<Self> {
        let component = Self {
            source,
            direction,
            strength,
            confidence,
            weight,
            timestamp,
            active: true,
        };
        component.validate()?;
        Ok(component)
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Check the range invariants.
    ///
    /// Fields are public so deserialized records bypass `new`; fusion
    /// calls this again before using a component.
    pub fn validate(&self) -> FusionResult<()> {
        check_unit("strength", self.strength)?;
        check_unit("confidence", self.confidence)?;
        check_weight(self.weight)
    }

    /// `direction × strength`, in [-1, 1].
    pub fn signed_strength(&self) -> f64 {
        self.direction.sign() * self.strength
    }

    /// Weight used when averaging: `weight × confidence`.
    pub fn effective_weight(&self) -> f64 {
        self.weight * self.confidence
    }

    /// Ranking score for the dominant source: `strength × confidence × weight`.
    pub fn score(&self) -> f64 {
        self.strength * self.confidence * self.weight
    }

    /// Active, in range, and carrying non-zero effective weight.
    pub fn is_usable(&self) -> bool {
        self.active && self.validate().is_ok() && self.effective_weight() > 0.0
    }
}

/// One observation anchored to a price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFactor {
    pub kind: FactorKind,
    /// Anchor price.
    pub price: Decimal,
    /// Strength in [0, 1].
    pub strength: f64,
    /// Importance, >= 0.
    pub weight: f64,
    pub observed_at: DateTime<Utc>,
}

impl SpatialFactor {
    pub fn new(
        kind: FactorKind,
        price: Decimal,
        strength: f64,
        weight: f64,
        observed_at: DateTime<Utc>,
    ) -> FusionResult<Self> {
        let factor = Self {
            kind,
            price,
            strength,
            weight,
            observed_at,
        };
        factor.validate()?;
        Ok(factor)
    }

    pub fn validate(&self) -> FusionResult<()> {
        if self.price <= Decimal::ZERO {
            return Err(FusionError::InvalidInput(format!(
                "factor price must be positive, got {}",
                self.price
            )));
        }
        check_unit("strength", self.strength)?;
        check_weight(self.weight)
    }

    /// Centroid weight: `strength × weight`.
    pub fn mass(&self) -> f64 {
        self.strength * self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Bullish.sign(), 1.0);
        assert_eq!(Direction::Bearish.sign(), -1.0);
        assert_eq!(Direction::Neutral.sign(), 0.0);
    }

    #[test]
    fn test_direction_from_bias() {
        assert_eq!(Direction::from_bias(0.3, 0.1), Direction::Bullish);
        assert_eq!(Direction::from_bias(-0.3, 0.1), Direction::Bearish);
        assert_eq!(Direction::from_bias(0.05, 0.1), Direction::Neutral);
    }

    #[test]
    fn test_component_rejects_out_of_range() {
        let err = SignalComponent::new(
            SignalSource::Trend,
            Direction::Bullish,
            1.2,
            0.5,
            1.0,
            ts(),
        );
        assert!(matches!(err, Err(FusionError::InvalidInput(_))));

        let err = SignalComponent::new(
            SignalSource::Trend,
            Direction::Bullish,
            0.5,
            f64::NAN,
            1.0,
            ts(),
        );
        assert!(err.is_err());

        let err = SignalComponent::new(
            SignalSource::Trend,
            Direction::Bullish,
            0.5,
            0.5,
            -1.0,
            ts(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_component_usability() {
        let c = SignalComponent::new(
            SignalSource::Momentum,
            Direction::Bearish,
            0.4,
            0.5,
            2.0,
            ts(),
        )
        .unwrap();
        assert!(c.is_usable());
        assert_eq!(c.effective_weight(), 1.0);
        assert_eq!(c.signed_strength(), -0.4);

        assert!(!c.clone().with_weight(0.0).is_usable());
        assert!(!c.with_active(false).is_usable());
    }

    #[test]
    fn test_factor_validation() {
        assert!(SpatialFactor::new(FactorKind::Level, dec!(100), 0.5, 1.0, ts()).is_ok());
        assert!(SpatialFactor::new(FactorKind::Level, dec!(0), 0.5, 1.0, ts()).is_err());
        assert!(SpatialFactor::new(FactorKind::Level, dec!(100), 1.5, 1.0, ts()).is_err());
    }

    #[test]
    fn test_component_deserialize_defaults_active() {
        let json = r#"{
            "source": "sentiment",
            "direction": "neutral",
            "strength": 0.2,
            "confidence": 0.9,
            "weight": 1.0,
            "timestamp": "2024-03-01T14:30:00Z"
        }"#;
        let c: SignalComponent = serde_json::from_str(json).unwrap();
        assert!(c.active);
        assert_eq!(c.source, SignalSource::Sentiment);
    }
}
