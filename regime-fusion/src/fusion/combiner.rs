//! Weighted fusion of directional signal components.
//!
//! Each usable component contributes `direction × strength` weighted by
//! `weight × confidence`. The result carries the bias, a blended
//! confidence, the consensus class and the mass behind each direction so
//! the decision can be audited after the fact.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{Direction, SignalComponent, SignalSource};
use crate::error::{FusionError, FusionResult};

/// Degree of directional agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consensus {
    StrongAgreement,
    WeakAgreement,
    Conflicted,
    /// No effective weight this cycle.
    Unknown,
}

impl Consensus {
    pub fn description(&self) -> &'static str {
        match self {
            Self::StrongAgreement => "Sources strongly agree",
            Self::WeakAgreement => "Sources lean the same way",
            Self::Conflicted => "Sources disagree",
            Self::Unknown => "No weighted sources",
        }
    }
}

/// Fusion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Share of confidence taken from mean component confidence.
    pub confidence_weight: f64,
    /// Share of confidence taken from the agreement ratio.
    pub agreement_weight: f64,
    /// `|bias|` above this can qualify as strong agreement.
    pub strong_bias: f64,
    /// Conflict below this can qualify as strong agreement.
    pub strong_max_conflict: f64,
    /// Conflict above this is conflicted.
    pub conflicted_min: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.6,
            agreement_weight: 0.4,
            strong_bias: 0.5,
            strong_max_conflict: 0.3,
            conflicted_min: 0.5,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> FusionResult<()> {
        let unit = [
            ("confidence_weight", self.confidence_weight),
            ("agreement_weight", self.agreement_weight),
            ("strong_bias", self.strong_bias),
            ("strong_max_conflict", self.strong_max_conflict),
            ("conflicted_min", self.conflicted_min),
        ];
        for (name, value) in unit {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(FusionError::InvalidConfiguration(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if ((self.confidence_weight + self.agreement_weight) - 1.0).abs() > 1e-9 {
            return Err(FusionError::InvalidConfiguration(format!(
                "confidence_weight + agreement_weight must equal 1, got {}",
                self.confidence_weight + self.agreement_weight
            )));
        }
        if self.strong_max_conflict > self.conflicted_min {
            return Err(FusionError::InvalidConfiguration(
                "strong_max_conflict must not exceed conflicted_min".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fused result of one cycle. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSignal {
    /// Weighted bias in [-1, 1].
    pub bias: f64,
    /// Blended confidence in [0, 1].
    pub confidence: f64,
    pub consensus: Consensus,
    /// Component with the highest `strength × confidence × weight`.
    pub dominant_source: Option<SignalSource>,
    pub dominant_score: f64,
    /// Weighted fraction agreeing with the sign of the bias.
    pub agreement_ratio: f64,
    /// `1 - agreement_ratio`.
    pub conflict_score: f64,
    /// Effective mass (`weight × confidence`) per direction.
    pub bullish_mass: f64,
    pub bearish_mass: f64,
    pub neutral_mass: f64,
    /// Components that carried weight.
    pub contributing: usize,
    /// Inactive, invalid or weightless components.
    pub ignored: usize,
}

impl UnifiedSignal {
    /// Zero-confidence result for a cycle without weighted input.
    pub fn empty(ignored: usize) -> Self {
        Self {
            bias: 0.0,
            confidence: 0.0,
            consensus: Consensus::Unknown,
            dominant_source: None,
            dominant_score: 0.0,
            agreement_ratio: 0.0,
            conflict_score: 0.0,
            bullish_mass: 0.0,
            bearish_mass: 0.0,
            neutral_mass: 0.0,
            contributing: 0,
            ignored,
        }
    }

    pub fn has_weight(&self) -> bool {
        self.consensus != Consensus::Unknown
    }

    pub fn direction(&self, neutral_band: f64) -> Direction {
        Direction::from_bias(self.bias, neutral_band)
    }

    pub fn total_mass(&self) -> f64 {
        self.bullish_mass + self.bearish_mass + self.neutral_mass
    }
}

/// Stateless combiner.
#[derive(Debug, Clone)]
pub struct SignalFusion {
    config: FusionConfig,
}

impl SignalFusion {
    pub fn new(config: FusionConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse a component set. Empty or weightless input yields
    /// [`UnifiedSignal::empty`], never an error.
    pub fn fuse(&self, components: &[SignalComponent]) -> UnifiedSignal {
        let mut usable = Vec::with_capacity(components.len());
        for component in components {
            if let Err(e) = component.validate() {
                warn!(source = %component.source, error = %e, "Ignoring invalid component");
                continue;
            }
            if component.is_usable() {
                usable.push(component);
            }
        }
        let ignored = components.len() - usable.len();

        let total_mass: f64 = usable.iter().map(|c| c.effective_weight()).sum();
        if usable.is_empty() || total_mass <= 0.0 {
            debug!(components = components.len(), "No weighted components");
            return UnifiedSignal::empty(ignored);
        }

        let weighted_bias: f64 = usable
            .iter()
            .map(|c| c.signed_strength() * c.effective_weight())
            .sum();
        let bias = (weighted_bias / total_mass).clamp(-1.0, 1.0);

        let mut bullish_mass = 0.0;
        let mut bearish_mass = 0.0;
        let mut neutral_mass = 0.0;
        for c in &usable {
            match c.direction {
                Direction::Bullish => bullish_mass += c.effective_weight(),
                Direction::Bearish => bearish_mass += c.effective_weight(),
                Direction::Neutral => neutral_mass += c.effective_weight(),
            }
        }

        // A zero bias has no sign; fall back to the heaviest direction.
        let majority = match Direction::from_bias(bias, 0.0) {
            Direction::Neutral => majority_by_mass(bullish_mass, bearish_mass, neutral_mass),
            direction => direction,
        };
        let agreeing_mass = match majority {
            Direction::Bullish => bullish_mass,
            Direction::Bearish => bearish_mass,
            Direction::Neutral => neutral_mass,
        };
        let agreement_ratio = (agreeing_mass / total_mass).clamp(0.0, 1.0);
        let conflict_score = 1.0 - agreement_ratio;

        let mean_confidence =
            usable.iter().map(|c| c.confidence).sum::<f64>() / usable.len() as f64;
        let confidence = (mean_confidence * self.config.confidence_weight
            + agreement_ratio * self.config.agreement_weight)
            .clamp(0.0, 1.0);

        let consensus = if bias.abs() > self.config.strong_bias
            && conflict_score < self.config.strong_max_conflict
        {
            Consensus::StrongAgreement
        } else if conflict_score > self.config.conflicted_min {
            Consensus::Conflicted
        } else {
            Consensus::WeakAgreement
        };

        let mut dominant: Option<&SignalComponent> = None;
        for &c in &usable {
            if dominant.map_or(true, |d| c.score() > d.score()) {
                dominant = Some(c);
            }
        }

        debug!(
            bias = %format!("{:.3}", bias),
            confidence = %format!("{:.3}", confidence),
            consensus = ?consensus,
            contributing = usable.len(),
            ignored,
            "Fused signal"
        );

        UnifiedSignal {
            bias,
            confidence,
            consensus,
            dominant_source: dominant.map(|d| d.source),
            dominant_score: dominant.map_or(0.0, |d| d.score()),
            agreement_ratio,
            conflict_score,
            bullish_mass,
            bearish_mass,
            neutral_mass,
            contributing: usable.len(),
            ignored,
        }
    }

    /// Like [`fuse`](Self::fuse) but reports weightless input as `ZeroWeightMass`.
    pub fn try_fuse(&self, components: &[SignalComponent]) -> FusionResult<UnifiedSignal> {
        let signal = self.fuse(components);
        if signal.has_weight() {
            Ok(signal)
        } else {
            Err(FusionError::ZeroWeightMass {
                components: components.len(),
            })
        }
    }
}

/// Direction carrying strictly the most mass. Ties resolve to `Neutral`.
fn majority_by_mass(bullish: f64, bearish: f64, neutral: f64) -> Direction {
    let masses = [
        (Direction::Bullish, bullish),
        (Direction::Bearish, bearish),
        (Direction::Neutral, neutral),
    ];
    let top = masses.iter().fold(0.0_f64, |acc, (_, m)| acc.max(*m));
    let mut leaders = masses.iter().filter(|(_, m)| *m == top);
    match (leaders.next(), leaders.next()) {
        (Some((direction, _)), None) => *direction,
        _ => Direction::Neutral,
    }
}

impl Default for SignalFusion {
    fn default() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }
}
