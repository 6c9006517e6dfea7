//! Hysteresis-stabilised regime tracking.
//!
//! One state machine per monitored dimension. Each dimension's state is
//! owned by the tracker behind a [`RegimeHandle`] and mutated only through
//! [`RegimeTracker::update`]. There is no global or shared regime state.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{Dimension, Direction};
use crate::error::{FusionError, FusionResult};

/// Asymmetric enter/exit thresholds for the High and Low edges.
///
/// Must satisfy `enter_low < exit_low <= exit_high < enter_high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisBand {
    /// Metric above this moves Normal to High.
    pub enter_high: f64,
    /// Metric below this moves High back to Normal.
    pub exit_high: f64,
    /// Metric below this moves Normal to Low.
    pub enter_low: f64,
    /// Metric above this moves Low back to Normal.
    pub exit_low: f64,
}

impl Default for HysteresisBand {
    fn default() -> Self {
        Self {
            enter_high: 0.8,
            exit_high: 0.6,
            enter_low: 0.2,
            exit_low: 0.4,
        }
    }
}

impl HysteresisBand {
    pub fn new(enter_high: f64, exit_high: f64, enter_low: f64, exit_low: f64) -> FusionResult<Self> {
        let band = Self {
            enter_high,
            exit_high,
            enter_low,
            exit_low,
        };
        band.validate()?;
        Ok(band)
    }

    pub fn validate(&self) -> FusionResult<()> {
        let values = [self.enter_high, self.exit_high, self.enter_low, self.exit_low];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::InvalidConfiguration(
                "hysteresis thresholds must be finite".to_string(),
            ));
        }
        if self.exit_high >= self.enter_high {
            return Err(FusionError::InvalidConfiguration(format!(
                "exit_high ({}) must be below enter_high ({})",
                self.exit_high, self.enter_high
            )));
        }
        if self.exit_low <= self.enter_low {
            return Err(FusionError::InvalidConfiguration(format!(
                "exit_low ({}) must be above enter_low ({})",
                self.exit_low, self.enter_low
            )));
        }
        if self.exit_low > self.exit_high {
            return Err(FusionError::InvalidConfiguration(format!(
                "low band (exit_low {}) overlaps high band (exit_high {})",
                self.exit_low, self.exit_high
            )));
        }
        Ok(())
    }
}

/// Per-dimension tracking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Threshold band.
    #[serde(default)]
    pub band: HysteresisBand,
    /// Observations required before a label is reported.
    pub min_observations: usize,
    /// Number of recent values used for the momentum early warning.
    pub momentum_window: usize,
    /// Window delta that raises `pending_change`.
    pub momentum_threshold: f64,
    /// Consecutive qualifying observations to enter High or Low.
    pub enter_confirmations: u32,
    /// Consecutive qualifying observations to fall back to Normal.
    pub exit_confirmations: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            band: HysteresisBand::default(),
            min_observations: 1,
            momentum_window: 5,
            momentum_threshold: 0.1,
            enter_confirmations: 1,
            exit_confirmations: 2,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> FusionResult<()> {
        self.band.validate()?;
        if self.min_observations == 0 {
            return Err(FusionError::InvalidConfiguration(
                "min_observations must be at least 1".to_string(),
            ));
        }
        if self.momentum_window < 2 {
            return Err(FusionError::InvalidConfiguration(
                "momentum_window must be at least 2".to_string(),
            ));
        }
        if !self.momentum_threshold.is_finite() || self.momentum_threshold <= 0.0 {
            return Err(FusionError::InvalidConfiguration(format!(
                "momentum_threshold must be positive, got {}",
                self.momentum_threshold
            )));
        }
        if self.enter_confirmations == 0 || self.exit_confirmations == 0 {
            return Err(FusionError::InvalidConfiguration(
                "confirmation counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tracker configuration: a default plus per-dimension overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeTrackerConfig {
    #[serde(default)]
    pub default: RegimeConfig,
    #[serde(default)]
    pub overrides: HashMap<Dimension, RegimeConfig>,
}

impl RegimeTrackerConfig {
    pub fn for_dimension(&self, dimension: Dimension) -> &RegimeConfig {
        self.overrides.get(&dimension).unwrap_or(&self.default)
    }

    pub fn with_override(mut self, dimension: Dimension, config: RegimeConfig) -> Self {
        self.overrides.insert(dimension, config);
        self
    }

    pub fn validate(&self) -> FusionResult<()> {
        self.default.validate()?;
        for (dimension, config) in &self.overrides {
            config.validate().map_err(|e| match e {
                FusionError::InvalidConfiguration(msg) => {
                    FusionError::InvalidConfiguration(format!("{}: {}", dimension, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Discrete classification of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    /// Fewer observations than the configured minimum.
    Unknown,
    Low,
    Normal,
    High,
}

impl RegimeLabel {
    pub fn is_established(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Direction implied by a signed dimension (e.g. trend).
    pub fn polarity(&self) -> Direction {
        match self {
            Self::High => Direction::Bullish,
            Self::Low => Direction::Bearish,
            Self::Normal | Self::Unknown => Direction::Neutral,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Unknown => "Insufficient data",
            Self::Low => "Below lower band",
            Self::Normal => "Within normal band",
            Self::High => "Above upper band",
        }
    }
}

/// Cross-cycle state of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub dimension: Dimension,
    pub label: RegimeLabel,
    pub thresholds: HysteresisBand,
    /// Cycle time the current label began.
    pub started_at: Option<DateTime<Utc>>,
    /// Cycles the current label has held (0 on the transition cycle).
    pub duration_cycles: u64,
    /// Streaming mean of the metric while in the current label.
    pub running_mean: f64,
    /// Momentum early warning, recomputed every cycle.
    pub pending_change: bool,
    /// Total accepted observations.
    pub observations: u64,
    pub last_value: Option<f64>,
}

impl RegimeState {
    fn empty(dimension: Dimension, thresholds: HysteresisBand) -> Self {
        Self {
            dimension,
            label: RegimeLabel::Unknown,
            thresholds,
            started_at: None,
            duration_cycles: 0,
            running_mean: 0.0,
            pending_change: false,
            observations: 0,
            last_value: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.label.is_established()
    }
}

/// Incremental per-dimension statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeStats {
    pub dimension: Dimension,
    pub observations: u64,
    pub transitions: u64,
    pub rejected: u64,
    pub cycles_by_label: BTreeMap<RegimeLabel, u64>,
}

impl RegimeStats {
    fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            observations: 0,
            transitions: 0,
            rejected: 0,
            cycles_by_label: BTreeMap::new(),
        }
    }

    /// Share of observations spent in `label`, in percent.
    pub fn pct_in(&self, label: RegimeLabel) -> f64 {
        if self.observations == 0 {
            return 0.0;
        }
        let cycles = self.cycles_by_label.get(&label).copied().unwrap_or(0);
        cycles as f64 / self.observations as f64 * 100.0
    }
}

/// Opaque handle to one dimension's slot in the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegimeHandle(usize);

#[derive(Debug)]
struct DimensionSlot {
    config: RegimeConfig,
    state: RegimeState,
    window: VecDeque<f64>,
    samples_in_label: u64,
    candidate: Option<(RegimeLabel, u32)>,
    stats: RegimeStats,
}

impl DimensionSlot {
    fn new(dimension: Dimension, config: RegimeConfig) -> Self {
        let state = RegimeState::empty(dimension, config.band);
        let window = VecDeque::with_capacity(config.momentum_window);
        Self {
            config,
            state,
            window,
            samples_in_label: 0,
            candidate: None,
            stats: RegimeStats::new(dimension),
        }
    }

    fn observe(&mut self, value: f64, cycle_time: DateTime<Utc>) {
        if self.window.len() == self.config.momentum_window {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.state.observations += 1;
        self.state.last_value = Some(value);
        self.stats.observations += 1;

        let observed = self.state.observations as usize;
        let required = self.config.min_observations;

        if observed < required {
            // Warm-up: report Unknown, keep the mean over what we have.
            if observed == 1 {
                self.start_label(RegimeLabel::Unknown, value, cycle_time);
                self.state.duration_cycles = 1;
            } else {
                self.extend_label(value);
            }
        } else if observed == required {
            // First established observation starts Normal, no transition event.
            self.start_label(RegimeLabel::Normal, value, cycle_time);
            self.state.duration_cycles = 1;
        } else {
            self.step(value, cycle_time);
        }

        *self.stats.cycles_by_label.entry(self.state.label).or_insert(0) += 1;
        self.state.pending_change = self.momentum_against_label();
    }

    fn step(&mut self, value: f64, cycle_time: DateTime<Utc>) {
        let current = self.state.label;
        let target = self.target_label(current, value);

        if target == current {
            self.candidate = None;
            self.extend_label(value);
            return;
        }

        let required = if target == RegimeLabel::Normal {
            self.config.exit_confirmations
        } else {
            self.config.enter_confirmations
        };
        let count = match self.candidate {
            Some((label, count)) if label == target => count + 1,
            _ => 1,
        };

        if count >= required {
            debug!(
                dimension = %self.state.dimension,
                from = ?current,
                to = ?target,
                value,
                held_cycles = self.state.duration_cycles,
                "Regime transition"
            );
            self.start_label(target, value, cycle_time);
            self.stats.transitions += 1;
        } else {
            self.candidate = Some((target, count));
            self.extend_label(value);
        }
    }

    fn target_label(&self, current: RegimeLabel, value: f64) -> RegimeLabel {
        let band = &self.config.band;
        match current {
            RegimeLabel::High => {
                if value < band.enter_low {
                    RegimeLabel::Low
                } else if value < band.exit_high {
                    RegimeLabel::Normal
                } else {
                    RegimeLabel::High
                }
            }
            RegimeLabel::Low => {
                if value > band.enter_high {
                    RegimeLabel::High
                } else if value > band.exit_low {
                    RegimeLabel::Normal
                } else {
                    RegimeLabel::Low
                }
            }
            RegimeLabel::Normal | RegimeLabel::Unknown => {
                if value > band.enter_high {
                    RegimeLabel::High
                } else if value < band.enter_low {
                    RegimeLabel::Low
                } else {
                    RegimeLabel::Normal
                }
            }
        }
    }

    fn start_label(&mut self, label: RegimeLabel, value: f64, cycle_time: DateTime<Utc>) {
        self.state.label = label;
        self.state.started_at = Some(cycle_time);
        self.state.duration_cycles = 0;
        self.state.running_mean = value;
        self.samples_in_label = 1;
        self.candidate = None;
    }

    fn extend_label(&mut self, value: f64) {
        self.state.duration_cycles += 1;
        self.samples_in_label += 1;
        self.state.running_mean +=
            (value - self.state.running_mean) / self.samples_in_label as f64;
    }

    /// Short-window delta moving against the current label.
    fn momentum_against_label(&self) -> bool {
        let delta = match (self.window.front(), self.window.back()) {
            (Some(first), Some(last)) if self.window.len() >= 2 => last - first,
            _ => return false,
        };
        let threshold = self.config.momentum_threshold;
        match self.state.label {
            RegimeLabel::High => delta < -threshold,
            RegimeLabel::Low => delta > threshold,
            RegimeLabel::Normal => delta.abs() > threshold,
            RegimeLabel::Unknown => false,
        }
    }
}

/// Owns one [`RegimeState`] per dimension.
#[derive(Debug)]
pub struct RegimeTracker {
    config: RegimeTrackerConfig,
    slots: Vec<Option<DimensionSlot>>,
    index: HashMap<Dimension, RegimeHandle>,
}

impl RegimeTracker {
    /// Create a tracker, rejecting an ill-formed configuration.
    pub fn new(config: RegimeTrackerConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slots: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn config(&self) -> &RegimeTrackerConfig {
        &self.config
    }

    /// Register a dimension, returning the existing handle if already known.
    pub fn register(&mut self, dimension: Dimension) -> RegimeHandle {
        if let Some(handle) = self.index.get(&dimension) {
            return *handle;
        }

        let slot = DimensionSlot::new(dimension, self.config.for_dimension(dimension).clone());
        let handle = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(slot);
                RegimeHandle(free)
            }
            None => {
                self.slots.push(Some(slot));
                RegimeHandle(self.slots.len() - 1)
            }
        };
        self.index.insert(dimension, handle);
        handle
    }

    pub fn handle(&self, dimension: Dimension) -> Option<RegimeHandle> {
        self.index.get(&dimension).copied()
    }

    /// Ingest the latest metric value for a dimension.
    ///
    /// Creates the dimension on first observation. A non-finite value is
    /// rejected with `InvalidMetric` and leaves the state untouched.
    pub fn update(
        &mut self,
        dimension: Dimension,
        value: f64,
        cycle_time: DateTime<Utc>,
    ) -> FusionResult<&RegimeState> {
        if !value.is_finite() {
            warn!(%dimension, value, "Rejected non-finite metric");
            if let Some(slot) = self.slot_mut(dimension) {
                slot.stats.rejected += 1;
            }
            return Err(FusionError::InvalidMetric { dimension, value });
        }

        let RegimeHandle(idx) = self.register(dimension);
        match self.slots.get_mut(idx).and_then(Option::as_mut) {
            Some(slot) => {
                slot.observe(value, cycle_time);
                Ok(&slot.state)
            }
            None => Err(FusionError::InsufficientData {
                dimension,
                observed: 0,
                required: self.config.for_dimension(dimension).min_observations,
            }),
        }
    }

    pub fn state(&self, dimension: Dimension) -> Option<&RegimeState> {
        self.slot(dimension).map(|slot| &slot.state)
    }

    pub fn get(&self, handle: RegimeHandle) -> Option<&RegimeState> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|slot| &slot.state)
    }

    /// State of a dimension, or `InsufficientData` while it is still warming up.
    pub fn require_established(&self, dimension: Dimension) -> FusionResult<&RegimeState> {
        let required = self.config.for_dimension(dimension).min_observations;
        match self.state(dimension) {
            Some(state) if state.is_established() => Ok(state),
            Some(state) => Err(FusionError::InsufficientData {
                dimension,
                observed: state.observations as usize,
                required,
            }),
            None => Err(FusionError::InsufficientData {
                dimension,
                observed: 0,
                required,
            }),
        }
    }

    pub fn stats(&self, dimension: Dimension) -> Option<&RegimeStats> {
        self.slot(dimension).map(|slot| &slot.stats)
    }

    /// Drop a dimension and free its slot.
    pub fn remove(&mut self, dimension: Dimension) -> Option<RegimeState> {
        let RegimeHandle(idx) = self.index.remove(&dimension)?;
        self.slots
            .get_mut(idx)
            .and_then(Option::take)
            .map(|slot| slot.state)
    }

    /// Clear `pending_change` on every dimension that was not observed this
    /// cycle. The early warning only describes the latest observation.
    pub fn clear_stale_warnings(&mut self, observed: &BTreeSet<Dimension>) {
        for slot in self.slots.iter_mut().flatten() {
            if !observed.contains(&slot.state.dimension) {
                slot.state.pending_change = false;
            }
        }
    }

    /// Copy of every tracked state, ordered by dimension.
    pub fn snapshot(&self) -> BTreeMap<Dimension, RegimeState> {
        self.index
            .keys()
            .filter_map(|d| self.state(*d).map(|s| (*d, s.clone())))
            .collect()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.index.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn slot(&self, dimension: Dimension) -> Option<&DimensionSlot> {
        let RegimeHandle(idx) = self.handle(dimension)?;
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, dimension: Dimension) -> Option<&mut DimensionSlot> {
        let RegimeHandle(idx) = self.handle(dimension)?;
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn t(cycle: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap() + Duration::minutes(15 * cycle)
    }

    fn tracker() -> RegimeTracker {
        RegimeTracker::new(RegimeTrackerConfig::default()).unwrap()
    }

    fn feed(tracker: &mut RegimeTracker, dimension: Dimension, values: &[f64]) -> Vec<RegimeLabel> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| tracker.update(dimension, *v, t(i as i64)).unwrap().label)
            .collect()
    }

    #[test]
    fn test_band_validation() {
        assert!(HysteresisBand::new(0.8, 0.6, 0.2, 0.4).is_ok());
        assert!(matches!(
            HysteresisBand::new(0.8, 0.8, 0.2, 0.4),
            Err(FusionError::InvalidConfiguration(_))
        ));
        assert!(HysteresisBand::new(0.8, 0.9, 0.2, 0.4).is_err());
        assert!(HysteresisBand::new(0.8, 0.6, 0.4, 0.2).is_err());
        assert!(HysteresisBand::new(0.8, 0.6, 0.2, 0.7).is_err());
        assert!(HysteresisBand::new(f64::NAN, 0.6, 0.2, 0.4).is_err());
    }

    #[test]
    fn test_tracker_rejects_bad_override() {
        let bad = RegimeConfig {
            band: HysteresisBand {
                enter_high: 0.5,
                exit_high: 0.7,
                enter_low: 0.1,
                exit_low: 0.2,
            },
            ..Default::default()
        };
        let config = RegimeTrackerConfig::default().with_override(Dimension::Trend, bad);
        let err = RegimeTracker::new(config).unwrap_err();
        match err {
            FusionError::InvalidConfiguration(msg) => assert!(msg.starts_with("trend:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_first_observation_is_normal() {
        let mut tracker = tracker();
        let state = tracker.update(Dimension::Volatility, 0.95, t(0)).unwrap();
        assert_eq!(state.label, RegimeLabel::Normal);
        assert_eq!(state.duration_cycles, 1);
        assert_eq!(state.running_mean, 0.95);
        assert_eq!(state.started_at, Some(t(0)));
        assert!(!state.pending_change);
        assert_eq!(tracker.stats(Dimension::Volatility).unwrap().transitions, 0);
    }

    #[test]
    fn test_transition_scenario() {
        let mut tracker = tracker();
        let labels = feed(&mut tracker, Dimension::Volatility, &[0.5, 0.85, 0.7, 0.5]);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Normal,
                RegimeLabel::High,
                RegimeLabel::High,
                RegimeLabel::High
            ]
        );
    }

    #[test]
    fn test_exit_requires_confirmation() {
        let mut tracker = tracker();
        let labels = feed(&mut tracker, Dimension::Volatility, &[0.5, 0.85, 0.5, 0.5]);
        assert_eq!(labels[3], RegimeLabel::Normal);

        let state = tracker.state(Dimension::Volatility).unwrap();
        assert_eq!(state.started_at, Some(t(3)));
        assert_eq!(state.duration_cycles, 0);
        assert_eq!(state.running_mean, 0.5);
    }

    #[test]
    fn test_interrupted_exit_resets_confirmation() {
        let mut tracker = tracker();
        let labels = feed(
            &mut tracker,
            Dimension::Volatility,
            &[0.5, 0.9, 0.5, 0.7, 0.5, 0.65],
        );
        assert!(labels[1..].iter().all(|l| *l == RegimeLabel::High));
    }

    #[test]
    fn test_hysteresis_stability() {
        let mut tracker = tracker();
        // Enter High, then oscillate strictly inside (exit_high, enter_high).
        feed(&mut tracker, Dimension::Volatility, &[0.5, 0.9]);
        for i in 0..50 {
            let value = if i % 2 == 0 { 0.61 } else { 0.79 };
            let state = tracker.update(Dimension::Volatility, value, t(2 + i)).unwrap();
            assert_eq!(state.label, RegimeLabel::High);
        }

        let mut normal = RegimeTracker::new(RegimeTrackerConfig::default()).unwrap();
        for i in 0..50 {
            let value = if i % 2 == 0 { 0.61 } else { 0.79 };
            let state = normal.update(Dimension::Volatility, value, t(i)).unwrap();
            assert_eq!(state.label, RegimeLabel::Normal);
        }
    }

    #[test]
    fn test_low_edge_and_direct_jump() {
        let mut tracker = tracker();
        let labels = feed(&mut tracker, Dimension::Trend, &[0.5, 0.1, 0.3, 0.95]);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Normal,
                RegimeLabel::Low,
                RegimeLabel::Low,
                RegimeLabel::High
            ]
        );
    }

    #[test]
    fn test_running_mean_is_streaming() {
        let mut tracker = tracker();
        feed(&mut tracker, Dimension::Sentiment, &[0.5, 0.85, 0.9, 0.7]);
        let state = tracker.state(Dimension::Sentiment).unwrap();
        assert_eq!(state.label, RegimeLabel::High);
        assert_eq!(state.duration_cycles, 2);
        assert_relative_eq!(state.running_mean, (0.85 + 0.9 + 0.7) / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_warm_up_reports_unknown() {
        let config = RegimeTrackerConfig {
            default: RegimeConfig {
                min_observations: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tracker = RegimeTracker::new(config).unwrap();
        let labels = feed(&mut tracker, Dimension::Correlation, &[0.9, 0.9, 0.9, 0.9]);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Unknown,
                RegimeLabel::Unknown,
                RegimeLabel::Normal,
                RegimeLabel::High
            ]
        );
    }

    #[test]
    fn test_require_established() {
        let config = RegimeTrackerConfig {
            default: RegimeConfig {
                min_observations: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tracker = RegimeTracker::new(config).unwrap();
        assert!(matches!(
            tracker.require_established(Dimension::Trend),
            Err(FusionError::InsufficientData { observed: 0, required: 2, .. })
        ));

        tracker.update(Dimension::Trend, 0.5, t(0)).unwrap();
        assert!(matches!(
            tracker.require_established(Dimension::Trend),
            Err(FusionError::InsufficientData { observed: 1, .. })
        ));

        tracker.update(Dimension::Trend, 0.5, t(1)).unwrap();
        assert!(tracker.require_established(Dimension::Trend).is_ok());
    }

    #[test]
    fn test_non_finite_metric_retains_state() {
        let mut tracker = tracker();
        feed(&mut tracker, Dimension::Volatility, &[0.5, 0.85]);
        let before = tracker.state(Dimension::Volatility).unwrap().clone();

        let err = tracker.update(Dimension::Volatility, f64::NAN, t(2)).unwrap_err();
        assert!(matches!(err, FusionError::InvalidMetric { dimension: Dimension::Volatility, .. }));
        assert!(tracker.update(Dimension::Volatility, f64::INFINITY, t(3)).is_err());

        assert_eq!(tracker.state(Dimension::Volatility).unwrap(), &before);
        assert_eq!(tracker.stats(Dimension::Volatility).unwrap().rejected, 2);
    }

    #[test]
    fn test_non_finite_metric_does_not_create_dimension() {
        let mut tracker = tracker();
        assert!(tracker.update(Dimension::Liquidity, f64::NAN, t(0)).is_err());
        assert!(tracker.state(Dimension::Liquidity).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_pending_change_leads_transition() {
        let config = RegimeTrackerConfig {
            default: RegimeConfig {
                momentum_window: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tracker = RegimeTracker::new(config).unwrap();
        // High, then a sharp slide that has not yet crossed exit_high.
        feed(&mut tracker, Dimension::Volatility, &[0.5, 0.95, 0.9]);
        let state = tracker.update(Dimension::Volatility, 0.75, t(3)).unwrap();
        assert_eq!(state.label, RegimeLabel::High);
        assert!(state.pending_change);

        // Pending flag is recomputed, not latched.
        let config = RegimeTrackerConfig {
            default: RegimeConfig {
                momentum_window: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut short = RegimeTracker::new(config).unwrap();
        feed(&mut short, Dimension::Volatility, &[0.5, 0.95, 0.75]);
        assert!(short.state(Dimension::Volatility).unwrap().pending_change);
        let state = short.update(Dimension::Volatility, 0.76, t(3)).unwrap();
        assert!(!state.pending_change);
    }

    #[test]
    fn test_stale_warning_cleared_without_observation() {
        let config = RegimeTrackerConfig {
            default: RegimeConfig {
                momentum_window: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tracker = RegimeTracker::new(config).unwrap();
        feed(&mut tracker, Dimension::Volatility, &[0.5, 0.95, 0.9, 0.75]);
        feed(&mut tracker, Dimension::Trend, &[0.5, 0.95, 0.9, 0.75]);
        assert!(tracker.state(Dimension::Volatility).unwrap().pending_change);

        let observed: BTreeSet<Dimension> = [Dimension::Trend].into_iter().collect();
        tracker.clear_stale_warnings(&observed);

        let vol = tracker.state(Dimension::Volatility).unwrap();
        assert!(!vol.pending_change);
        assert_eq!(vol.label, RegimeLabel::High);
        assert!(tracker.state(Dimension::Trend).unwrap().pending_change);
    }

    #[test]
    fn test_handles_and_removal() {
        let mut tracker = tracker();
        let vol = tracker.register(Dimension::Volatility);
        let trend = tracker.register(Dimension::Trend);
        assert_ne!(vol, trend);
        assert_eq!(tracker.register(Dimension::Volatility), vol);

        tracker.update(Dimension::Volatility, 0.5, t(0)).unwrap();
        assert_eq!(tracker.get(vol).unwrap().label, RegimeLabel::Normal);
        assert_eq!(tracker.get(trend).unwrap().label, RegimeLabel::Unknown);

        let removed = tracker.remove(Dimension::Volatility).unwrap();
        assert_eq!(removed.observations, 1);
        assert!(tracker.get(vol).is_none());
        assert_eq!(tracker.len(), 1);

        // Freed slot is reused.
        assert_eq!(tracker.register(Dimension::Sentiment), vol);
    }

    #[test]
    fn test_snapshot_and_stats() {
        let mut tracker = tracker();
        feed(&mut tracker, Dimension::Volatility, &[0.5, 0.85, 0.9, 0.9]);
        feed(&mut tracker, Dimension::Trend, &[0.5]);

        let snapshot = tracker.snapshot();
        let dims: Vec<_> = snapshot.keys().copied().collect();
        assert_eq!(dims, vec![Dimension::Volatility, Dimension::Trend]);

        let stats = tracker.stats(Dimension::Volatility).unwrap();
        assert_eq!(stats.observations, 4);
        assert_eq!(stats.transitions, 1);
        assert_relative_eq!(stats.pct_in(RegimeLabel::High), 75.0);
    }
}
