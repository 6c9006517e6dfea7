//! Market regime module.
//!
//! - Tracker: one hysteresis state machine per dimension (volatility,
//!   trend, sentiment, correlation, liquidity) with a momentum early warning
//! - Classifier: regimes + fused signal + zones into a market condition
//!   (Trending, Transitional, Ranging) and a trading stance

pub mod classifier;
pub mod tracker;

pub use classifier::{
    ClassifierConfig, ConditionAssessment, MarketCondition, MarketConditionClassifier,
    TradingStance, ZoneSummary,
};
pub use tracker::{
    HysteresisBand, RegimeConfig, RegimeHandle, RegimeLabel, RegimeState, RegimeStats,
    RegimeTracker, RegimeTrackerConfig,
};
