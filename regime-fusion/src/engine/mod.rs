//! Evaluation engine.
//!
//! - `FusionEngine`: one context's cycle (zones, regimes, fused signal,
//!   market condition)
//! - `ContextSet`: independent engines keyed by symbol and timeframe

pub mod contexts;
pub mod cycle;

pub use contexts::{ContextKey, ContextResult, ContextSet};
pub use cycle::{CycleInput, CycleOutput, EngineConfig, FusionEngine};
