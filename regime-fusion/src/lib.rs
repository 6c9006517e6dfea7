pub mod confluence;
pub mod data;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod regime;

// Re-export commonly used types
pub use data::{Dimension, Direction, FactorKind, SignalComponent, SignalSource, SpatialFactor};
pub use error::{FusionError, FusionResult};
pub use confluence::{ConfluenceZone, FactorClusterer, ZoneType};
pub use fusion::{Consensus, SignalFusion, UnifiedSignal};
pub use regime::{MarketCondition, MarketConditionClassifier, RegimeLabel, RegimeState, RegimeTracker, TradingStance};
pub use engine::{ContextKey, ContextSet, CycleInput, CycleOutput, EngineConfig, FusionEngine};
