//! Input records produced by upstream collaborators.

pub mod types;

pub use types::{Dimension, Direction, FactorKind, SignalComponent, SignalSource, SpatialFactor};
