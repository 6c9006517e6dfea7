//! Signal fusion module.
//!
//! Combines independently produced directional components into one
//! bounded bias with explicit conflict accounting.

pub mod combiner;

pub use combiner::{Consensus, FusionConfig, SignalFusion, UnifiedSignal};
