//! Confluence zone detection.
//!
//! Clusters price-anchored factors from independent producers into
//! confidence-scored zones:
//! - Running-centroid single linkage (order independent)
//! - Strength bonuses for member count and kind diversity
//! - Support/resistance role resolved against the price at query time

pub mod clusterer;

pub use clusterer::{
    nearest_resistance, nearest_support, ClusterConfig, ConfluenceZone, FactorClusterer, ZoneType,
};
