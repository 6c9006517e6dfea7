//! Error types for the fusion core.
//!
//! Every variant is a local, recoverable condition. None of them is fatal
//! to the process and there is no retry policy here.

use thiserror::Error;

use crate::data::Dimension;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    /// Fewer observations than the configured minimum for a dimension.
    #[error("Insufficient data for {dimension}: {observed} of {required} observations")]
    InsufficientData {
        dimension: Dimension,
        observed: usize,
        required: usize,
    },

    /// Non-finite metric value. The previous regime state is retained.
    #[error("Invalid metric for {dimension}: {value}")]
    InvalidMetric { dimension: Dimension, value: f64 },

    /// Every component in a fusion call had zero effective weight.
    #[error("Zero weight mass across {components} components")]
    ZeroWeightMass { components: usize },

    /// Rejected at configuration time, e.g. an inverted hysteresis band.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A component or factor built with out-of-range fields.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type FusionResult<T> = Result<T, FusionError>;
