//! Error types for the shared lidar domain types.

use thiserror::Error;

/// Result type alias using LidarError.
pub type LidarResult<T> = Result<T, LidarError>;

/// Errors raised while constructing or validating shared domain values.
#[derive(Debug, Error)]
pub enum LidarError {
    #[error("Invalid time window: {start} is not before {end}")]
    InvalidWindow { start: String, end: String },

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    #[error("Invalid station configuration for '{station}': {message}")]
    InvalidStation { station: String, message: String },

    #[error("Unknown station: {0}")]
    UnknownStation(String),

    #[error("Unknown atmosphere: {0}")]
    UnknownAtmosphere(String),

    #[error("Invalid measurement identifier: {0}")]
    InvalidMeasurementId(String),
}
