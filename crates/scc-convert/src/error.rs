//! Error types for the conversion crate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lidar_common::{LidarError, MeasurementId};
use netcdf_classic::NetCdfError;
use thiserror::Error;

/// Errors raised by a radiosonde provider or by the coverage check.
#[derive(Error, Debug)]
pub enum SoundingError {
    #[error("No sounding available for {timestamp}: {reason}")]
    NotFound {
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("Malformed sounding file {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid sounding profile: {0}")]
    InvalidProfile(String),

    #[error(
        "Sounding covers {lowest:.0}-{highest:.0} m but {required_min:.0}-{required_max:.0} m is required"
    )]
    InsufficientCoverage {
        lowest: f64,
        highest: f64,
        required_min: f64,
        required_max: f64,
    },
}

/// Errors that can occur while planning or building measurement windows.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Bad or contradictory time specification, non-positive interval
    #[error("Validation error: {0}")]
    Validation(String),

    /// Raw files disagree about the data of a window
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Missing or invalid sounding: {0}")]
    MissingSounding(#[from] SoundingError),

    #[error("Measurement identifier {0} is produced by more than one window")]
    DuplicateIdentifier(MeasurementId),

    #[error("Failed to read raw file {}: {source}", path.display())]
    RawFile {
        path: PathBuf,
        #[source]
        source: NetCdfError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] NetCdfError),
}

impl From<LidarError> for ConvertError {
    fn from(err: LidarError) -> Self {
        ConvertError::Validation(err.to_string())
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;
