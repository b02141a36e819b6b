//! Error types for NetCDF encoding and decoding.

use thiserror::Error;

/// Result type for NetCDF operations.
pub type NetCdfResult<T> = Result<T, NetCdfError>;

/// Error types for NetCDF encoding and decoding.
#[derive(Error, Debug)]
pub enum NetCdfError {
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Missing required dimension, variable or attribute
    #[error("Missing required data: {0}")]
    MissingData(String),

    /// Malformed file contents
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Values do not match the declared dimensions
    #[error("Shape mismatch for '{name}': expected {expected} values, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Definition rejected by the builder
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}
