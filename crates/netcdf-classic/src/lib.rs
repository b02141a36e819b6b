//! NetCDF-3 datasets for raw lidar files and SCC submissions.
//!
//! Wraps the `netcdf3` crate behind an in-memory `Dataset` and a validating
//! `DatasetBuilder`. Supports the classic format (`CDF\x01`) and the 64-bit
//! offset variant (`CDF\x02`), including a single unlimited record dimension.
//! Headers are checked before decoding so corrupt files fail cleanly.
//!
//! # Example
//!
//! ```
//! use netcdf_classic::{Dataset, DatasetBuilder, Values};
//!
//! let mut builder = DatasetBuilder::new();
//! builder.add_dimension("points", 2).unwrap();
//! builder
//!     .add_variable("height", &["points"], Values::Double(vec![7.5, 15.0]))
//!     .unwrap();
//! let bytes = builder.encode().unwrap();
//!
//! let dataset = Dataset::from_bytes(bytes).unwrap();
//! assert_eq!(dataset.dimension_len("points"), Some(2));
//! ```

pub mod error;
mod header;
mod reader;
mod types;
mod writer;

pub use error::{NetCdfError, NetCdfResult};
pub use reader::{Attribute, Dataset, Dimension, Variable};
pub use types::{NcType, Values};
pub use writer::DatasetBuilder;
