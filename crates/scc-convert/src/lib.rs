//! Conversion of raw lidar files into SCC measurement artifacts.
//!
//! The flow for one run is:
//! 1. [`raw`] reads the coverage of every input file
//! 2. [`timespec`] resolves the start/end boundaries against that coverage
//! 3. [`planner`] splits the range into windows
//! 4. [`merge`] collects each window's records across files
//! 5. [`artifact`] pairs the records with a sounding from a
//!    [`radiosonde::RadiosondeProvider`] and writes the SCC file
//! 6. [`calibration`] writes a file per wavelength for every polarisation
//!    calibration period inside the converted range
//!
//! [`pipeline::Converter`] drives these steps over a bounded worker pool.

pub mod artifact;
pub mod calibration;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod planner;
pub mod radiosonde;
pub mod raw;
pub mod timespec;

pub use artifact::{ArtifactBuilder, FileStatus, OutputArtifact, WrittenArtifact};
pub use calibration::{find_calibration_periods, CalibrationArtifact, CalibrationPeriod};
pub use error::{ConvertError, Result, SoundingError};
pub use merge::{merge_window, MergedProfile, OverlapPolicy};
pub use pipeline::{
    CalibrationResult, ConversionReport, ConvertOptions, Converter, WindowOutcome, WindowResult,
};
pub use planner::plan_windows;
pub use radiosonde::{
    create_provider, RadiosondeProfile, RadiosondeProvider, RadiosondeSource, SoundingSample,
};
pub use raw::{discover_raw_files, RawFileSummary, RawMeasurementFile, RawRecord};
pub use timespec::{resolve_range, Boundary, TimeSpec};
