//! Common types shared by the lidar conversion and SCC synchronisation crates.

pub mod atmosphere;
pub mod error;
pub mod measurement;
pub mod station;
pub mod time;

pub use atmosphere::Atmosphere;
pub use error::{LidarError, LidarResult};
pub use measurement::MeasurementId;
pub use station::{
    AltitudeRange, CalibrationChannels, CalibrationConfig, ChannelConfig, Location, StationConfig,
    StationRegistry,
};
pub use time::{TimeRange, TimeWindow};
