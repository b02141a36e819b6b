//! Sounding profiles and the providers that supply them.
//!
//! Each supplier format has its own [`RadiosondeProvider`]. The variant in use
//! is chosen by configuration through [`create_provider`].

mod scc_netcdf;
mod standard;
mod wrf;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lidar_common::{AltitudeRange, Location, StationConfig};
use serde::{Deserialize, Serialize};

use crate::error::SoundingError;

pub use scc_netcdf::{encode_sounding_file, read_sounding_file, SccNetcdfProvider};
pub use standard::StandardAtmosphereProvider;
pub use wrf::WrfProfileProvider;

/// One level of a sounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundingSample {
    /// Metres above sea level
    pub altitude: f64,
    /// hPa
    pub pressure: f64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Percent
    pub relative_humidity: f64,
}

/// A normalised sounding: finite samples with strictly increasing altitude.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiosondeProfile {
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    samples: Vec<SoundingSample>,
}

impl RadiosondeProfile {
    /// Normalise raw samples: drop non-finite levels, sort by altitude and
    /// require at least two levels with distinct altitudes.
    pub fn new(
        timestamp: DateTime<Utc>,
        location: Location,
        samples: Vec<SoundingSample>,
    ) -> Result<Self, SoundingError> {
        let mut samples: Vec<SoundingSample> = samples
            .into_iter()
            .filter(|s| {
                s.altitude.is_finite()
                    && s.pressure.is_finite()
                    && s.temperature.is_finite()
                    && s.relative_humidity.is_finite()
            })
            .collect();
        samples.sort_by(|a, b| a.altitude.total_cmp(&b.altitude));

        if samples.len() < 2 {
            return Err(SoundingError::InvalidProfile(format!(
                "{} usable levels, at least 2 required",
                samples.len()
            )));
        }
        if let Some(pair) = samples.windows(2).find(|w| w[1].altitude <= w[0].altitude) {
            return Err(SoundingError::InvalidProfile(format!(
                "duplicate altitude {} m",
                pair[0].altitude
            )));
        }

        Ok(Self {
            timestamp,
            location,
            samples,
        })
    }

    pub fn samples(&self) -> &[SoundingSample] {
        &self.samples
    }

    pub fn lowest_altitude(&self) -> f64 {
        self.samples[0].altitude
    }

    pub fn highest_altitude(&self) -> f64 {
        self.samples[self.samples.len() - 1].altitude
    }

    /// Fail unless the profile spans the whole required altitude range.
    pub fn check_coverage(&self, required: &AltitudeRange) -> Result<(), SoundingError> {
        if required.is_covered_by(self.lowest_altitude(), self.highest_altitude()) {
            Ok(())
        } else {
            Err(SoundingError::InsufficientCoverage {
                lowest: self.lowest_altitude(),
                highest: self.highest_altitude(),
                required_min: required.min,
                required_max: required.max,
            })
        }
    }
}

/// Supplies the sounding closest to a measurement.
///
/// Implementations are read-only after construction and shared between
/// concurrent window builds.
pub trait RadiosondeProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn resolve(
        &self,
        timestamp: DateTime<Utc>,
        location: &Location,
    ) -> Result<RadiosondeProfile, SoundingError>;
}

/// Sounding source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RadiosondeSource {
    /// Directory of SCC sounding NetCDF files
    SccNetcdf {
        directory: PathBuf,
        #[serde(default = "default_max_time_offset_hours")]
        max_time_offset_hours: u32,
        #[serde(default = "default_max_distance_deg")]
        max_distance_deg: f64,
    },

    /// Directory of daily WRF model profiles, `<PROFILE>_<YYYYMMDD>.csv`
    WrfProfile {
        directory: PathBuf,
        /// Overrides the station's `profile_name`
        #[serde(default)]
        profile_name: Option<String>,
        #[serde(default = "default_max_time_offset_minutes")]
        max_time_offset_minutes: u32,
    },

    /// ICAO standard atmosphere, no files needed
    StandardAtmosphere {
        #[serde(default = "default_ceiling")]
        ceiling: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
}

fn default_max_time_offset_hours() -> u32 {
    12
}

fn default_max_distance_deg() -> f64 {
    1.0
}

fn default_max_time_offset_minutes() -> u32 {
    60
}

fn default_ceiling() -> f64 {
    30_000.0
}

fn default_step() -> f64 {
    100.0
}

impl Default for RadiosondeSource {
    fn default() -> Self {
        RadiosondeSource::StandardAtmosphere {
            ceiling: default_ceiling(),
            step: default_step(),
        }
    }
}

/// Create the provider for a source configuration.
pub fn create_provider(
    source: &RadiosondeSource,
    station: &StationConfig,
) -> Result<Arc<dyn RadiosondeProvider>, SoundingError> {
    Ok(match source {
        RadiosondeSource::SccNetcdf {
            directory,
            max_time_offset_hours,
            max_distance_deg,
        } => Arc::new(SccNetcdfProvider::new(
            directory,
            chrono::Duration::hours(*max_time_offset_hours as i64),
            *max_distance_deg,
        )?),
        RadiosondeSource::WrfProfile {
            directory,
            profile_name,
            max_time_offset_minutes,
        } => {
            let profile = match profile_name {
                Some(name) => name.clone(),
                None if !station.profile_name.is_empty() => station.profile_name.clone(),
                None => station.name.to_uppercase(),
            };
            Arc::new(WrfProfileProvider::new(
                directory.clone(),
                profile,
                chrono::Duration::minutes(*max_time_offset_minutes as i64),
            ))
        }
        RadiosondeSource::StandardAtmosphere { ceiling, step } => {
            Arc::new(StandardAtmosphereProvider::new(*ceiling, *step)?)
        }
    })
}
