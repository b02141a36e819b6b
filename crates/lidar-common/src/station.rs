//! Station configuration: where a lidar stands and how its channels map to SCC.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LidarError, LidarResult};

/// Geographic position of a station or sounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level
    pub altitude: f64,
}

impl Location {
    /// Largest of the latitude/longitude differences, in degrees.
    pub fn degree_distance(&self, other: &Location) -> f64 {
        (self.latitude - other.latitude)
            .abs()
            .max((self.longitude - other.longitude).abs())
    }
}

/// Altitude span (metres) a sounding must cover for this station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeRange {
    pub min: f64,
    pub max: f64,
}

impl AltitudeRange {
    pub fn is_covered_by(&self, lowest: f64, highest: f64) -> bool {
        lowest <= self.min && highest >= self.max
    }
}

impl Default for AltitudeRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 15_000.0,
        }
    }
}

/// One SCC channel and the raw instrument channel feeding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// SCC channel identifier (`channel_ID`)
    pub scc_id: i32,
    /// Index of the source channel in the raw files
    pub raw_index: usize,
    /// Background window bounds, in range bins
    pub background_low: f64,
    pub background_high: f64,
    /// Lidar-ratio input flag (`LR_Input`)
    #[serde(default = "default_lr_input")]
    pub lr_input: i32,
}

fn default_lr_input() -> i32 {
    1
}

/// Raw channels and SCC channels of the polarisation calibration at one wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationChannels {
    /// Nanometres, e.g. 355 or 532
    pub wavelength: u32,
    pub total_raw_index: usize,
    pub cross_raw_index: usize,
    /// SCC channels for cross and total at +45 degrees, then cross and total at -45
    pub scc_ids: [i32; 4],
    /// SCC system the calibration measurement is processed with
    pub configuration: i32,
}

impl CalibrationChannels {
    /// Two-digit suffix SCC appends to calibration measurement ids (`35`, `53`).
    pub fn id_suffix(&self) -> String {
        self.wavelength.to_string().chars().take(2).collect()
    }
}

/// Polarisation calibration output for a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Height range (metres) the calibration constant is computed over
    #[serde(default = "default_calibration_min")]
    pub range_min: f64,
    #[serde(default = "default_calibration_max")]
    pub range_max: f64,
    #[serde(default)]
    pub background_low: f64,
    #[serde(default = "default_calibration_background_high")]
    pub background_high: f64,
    pub wavelengths: Vec<CalibrationChannels>,
}

fn default_calibration_min() -> f64 {
    1200.0
}

fn default_calibration_max() -> f64 {
    2500.0
}

fn default_calibration_background_high() -> f64 {
    249.0
}

/// Read-only per-station settings consumed by the artifact builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// SCC station code, first component of every measurement identifier
    pub code: String,
    pub name: String,
    /// Prefix of WRF profile files for this station
    #[serde(default)]
    pub profile_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Ground pressure (hPa) and temperature (C) written into every artifact
    pub pressure: f64,
    pub temperature: f64,
    /// SCC system used for windows starting between 04:00 and 16:00
    pub daytime_configuration: i32,
    pub nighttime_configuration: i32,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub required_altitude: AltitudeRange,
    /// Absent when the station produces no calibration files
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,
}

impl StationConfig {
    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
        }
    }

    /// SCC system id for a measurement starting at `start`.
    ///
    /// Daytime is strictly between 04:00 and 16:00 UTC.
    pub fn system_id_for(&self, start: DateTime<Utc>) -> i32 {
        let minutes = start.hour() * 60 + start.minute();
        let after_dawn = minutes > 4 * 60 || (minutes == 4 * 60 && start.second() > 0);
        if after_dawn && minutes < 16 * 60 {
            self.daytime_configuration
        } else {
            self.nighttime_configuration
        }
    }

    pub fn validate(&self) -> LidarResult<()> {
        let invalid = |message: &str| LidarError::InvalidStation {
            station: self.code.clone(),
            message: message.to_string(),
        };

        if self.code.is_empty() || !self.code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("station code must be non-empty and alphanumeric"));
        }
        if self.channels.is_empty() {
            return Err(invalid("at least one channel is required"));
        }
        for channel in &self.channels {
            if channel.background_low > channel.background_high {
                return Err(invalid(&format!(
                    "channel {} has background_low > background_high",
                    channel.scc_id
                )));
            }
        }
        if self.required_altitude.min > self.required_altitude.max {
            return Err(invalid("required_altitude.min is above required_altitude.max"));
        }
        if let Some(calibration) = &self.calibration {
            if calibration.range_min >= calibration.range_max {
                return Err(invalid("calibration.range_min must be below calibration.range_max"));
            }
            for (i, channels) in calibration.wavelengths.iter().enumerate() {
                if calibration.wavelengths[..i]
                    .iter()
                    .any(|c| c.wavelength == channels.wavelength)
                {
                    return Err(invalid(&format!(
                        "calibration wavelength {} is listed twice",
                        channels.wavelength
                    )));
                }
                if channels.wavelength < 10 {
                    return Err(invalid("calibration wavelength must be given in nanometres"));
                }
            }
        }
        Ok(())
    }
}

/// Lookup table of configured stations.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<StationConfig>,
}

impl StationRegistry {
    /// Build a registry, validating every station and rejecting duplicate codes.
    pub fn new(stations: Vec<StationConfig>) -> LidarResult<Self> {
        for (i, station) in stations.iter().enumerate() {
            station.validate()?;
            if stations[..i]
                .iter()
                .any(|s| s.code.eq_ignore_ascii_case(&station.code))
            {
                return Err(LidarError::InvalidStation {
                    station: station.code.clone(),
                    message: "duplicate station code".to_string(),
                });
            }
        }
        Ok(Self { stations })
    }

    /// Find a station by SCC code or by name (case-insensitive).
    pub fn get(&self, key: &str) -> LidarResult<&StationConfig> {
        self.stations
            .iter()
            .find(|s| s.code.eq_ignore_ascii_case(key) || s.name.eq_ignore_ascii_case(key))
            .ok_or_else(|| LidarError::UnknownStation(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationConfig> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
