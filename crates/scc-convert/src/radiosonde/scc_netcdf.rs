//! SCC sounding files: `Altitude`, `Pressure`, `Temperature` and
//! `RelativeHumidity` over a `points` dimension, with the launch site and
//! time as global attributes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use lidar_common::Location;
use netcdf_classic::{Dataset, DatasetBuilder, NetCdfResult, Values};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{RadiosondeProfile, RadiosondeProvider, SoundingSample};
use crate::error::SoundingError;

/// Launch metadata of an indexed sounding file.
#[derive(Debug, Clone)]
struct SoundingEntry {
    path: PathBuf,
    timestamp: DateTime<Utc>,
    location: Location,
}

/// Picks the nearest SCC sounding file by launch time.
pub struct SccNetcdfProvider {
    entries: Vec<SoundingEntry>,
    max_time_offset: Duration,
    max_distance_deg: f64,
}

impl SccNetcdfProvider {
    /// Index every `*.nc` file below `directory`. Files whose launch metadata
    /// cannot be read are skipped with a warning.
    pub fn new(
        directory: &Path,
        max_time_offset: Duration,
        max_distance_deg: f64,
    ) -> Result<Self, SoundingError> {
        if !directory.is_dir() {
            return Err(SoundingError::Malformed {
                path: directory.to_path_buf(),
                message: "sounding directory does not exist".to_string(),
            });
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(directory).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_nc = path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("nc"));
            if !entry.file_type().is_file() || !is_nc {
                continue;
            }
            match Dataset::open(path)
                .map_err(|e| malformed(path, e.to_string()))
                .and_then(|ds| launch_metadata(&ds, path))
            {
                Ok((timestamp, location)) => entries.push(SoundingEntry {
                    path: path.to_path_buf(),
                    timestamp,
                    location,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping sounding file"),
            }
        }
        entries.sort_by_key(|e| e.timestamp);

        debug!(
            directory = %directory.display(),
            soundings = entries.len(),
            "Indexed sounding files"
        );

        Ok(Self {
            entries,
            max_time_offset,
            max_distance_deg,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RadiosondeProvider for SccNetcdfProvider {
    fn name(&self) -> &str {
        "scc_netcdf"
    }

    fn resolve(
        &self,
        timestamp: DateTime<Utc>,
        location: &Location,
    ) -> Result<RadiosondeProfile, SoundingError> {
        let nearest = self
            .entries
            .iter()
            .filter(|e| e.location.degree_distance(location) <= self.max_distance_deg)
            .map(|e| (abs_offset(e.timestamp, timestamp), e))
            .filter(|(offset, _)| *offset <= self.max_time_offset)
            .min_by_key(|(offset, _)| *offset)
            .map(|(_, e)| e)
            .ok_or_else(|| SoundingError::NotFound {
                timestamp,
                reason: format!(
                    "no sounding within {} h and {} deg of the station",
                    self.max_time_offset.num_hours(),
                    self.max_distance_deg
                ),
            })?;

        debug!(path = %nearest.path.display(), launch = %nearest.timestamp, "Selected sounding");
        read_sounding_file(&nearest.path)
    }
}

/// Read a sounding file into a normalised profile.
pub fn read_sounding_file(path: &Path) -> Result<RadiosondeProfile, SoundingError> {
    let ds = Dataset::open(path).map_err(|e| malformed(path, e.to_string()))?;
    let (timestamp, location) = launch_metadata(&ds, path)?;

    let column = |name: &str| {
        ds.values(name)
            .and_then(|v| v.to_f64_vec())
            .map_err(|e| malformed(path, e.to_string()))
    };
    let altitude = column("Altitude")?;
    let pressure = column("Pressure")?;
    let temperature = column("Temperature")?;
    let humidity = column("RelativeHumidity")?;

    if [pressure.len(), temperature.len(), humidity.len()]
        .iter()
        .any(|&n| n != altitude.len())
    {
        return Err(malformed(path, "sounding variables differ in length".to_string()));
    }

    let samples = (0..altitude.len())
        .map(|i| SoundingSample {
            altitude: altitude[i],
            pressure: pressure[i],
            temperature: temperature[i],
            relative_humidity: humidity[i],
        })
        .collect();

    RadiosondeProfile::new(timestamp, location, samples)
}

/// Encode a profile as an SCC sounding file.
pub fn encode_sounding_file(profile: &RadiosondeProfile, station_name: &str) -> NetCdfResult<Vec<u8>> {
    let samples = profile.samples();
    let column = |f: fn(&SoundingSample) -> f64| Values::Double(samples.iter().map(f).collect());

    let mut builder = DatasetBuilder::new();
    builder.add_dimension("points", samples.len())?;

    builder.add_attribute("Latitude_degrees_north", Values::Double(vec![profile.location.latitude]));
    builder.add_attribute("Longitude_degrees_east", Values::Double(vec![profile.location.longitude]));
    builder.add_attribute("Altitude_meter_asl", Values::Double(vec![profile.location.altitude]));
    builder.add_attribute("Sounding_Station_Name", Values::text(station_name));
    builder.add_attribute(
        "Sounding_Start_Date",
        Values::text(profile.timestamp.format("%Y%m%d").to_string()),
    );
    builder.add_attribute(
        "Sounding_Start_Time_UT",
        Values::text(profile.timestamp.format("%H%M%S").to_string()),
    );

    builder.add_variable("Altitude", &["points"], column(|s| s.altitude))?;
    builder.add_variable_attribute("Altitude", "units", Values::text("m"))?;
    builder.add_variable("Pressure", &["points"], column(|s| s.pressure))?;
    builder.add_variable_attribute("Pressure", "units", Values::text("hPa"))?;
    builder.add_variable("Temperature", &["points"], column(|s| s.temperature))?;
    builder.add_variable_attribute("Temperature", "units", Values::text("C"))?;
    builder.add_variable("RelativeHumidity", &["points"], column(|s| s.relative_humidity))?;
    builder.add_variable_attribute("RelativeHumidity", "units", Values::text("%"))?;

    builder.encode()
}

fn launch_metadata(ds: &Dataset, path: &Path) -> Result<(DateTime<Utc>, Location), SoundingError> {
    let number = |name: &str| {
        ds.attribute(name)
            .and_then(Values::first_f64)
            .ok_or_else(|| malformed(path, format!("missing attribute {}", name)))
    };
    let text = |name: &str| {
        ds.text_attribute(name)
            .ok_or_else(|| malformed(path, format!("missing attribute {}", name)))
    };

    let date = text("Sounding_Start_Date")?;
    let time = text("Sounding_Start_Time_UT")?;
    let date = NaiveDate::parse_from_str(date.trim(), "%Y%m%d")
        .map_err(|_| malformed(path, format!("invalid Sounding_Start_Date '{}'", date)))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H%M%S")
        .map_err(|_| malformed(path, format!("invalid Sounding_Start_Time_UT '{}'", time)))?;

    let location = Location {
        latitude: number("Latitude_degrees_north")?,
        longitude: number("Longitude_degrees_east")?,
        altitude: number("Altitude_meter_asl").unwrap_or(0.0),
    };

    Ok((Utc.from_utc_datetime(&date.and_time(time)), location))
}

pub(super) fn abs_offset(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let offset = a - b;
    if offset < Duration::zero() {
        -offset
    } else {
        offset
    }
}

fn malformed(path: &Path, message: String) -> SoundingError {
    SoundingError::Malformed {
        path: path.to_path_buf(),
        message,
    }
}
