//! WRF model profiles exported as daily CSV files.
//!
//! `<PROFILE>_<YYYYMMDD>.csv` with header `timestamp,altitude,pressure,temperature,rh`.
//! A file holds several profiles; rows sharing a timestamp form one profile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::ReaderBuilder;
use lidar_common::Location;
use serde::Deserialize;
use tracing::debug;

use super::scc_netcdf::abs_offset;
use super::{RadiosondeProfile, RadiosondeProvider, SoundingSample};
use crate::error::SoundingError;

#[derive(Debug, Deserialize)]
struct WrfRow {
    timestamp: String,
    altitude: f64,
    pressure: f64,
    temperature: f64,
    rh: f64,
}

/// Reads WRF profiles for one station.
pub struct WrfProfileProvider {
    directory: PathBuf,
    profile_name: String,
    max_time_offset: Duration,
}

impl WrfProfileProvider {
    pub fn new(directory: PathBuf, profile_name: String, max_time_offset: Duration) -> Self {
        Self {
            directory,
            profile_name,
            max_time_offset,
        }
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{}_{}.csv", self.profile_name, date.format("%Y%m%d")))
    }

    fn read_file(
        &self,
        path: &Path,
    ) -> Result<BTreeMap<DateTime<Utc>, Vec<SoundingSample>>, SoundingError> {
        let malformed = |message: String| SoundingError::Malformed {
            path: path.to_path_buf(),
            message,
        };

        let mut reader = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| malformed(e.to_string()))?;

        let mut profiles: BTreeMap<DateTime<Utc>, Vec<SoundingSample>> = BTreeMap::new();
        for (line, result) in reader.deserialize().enumerate() {
            let row: WrfRow = result.map_err(|e| malformed(e.to_string()))?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                malformed(format!("row {}: invalid timestamp '{}'", line + 1, row.timestamp))
            })?;
            profiles.entry(timestamp).or_default().push(SoundingSample {
                altitude: row.altitude,
                pressure: row.pressure,
                temperature: row.temperature,
                relative_humidity: row.rh,
            });
        }
        Ok(profiles)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

impl RadiosondeProvider for WrfProfileProvider {
    fn name(&self) -> &str {
        "wrf_profile"
    }

    fn resolve(
        &self,
        timestamp: DateTime<Utc>,
        location: &Location,
    ) -> Result<RadiosondeProfile, SoundingError> {
        let mut dates = vec![
            (timestamp - self.max_time_offset).date_naive(),
            timestamp.date_naive(),
            (timestamp + self.max_time_offset).date_naive(),
        ];
        dates.dedup();

        let mut best: Option<(Duration, DateTime<Utc>, Vec<SoundingSample>)> = None;
        let mut searched = Vec::new();
        for date in dates {
            let path = self.file_for(date);
            if !path.is_file() {
                searched.push(path.display().to_string());
                continue;
            }
            for (profile_time, samples) in self.read_file(&path)? {
                let offset = abs_offset(profile_time, timestamp);
                if offset > self.max_time_offset {
                    continue;
                }
                if best.as_ref().map_or(true, |(b, _, _)| offset < *b) {
                    best = Some((offset, profile_time, samples));
                }
            }
        }

        let (_, profile_time, samples) = best.ok_or_else(|| SoundingError::NotFound {
            timestamp,
            reason: if searched.is_empty() {
                format!(
                    "no WRF profile within {} min",
                    self.max_time_offset.num_minutes()
                )
            } else {
                format!("missing WRF files {}", searched.join(", "))
            },
        })?;

        debug!(profile = %self.profile_name, time = %profile_time, "Selected WRF profile");
        RadiosondeProfile::new(profile_time, *location, samples)
    }
}
