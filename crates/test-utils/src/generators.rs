//! Generators for synthetic raw lidar files and sounding files.
//!
//! Signal values are a pure function of timestamp, bin and channel (see
//! [`expected_signal`]), so two files covering the same instant hold
//! identical records unless one of them is given a signal offset.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Timelike, Utc};
use lidar_common::Location;
use netcdf_classic::{DatasetBuilder, NetCdfResult, Values};

/// Signal value of `(timestamp, bin, channel)` in generated raw files.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use test_utils::expected_signal;
///
/// let t = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 30).unwrap();
/// assert_eq!(expected_signal(t, 2, 1, 0.0), 300.0 + 2.0 + 0.25);
/// ```
pub fn expected_signal(timestamp: DateTime<Utc>, bin: usize, channel: usize, offset: f64) -> f64 {
    timestamp.num_seconds_from_midnight() as f64 * 10.0 + bin as f64 + channel as f64 * 0.25 + offset
}

/// Laser shots of `channel` in generated raw files.
pub fn expected_shots(channel: usize) -> i32 {
    600 + channel as i32
}

/// Builder for a raw instrument file.
///
/// Defaults: 4 bins, 3 channels, 30 s records, vertical pointing.
#[derive(Debug, Clone)]
pub struct RawFileSpec {
    start: DateTime<Utc>,
    records: usize,
    record_secs: i64,
    bins: usize,
    channels: usize,
    zenith_angle: f64,
    signal_offset: f64,
    calibration: Vec<usize>,
}

impl RawFileSpec {
    pub fn new(start: DateTime<Utc>, records: usize) -> Self {
        Self {
            start,
            records,
            record_secs: 30,
            bins: 4,
            channels: 3,
            zenith_angle: 0.0,
            signal_offset: 0.0,
            calibration: Vec::new(),
        }
    }

    /// A file whose records cover `[start, end)` back to back.
    pub fn covering(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let records = ((end - start).num_seconds() / 30).max(1) as usize;
        Self::new(start, records)
    }

    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn record_secs(mut self, secs: i64) -> Self {
        self.record_secs = secs;
        self
    }

    pub fn zenith_angle(mut self, angle: f64) -> Self {
        self.zenith_angle = angle;
        self
    }

    /// Shift every signal value, making records differ from other files.
    pub fn signal_offset(mut self, offset: f64) -> Self {
        self.signal_offset = offset;
        self
    }

    /// Mark record `index` as a polarisation calibration profile.
    pub fn calibration_record(mut self, index: usize) -> Self {
        self.calibration.push(index);
        self
    }

    /// Mark a run of records as a calibration period.
    pub fn calibration_records(mut self, indices: std::ops::Range<usize>) -> Self {
        self.calibration.extend(indices);
        self
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        (0..self.records)
            .map(|i| self.start + Duration::seconds(self.record_secs * i as i64))
            .collect()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.record_secs * self.records as i64)
    }

    pub fn encode(&self) -> NetCdfResult<Vec<u8>> {
        let times = self.timestamps();

        let mut signal = Vec::with_capacity(times.len() * self.bins * self.channels);
        for &t in &times {
            for bin in 0..self.bins {
                for channel in 0..self.channels {
                    signal.push(expected_signal(t, bin, channel, self.signal_offset));
                }
            }
        }
        let measurement_time: Vec<i32> = times
            .iter()
            .flat_map(|t| {
                let ymd = t.format("%Y%m%d").to_string().parse::<i32>().unwrap_or_default();
                [ymd, t.num_seconds_from_midnight() as i32]
            })
            .collect();
        let shots: Vec<i32> = times
            .iter()
            .flat_map(|_| (0..self.channels).map(expected_shots))
            .collect();
        let cal_angle: Vec<f64> = (0..times.len())
            .map(|i| if self.calibration.contains(&i) { 45.0 } else { 0.0 })
            .collect();

        let mut builder = DatasetBuilder::new();
        builder.add_unlimited_dimension("time")?;
        builder.add_dimension("height", self.bins)?;
        builder.add_dimension("channel", self.channels)?;
        builder.add_dimension("date_time", 2)?;
        builder.add_attribute("Location", Values::text("synthetic"));
        builder.add_variable("raw_signal", &["time", "height", "channel"], Values::Double(signal))?;
        builder.add_variable(
            "measurement_time",
            &["time", "date_time"],
            Values::Int(measurement_time),
        )?;
        builder.add_variable("measurement_shots", &["time", "channel"], Values::Int(shots))?;
        builder.add_variable("depol_cal_angle", &["time"], Values::Double(cal_angle))?;
        builder.add_variable("zenithangle", &[], Values::Double(vec![self.zenith_angle]))?;
        builder.encode()
    }

    /// Encode and write to `dir/name`.
    pub fn write(&self, dir: &Path, name: &str) -> io::Result<PathBuf> {
        let bytes = self
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Builder for an SCC sounding file with a linear synthetic profile.
#[derive(Debug, Clone)]
pub struct SoundingFileSpec {
    launch: DateTime<Utc>,
    location: Location,
    bottom: f64,
    top: f64,
    step: f64,
}

impl SoundingFileSpec {
    /// Levels from `bottom` to `top` (inclusive) every `step` metres.
    pub fn new(launch: DateTime<Utc>, location: Location, bottom: f64, top: f64, step: f64) -> Self {
        Self {
            launch,
            location,
            bottom,
            top,
            step,
        }
    }

    pub fn altitudes(&self) -> Vec<f64> {
        let mut altitudes = Vec::new();
        let mut altitude = self.bottom;
        while altitude <= self.top {
            altitudes.push(altitude);
            altitude += self.step;
        }
        altitudes
    }

    pub fn encode(&self) -> NetCdfResult<Vec<u8>> {
        let altitudes = self.altitudes();

        let mut builder = DatasetBuilder::new();
        builder.add_dimension("points", altitudes.len())?;
        builder.add_attribute(
            "Latitude_degrees_north",
            Values::Double(vec![self.location.latitude]),
        );
        builder.add_attribute(
            "Longitude_degrees_east",
            Values::Double(vec![self.location.longitude]),
        );
        builder.add_attribute(
            "Altitude_meter_asl",
            Values::Double(vec![self.location.altitude]),
        );
        builder.add_attribute("Sounding_Station_Name", Values::text("synthetic"));
        builder.add_attribute(
            "Sounding_Start_Date",
            Values::text(self.launch.format("%Y%m%d").to_string()),
        );
        builder.add_attribute(
            "Sounding_Start_Time_UT",
            Values::text(self.launch.format("%H%M%S").to_string()),
        );
        builder.add_variable("Altitude", &["points"], Values::Double(altitudes.clone()))?;
        builder.add_variable(
            "Pressure",
            &["points"],
            Values::Double(altitudes.iter().map(|a| 1013.25 - a * 0.07).collect()),
        )?;
        builder.add_variable(
            "Temperature",
            &["points"],
            Values::Double(altitudes.iter().map(|a| 15.0 - a * 0.0065).collect()),
        )?;
        builder.add_variable(
            "RelativeHumidity",
            &["points"],
            Values::Double(vec![50.0; altitudes.len()]),
        )?;
        builder.encode()
    }

    pub fn write(&self, dir: &Path, name: &str) -> io::Result<PathBuf> {
        let bytes = self
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
