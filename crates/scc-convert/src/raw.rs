//! Raw instrument files.
//!
//! Each file holds a sequence of records. A record is one averaged profile
//! (`raw_signal[time, height, channel]`) stamped by `measurement_time[time]`
//! as `(YYYYMMDD, seconds of day)` in UTC.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lidar_common::TimeRange;
use netcdf_classic::{Dataset, NetCdfError};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ConvertError, Result};

/// Record length assumed when a file holds a single record.
pub const DEFAULT_RECORD_DURATION_SECS: i64 = 30;

/// One time-stamped profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    /// Laser shots per channel
    pub shots: Vec<i32>,
    /// Photon counts, `bins x channels` in row-major order
    pub signal: Vec<f64>,
    /// Polarisation calibration profile, never part of a measurement
    pub calibration: bool,
}

/// A fully loaded raw file. Immutable once read.
#[derive(Debug, Clone)]
pub struct RawMeasurementFile {
    path: PathBuf,
    range: TimeRange,
    record_duration: Duration,
    bins: usize,
    channels: usize,
    zenith_angle: f64,
    records: Vec<RawRecord>,
}

/// Path and coverage of a raw file, without its signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFileSummary {
    pub path: PathBuf,
    pub range: TimeRange,
}

impl RawFileSummary {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ds = open_dataset(path)?;
        let times = read_times(&ds, path)?;
        let duration = record_duration(&times, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            range: coverage(&times, duration, path)?,
        })
    }
}

impl RawMeasurementFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ds = open_dataset(path)?;
        Self::from_dataset(path, &ds)
    }

    pub fn from_dataset(path: &Path, ds: &Dataset) -> Result<Self> {
        let integrity = |message: String| {
            ConvertError::DataIntegrity(format!("{}: {}", path.display(), message))
        };
        let read_err = |source: NetCdfError| ConvertError::RawFile {
            path: path.to_path_buf(),
            source,
        };

        let times = read_times(ds, path)?;
        let record_duration = record_duration(&times, path)?;
        let range = coverage(&times, record_duration, path)?;

        let shape = ds.shape("raw_signal").map_err(read_err)?;
        let (bins, channels) = match shape.as_slice() {
            [n, bins, channels] if *n == times.len() => (*bins, *channels),
            other => {
                return Err(integrity(format!(
                    "raw_signal has shape {:?}, expected [{}, height, channel]",
                    other,
                    times.len()
                )))
            }
        };

        let signal = ds
            .values("raw_signal")
            .and_then(|v| v.to_f64_vec())
            .map_err(read_err)?;
        let shots = ds
            .values("measurement_shots")
            .and_then(|v| v.to_i64_vec())
            .map_err(read_err)?;
        if shots.len() != times.len() * channels {
            return Err(integrity(format!(
                "measurement_shots has {} values, expected {}",
                shots.len(),
                times.len() * channels
            )));
        }

        let calibration = match ds.variable("depol_cal_angle") {
            Some(_) => ds
                .values("depol_cal_angle")
                .and_then(|v| v.to_f64_vec())
                .map_err(read_err)?
                .into_iter()
                .map(|angle| angle != 0.0)
                .collect(),
            None => vec![false; times.len()],
        };
        if calibration.len() != times.len() {
            return Err(integrity("depol_cal_angle length differs from time".to_string()));
        }

        let zenith_angle = match ds.variable("zenithangle") {
            Some(_) => ds
                .values("zenithangle")
                .map_err(read_err)?
                .first_f64()
                .unwrap_or(0.0),
            None => 0.0,
        };

        let profile_len = bins * channels;
        let records = times
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| RawRecord {
                timestamp,
                shots: shots[i * channels..(i + 1) * channels]
                    .iter()
                    .map(|&s| s as i32)
                    .collect(),
                signal: signal[i * profile_len..(i + 1) * profile_len].to_vec(),
                calibration: calibration[i],
            })
            .collect();

        debug!(
            path = %path.display(),
            records = times.len(),
            bins = bins,
            channels = channels,
            "Loaded raw file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            range,
            record_duration,
            bins,
            channels,
            zenith_angle,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn record_duration(&self) -> Duration {
        self.record_duration
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn zenith_angle(&self) -> f64 {
        self.zenith_angle
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Drop every measurement record, keeping only calibration profiles.
    pub fn into_calibration_records(mut self) -> Self {
        self.records.retain(|r| r.calibration);
        self
    }
}

/// Collect `*.nc` files below `dir`, sorted by path.
pub fn discover_raw_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
        let entry = entry.map_err(|e| {
            ConvertError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        let is_nc = entry
            .path()
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("nc"));
        if entry.file_type().is_file() && is_nc {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn open_dataset(path: &Path) -> Result<Dataset> {
    Dataset::open(path).map_err(|source| ConvertError::RawFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_times(ds: &Dataset, path: &Path) -> Result<Vec<DateTime<Utc>>> {
    let raw = ds
        .values("measurement_time")
        .and_then(|v| v.to_i64_vec())
        .map_err(|source| ConvertError::RawFile {
            path: path.to_path_buf(),
            source,
        })?;

    let integrity =
        |message: String| ConvertError::DataIntegrity(format!("{}: {}", path.display(), message));

    if raw.len() % 2 != 0 {
        return Err(integrity("measurement_time must have two columns".to_string()));
    }

    let mut times = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks_exact(2) {
        let (ymd, seconds) = (pair[0], pair[1]);
        let date = NaiveDate::from_ymd_opt(
            (ymd / 10_000) as i32,
            ((ymd / 100) % 100) as u32,
            (ymd % 100) as u32,
        )
        .ok_or_else(|| integrity(format!("invalid measurement date {}", ymd)))?;
        if !(0..86_400).contains(&seconds) {
            return Err(integrity(format!("invalid seconds of day {}", seconds)));
        }
        let midnight = Utc.from_utc_datetime(&date.and_time(Default::default()));
        times.push(midnight + Duration::seconds(seconds));
    }

    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(integrity("records are not in increasing time order".to_string()));
    }

    Ok(times)
}

fn record_duration(times: &[DateTime<Utc>], path: &Path) -> Result<Duration> {
    match times {
        [] => Err(ConvertError::DataIntegrity(format!(
            "{}: file contains no records",
            path.display()
        ))),
        [_] => Ok(Duration::seconds(DEFAULT_RECORD_DURATION_SECS)),
        [first, second, ..] => Ok(*second - *first),
    }
}

fn coverage(times: &[DateTime<Utc>], duration: Duration, path: &Path) -> Result<TimeRange> {
    match (times.first(), times.last()) {
        (Some(&first), Some(&last)) => Ok(TimeRange::new(first, last + duration)),
        _ => Err(ConvertError::DataIntegrity(format!(
            "{}: file contains no records",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcdf_classic::{DatasetBuilder, Values};

    fn dataset(times: &[(i32, i32)], calibration: Option<Vec<f64>>) -> Dataset {
        let n = times.len();
        let mut b = DatasetBuilder::new();
        b.add_unlimited_dimension("time").unwrap();
        b.add_dimension("height", 2).unwrap();
        b.add_dimension("channel", 1).unwrap();
        b.add_dimension("date_time", 2).unwrap();
        b.add_variable(
            "raw_signal",
            &["time", "height", "channel"],
            Values::Int((0..(n * 2) as i32).collect()),
        )
        .unwrap();
        b.add_variable(
            "measurement_time",
            &["time", "date_time"],
            Values::Int(times.iter().flat_map(|&(d, s)| [d, s]).collect()),
        )
        .unwrap();
        b.add_variable("measurement_shots", &["time", "channel"], Values::Int(vec![600; n]))
            .unwrap();
        if let Some(angles) = calibration {
            b.add_variable("depol_cal_angle", &["time"], Values::Double(angles))
                .unwrap();
        }
        Dataset::from_bytes(b.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_reads_records_and_coverage() {
        let ds = dataset(&[(20230501, 28_800), (20230501, 28_830)], None);
        let file = RawMeasurementFile::from_dataset(Path::new("a.nc"), &ds).unwrap();

        assert_eq!(file.records().len(), 2);
        assert_eq!(file.bins(), 2);
        assert_eq!(file.channels(), 1);
        assert_eq!(file.record_duration(), Duration::seconds(30));
        assert_eq!(
            file.range(),
            TimeRange::new(
                Utc.with_ymd_and_hms(2023, 5, 1, 8, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 5, 1, 8, 1, 0).unwrap()
            )
        );
        assert_eq!(file.records()[1].signal, vec![2.0, 3.0]);
        assert_eq!(file.records()[1].shots, vec![600]);
        assert_eq!(file.zenith_angle(), 0.0);
    }

    #[test]
    fn test_single_record_uses_default_duration() {
        let ds = dataset(&[(20230501, 0)], None);
        let file = RawMeasurementFile::from_dataset(Path::new("a.nc"), &ds).unwrap();
        assert_eq!(file.range().duration(), Duration::seconds(DEFAULT_RECORD_DURATION_SECS));
    }

    #[test]
    fn test_calibration_records_are_flagged() {
        let ds = dataset(&[(20230501, 0), (20230501, 30)], Some(vec![0.0, 45.0]));
        let file = RawMeasurementFile::from_dataset(Path::new("a.nc"), &ds).unwrap();
        assert!(!file.records()[0].calibration);
        assert!(file.records()[1].calibration);
    }

    #[test]
    fn test_rejects_unordered_times() {
        let ds = dataset(&[(20230501, 30), (20230501, 0)], None);
        assert!(matches!(
            RawMeasurementFile::from_dataset(Path::new("a.nc"), &ds),
            Err(ConvertError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_date() {
        let ds = dataset(&[(20231301, 0)], None);
        assert!(RawMeasurementFile::from_dataset(Path::new("a.nc"), &ds).is_err());
    }

    #[test]
    fn test_discover_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("day2")).unwrap();
        std::fs::write(dir.path().join("b.nc"), b"").unwrap();
        std::fs::write(dir.path().join("day2").join("a.nc"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = discover_raw_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.extension().unwrap() == "nc"));
    }
}
