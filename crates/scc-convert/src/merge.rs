//! Merges the records of several raw files into one window.

use std::path::PathBuf;

use chrono::Duration;
use lidar_common::TimeWindow;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::raw::{RawMeasurementFile, RawRecord, DEFAULT_RECORD_DURATION_SECS};

/// How to treat two files that hold different data for the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Report a data integrity error
    #[default]
    Reject,
    /// Keep the record of the file listed last
    LastWriteWins,
}

/// Records of one window, in chronological order.
#[derive(Debug, Clone)]
pub struct MergedProfile {
    pub window: TimeWindow,
    pub bins: usize,
    pub channels: usize,
    pub record_duration: Duration,
    pub zenith_angle: f64,
    pub records: Vec<RawRecord>,
    /// Files that contributed at least one record
    pub sources: Vec<PathBuf>,
}

impl MergedProfile {
    fn empty(window: TimeWindow) -> Self {
        Self {
            window,
            bins: 0,
            channels: 0,
            record_duration: Duration::seconds(DEFAULT_RECORD_DURATION_SECS),
            zenith_angle: 0.0,
            records: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Extract the records of `files` that fall inside `window`.
///
/// Files that do not intersect the window are ignored. Calibration records
/// are dropped. Identical records at the same timestamp are kept once;
/// differing ones are resolved by `policy`. No intersecting data yields an
/// empty profile.
pub fn merge_window(
    window: &TimeWindow,
    files: &[RawMeasurementFile],
    policy: OverlapPolicy,
) -> Result<MergedProfile> {
    let selected: Vec<&RawMeasurementFile> = files
        .iter()
        .filter(|f| window.intersects(&f.range()))
        .collect();

    let Some(reference) = selected.first() else {
        return Ok(MergedProfile::empty(*window));
    };

    for file in &selected[1..] {
        if file.bins() != reference.bins() || file.channels() != reference.channels() {
            return Err(ConvertError::DataIntegrity(format!(
                "{} has {} bins x {} channels but {} has {} x {}",
                file.path().display(),
                file.bins(),
                file.channels(),
                reference.path().display(),
                reference.bins(),
                reference.channels()
            )));
        }
    }

    let mut candidates: Vec<(usize, &RawRecord)> = selected
        .iter()
        .enumerate()
        .flat_map(|(i, file)| file.records().iter().map(move |r| (i, r)))
        .filter(|(_, r)| !r.calibration && window.contains(&r.timestamp))
        .collect();
    // Stable, so for equal timestamps the later file stays last.
    candidates.sort_by_key(|(_, r)| r.timestamp);

    let mut merged: Vec<(usize, &RawRecord)> = Vec::with_capacity(candidates.len());
    for (source, record) in candidates {
        match merged.last_mut() {
            Some((prev_source, prev)) if prev.timestamp == record.timestamp => {
                if *prev == record {
                    continue;
                }
                match policy {
                    OverlapPolicy::Reject => {
                        return Err(ConvertError::DataIntegrity(format!(
                            "{} and {} hold different data for {}",
                            selected[*prev_source].path().display(),
                            selected[source].path().display(),
                            record.timestamp.format("%Y-%m-%d %H:%M:%S")
                        )))
                    }
                    OverlapPolicy::LastWriteWins => {
                        *prev_source = source;
                        *prev = record;
                    }
                }
            }
            _ => merged.push((source, record)),
        }
    }

    let mut contributing: Vec<usize> = merged.iter().map(|(s, _)| *s).collect();
    contributing.sort_unstable();
    contributing.dedup();

    debug!(
        window = %window,
        files = selected.len(),
        records = merged.len(),
        "Merged window"
    );

    Ok(MergedProfile {
        window: *window,
        bins: reference.bins(),
        channels: reference.channels(),
        record_duration: reference.record_duration(),
        zenith_angle: reference.zenith_angle(),
        records: merged.into_iter().map(|(_, r)| r.clone()).collect(),
        sources: contributing
            .into_iter()
            .map(|i| selected[i].path().to_path_buf())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use netcdf_classic::Dataset;
    use std::path::Path;
    use test_utils::{expected_signal, RawFileSpec};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, h, m, 0).unwrap()
    }

    fn load(name: &str, spec: RawFileSpec) -> RawMeasurementFile {
        let ds = Dataset::from_bytes(spec.encode().unwrap()).unwrap();
        RawMeasurementFile::from_dataset(Path::new(name), &ds).unwrap()
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow::new(start, end).unwrap()
    }

    #[test]
    fn test_window_spanning_two_files() {
        let files = vec![
            load("a.nc", RawFileSpec::covering(at(8, 0), at(9, 0))),
            load("b.nc", RawFileSpec::covering(at(9, 0), at(10, 0))),
        ];
        let merged = merge_window(&window(at(8, 30), at(9, 30)), &files, OverlapPolicy::Reject)
            .unwrap();

        assert_eq!(merged.len(), 120);
        assert_eq!(merged.records[0].timestamp, at(8, 30));
        assert_eq!(
            merged.records.last().unwrap().timestamp,
            at(9, 29) + Duration::seconds(30)
        );
        assert!(merged
            .records
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(merged.sources.len(), 2);
        assert_eq!((merged.bins, merged.channels), (4, 3));
    }

    #[test]
    fn test_window_outside_files_is_empty() {
        let files = vec![load("a.nc", RawFileSpec::covering(at(8, 0), at(9, 0)))];
        let merged =
            merge_window(&window(at(12, 0), at(13, 0)), &files, OverlapPolicy::Reject).unwrap();
        assert!(merged.is_empty());
        assert!(merged.sources.is_empty());
    }

    #[test]
    fn test_identical_overlap_is_deduplicated() {
        let files = vec![
            load("a.nc", RawFileSpec::covering(at(8, 0), at(8, 40))),
            load("b.nc", RawFileSpec::covering(at(8, 20), at(9, 0))),
        ];
        let merged =
            merge_window(&window(at(8, 0), at(9, 0)), &files, OverlapPolicy::Reject).unwrap();
        assert_eq!(merged.len(), 120);
    }

    #[test]
    fn test_conflicting_overlap() {
        let files = vec![
            load("a.nc", RawFileSpec::covering(at(8, 0), at(8, 40))),
            load(
                "b.nc",
                RawFileSpec::covering(at(8, 20), at(9, 0)).signal_offset(1.0),
            ),
        ];
        let w = window(at(8, 0), at(9, 0));

        let err = merge_window(&w, &files, OverlapPolicy::Reject).unwrap_err();
        assert!(matches!(err, ConvertError::DataIntegrity(_)));

        let merged = merge_window(&w, &files, OverlapPolicy::LastWriteWins).unwrap();
        assert_eq!(merged.len(), 120);
        let overlapped = merged
            .records
            .iter()
            .find(|r| r.timestamp == at(8, 30))
            .unwrap();
        assert_eq!(overlapped.signal[0], expected_signal(at(8, 30), 0, 0, 1.0));
    }

    #[test]
    fn test_calibration_records_are_dropped() {
        let files = vec![load(
            "a.nc",
            RawFileSpec::new(at(8, 0), 4).calibration_record(1),
        )];
        let merged =
            merge_window(&window(at(8, 0), at(8, 2)), &files, OverlapPolicy::Reject).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.records.iter().all(|r| !r.calibration));
    }

    #[test]
    fn test_mismatched_geometry_is_rejected() {
        let files = vec![
            load("a.nc", RawFileSpec::covering(at(8, 0), at(9, 0))),
            load("b.nc", RawFileSpec::covering(at(9, 0), at(10, 0)).bins(8)),
        ];
        let err = merge_window(&window(at(8, 30), at(9, 30)), &files, OverlapPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, ConvertError::DataIntegrity(_)));
    }
}
