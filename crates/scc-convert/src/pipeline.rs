//! Batch conversion: resolve times, plan windows and build every window.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use lidar_common::{MeasurementId, TimeRange, TimeWindow};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactBuilder, FileStatus, WrittenArtifact};
use crate::calibration::{calibration_id, find_calibration_periods, CalibrationArtifact};
use crate::error::{ConvertError, Result};
use crate::merge::{merge_window, OverlapPolicy};
use crate::raw::{RawFileSummary, RawMeasurementFile};
use crate::timespec::{resolve_range, TimeSpec};

/// Options for one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub start: Option<TimeSpec>,
    pub end: Option<TimeSpec>,
    /// Window length; `None` produces a single window
    pub interval: Option<Duration>,
    /// Round the resolved start down to the full hour
    pub round_to_hour: bool,
    pub overlap_policy: OverlapPolicy,
    /// Number of windows built in parallel
    pub workers: usize,
    pub output_dir: PathBuf,
    /// Also write polarisation calibration files
    pub calibration: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            interval: None,
            round_to_hour: false,
            overlap_policy: OverlapPolicy::Reject,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            output_dir: PathBuf::from("."),
            calibration: true,
        }
    }
}

/// What happened to one window.
#[derive(Debug)]
pub enum WindowOutcome {
    Written(WrittenArtifact),
    /// Identical artifact already present
    Unchanged(WrittenArtifact),
    /// No measurement records inside the window
    Empty,
    Failed(ConvertError),
    /// Not started because the run was cancelled
    Cancelled,
}

#[derive(Debug)]
pub struct WindowResult {
    pub window: TimeWindow,
    pub id: MeasurementId,
    pub outcome: WindowOutcome,
}

/// One calibration file. Its outcome is never `Empty`.
#[derive(Debug)]
pub struct CalibrationResult {
    /// Calibration measurement id, wavelength suffix included
    pub id: String,
    /// 0 when the whole period failed before a wavelength was chosen
    pub wavelength: u32,
    pub period: TimeRange,
    pub outcome: WindowOutcome,
}

/// Per-window results of a run, in window order, then the calibration files.
#[derive(Debug, Default)]
pub struct ConversionReport {
    pub windows: Vec<WindowResult>,
    pub calibrations: Vec<CalibrationResult>,
}

impl ConversionReport {
    fn count(&self, f: impl Fn(&WindowOutcome) -> bool) -> usize {
        self.windows.iter().filter(|w| f(&w.outcome)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Written(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Unchanged(_)))
    }

    pub fn empty(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Empty))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Cancelled))
    }

    pub fn calibration_failed(&self) -> usize {
        self.calibrations
            .iter()
            .filter(|c| matches!(c.outcome, WindowOutcome::Failed(_)))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || self.calibration_failed() > 0
    }

    /// Artifacts present on disk after the run, written or unchanged.
    pub fn artifacts(&self) -> impl Iterator<Item = &WrittenArtifact> {
        self.windows.iter().filter_map(|w| match &w.outcome {
            WindowOutcome::Written(a) | WindowOutcome::Unchanged(a) => Some(a),
            _ => None,
        })
    }

    /// Calibration files present on disk after the run.
    pub fn calibration_files(&self) -> impl Iterator<Item = &WrittenArtifact> {
        self.calibrations.iter().filter_map(|c| match &c.outcome {
            WindowOutcome::Written(a) | WindowOutcome::Unchanged(a) => Some(a),
            _ => None,
        })
    }
}

/// Converts raw files into SCC artifacts for one station.
pub struct Converter {
    builder: ArtifactBuilder,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(builder: ArtifactBuilder, options: ConvertOptions) -> Self {
        Self { builder, options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Read the coverage of every raw file. Unreadable files are logged and skipped.
    pub fn scan(&self, files: &[PathBuf]) -> Result<Vec<RawFileSummary>> {
        let mut summaries: Vec<RawFileSummary> = files
            .iter()
            .filter_map(|path| match RawFileSummary::read(path) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Skipping unreadable raw file");
                    None
                }
            })
            .collect();

        if summaries.is_empty() {
            return Err(ConvertError::Validation(
                "none of the input files could be read".to_string(),
            ));
        }
        summaries.sort_by_key(|s| s.range.start);
        Ok(summaries)
    }

    /// Resolve the configured start/end against the files.
    pub fn resolve(&self, summaries: &[RawFileSummary]) -> Result<TimeRange> {
        let coverage: Vec<TimeRange> = summaries.iter().map(|s| s.range).collect();
        resolve_range(
            self.options.start.as_ref(),
            self.options.end.as_ref(),
            &coverage,
            self.options.round_to_hour,
        )
    }

    /// Resolve the configured start/end and plan the windows.
    pub fn plan(&self, summaries: &[RawFileSummary]) -> Result<Vec<TimeWindow>> {
        let range = self.resolve(summaries)?;
        crate::planner::plan_windows(range.start, range.end, self.options.interval)
    }

    /// Convert `files` into artifacts.
    ///
    /// Failures are recorded per window and never abort the run. Once
    /// `cancel` is set no further windows are started.
    pub fn run(&self, files: &[PathBuf], cancel: &AtomicBool) -> Result<ConversionReport> {
        let started = Instant::now();
        let summaries = self.scan(files)?;
        let range = self.resolve(&summaries)?;
        let windows = crate::planner::plan_windows(range.start, range.end, self.options.interval)?;

        let ids: Vec<MeasurementId> = windows
            .iter()
            .map(|w| self.builder.measurement_id(w))
            .collect();
        let mut occurrences: HashMap<&MeasurementId, usize> = HashMap::new();
        for id in &ids {
            *occurrences.entry(id).or_default() += 1;
        }

        info!(
            station = %self.builder.station().code,
            files = summaries.len(),
            windows = windows.len(),
            workers = self.options.workers,
            "Starting conversion"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|e| {
                ConvertError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;

        let results: Vec<WindowResult> = pool.install(|| {
            windows
                .par_iter()
                .zip(ids.par_iter())
                .map(|(window, id)| {
                    let outcome = if cancel.load(Ordering::SeqCst) {
                        WindowOutcome::Cancelled
                    } else if occurrences[id] > 1 {
                        WindowOutcome::Failed(ConvertError::DuplicateIdentifier(id.clone()))
                    } else {
                        self.convert_window(window, &summaries)
                    };
                    log_outcome(window, id, &outcome);
                    WindowResult {
                        window: *window,
                        id: id.clone(),
                        outcome,
                    }
                })
                .collect()
        });

        let calibrations = if self.options.calibration {
            self.convert_calibrations(&range, &summaries, cancel)
        } else {
            Vec::new()
        };

        let report = ConversionReport {
            windows: results,
            calibrations,
        };
        info!(
            written = report.written(),
            unchanged = report.unchanged(),
            empty = report.empty(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            calibrations = report.calibrations.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Conversion finished"
        );
        Ok(report)
    }

    /// Merge, build and write a single window.
    pub fn convert_window(&self, window: &TimeWindow, summaries: &[RawFileSummary]) -> WindowOutcome {
        match self.try_convert_window(window, summaries) {
            Ok(Some(written)) if written.status == FileStatus::Unchanged => {
                WindowOutcome::Unchanged(written)
            }
            Ok(Some(written)) => WindowOutcome::Written(written),
            Ok(None) => WindowOutcome::Empty,
            Err(e) => WindowOutcome::Failed(e),
        }
    }

    fn try_convert_window(
        &self,
        window: &TimeWindow,
        summaries: &[RawFileSummary],
    ) -> Result<Option<WrittenArtifact>> {
        let files = summaries
            .iter()
            .filter(|s| window.intersects(&s.range))
            .map(|s| RawMeasurementFile::open(&s.path))
            .collect::<Result<Vec<_>>>()?;

        let profile = merge_window(window, &files, self.options.overlap_policy)?;
        drop(files);
        if profile.is_empty() {
            return Ok(None);
        }

        let artifact = self.builder.build(profile)?;
        artifact.write(&self.options.output_dir).map(Some)
    }

    /// Write the calibration files of every complete calibration period
    /// strictly inside `range`.
    ///
    /// Incomplete periods are skipped with a warning. A second period in the
    /// same hour would reuse the id of the first and fails.
    pub fn convert_calibrations(
        &self,
        range: &TimeRange,
        summaries: &[RawFileSummary],
        cancel: &AtomicBool,
    ) -> Vec<CalibrationResult> {
        let station = self.builder.station_arc();
        if station.calibration.is_none() {
            debug!(station = %station.code, "No calibration settings, skipping calibration files");
            return Vec::new();
        }

        let files: Vec<RawMeasurementFile> = summaries
            .iter()
            .filter(|s| range.intersects(&s.range))
            .filter_map(|s| match RawMeasurementFile::open(&s.path) {
                Ok(file) => Some(file.into_calibration_records()),
                Err(e) => {
                    error!(path = %s.path.display(), error = %e, "Skipping raw file for calibration");
                    None
                }
            })
            .collect();

        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for period in find_calibration_periods(&files) {
            if !period.is_inside(range) {
                debug!(period = %period.range, "Calibration period outside converted range");
                continue;
            }
            if !period.is_complete() {
                warn!(
                    period = %period.range,
                    records = period.records.len(),
                    "Incomplete calibration period, skipping"
                );
                continue;
            }

            let period_range = period.range;
            let artifacts = match CalibrationArtifact::for_period(station, Arc::new(period)) {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    warn!(period = %period_range, error = %e, "Calibration period failed");
                    results.push(CalibrationResult {
                        id: calibration_id(&station.code, period_range.start),
                        wavelength: 0,
                        period: period_range,
                        outcome: WindowOutcome::Failed(e),
                    });
                    continue;
                }
            };

            for artifact in artifacts {
                let id = artifact.measurement_id();
                let outcome = if cancel.load(Ordering::SeqCst) {
                    WindowOutcome::Cancelled
                } else if !seen.insert(id.clone()) {
                    WindowOutcome::Failed(ConvertError::Validation(format!(
                        "calibration id {} is produced by more than one period",
                        id
                    )))
                } else {
                    match artifact.write(&self.options.output_dir) {
                        Ok(written) if written.status == FileStatus::Unchanged => {
                            WindowOutcome::Unchanged(written)
                        }
                        Ok(written) => WindowOutcome::Written(written),
                        Err(e) => WindowOutcome::Failed(e),
                    }
                };
                match &outcome {
                    WindowOutcome::Written(a) | WindowOutcome::Unchanged(a) => {
                        info!(id = %id, path = %a.path.display(), "Calibration file ready")
                    }
                    WindowOutcome::Failed(e) => warn!(id = %id, error = %e, "Calibration file failed"),
                    _ => {}
                }
                results.push(CalibrationResult {
                    id,
                    wavelength: artifact.wavelength(),
                    period: period_range,
                    outcome,
                });
            }
        }
        results
    }
}

fn log_outcome(window: &TimeWindow, id: &MeasurementId, outcome: &WindowOutcome) {
    match outcome {
        WindowOutcome::Written(a) => info!(
            window = %window,
            id = %id,
            path = %a.path.display(),
            "Wrote measurement"
        ),
        WindowOutcome::Unchanged(a) => info!(
            window = %window,
            id = %id,
            path = %a.path.display(),
            "Measurement already up to date"
        ),
        WindowOutcome::Empty => info!(window = %window, "No data in window, skipping"),
        WindowOutcome::Failed(e) => warn!(window = %window, id = %id, error = %e, "Window failed"),
        WindowOutcome::Cancelled => {}
    }
}
