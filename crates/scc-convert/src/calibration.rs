//! Polarisation calibration files.
//!
//! A calibration period is a run of consecutive calibration records. Each
//! calibration file holds three cycles: cycle `i` pairs the record at offset
//! `i` of the period (+45 degrees) with the record at offset `12 + i`
//! (-45 degrees). One file is written per configured wavelength.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lidar_common::{CalibrationChannels, CalibrationConfig, StationConfig, TimeRange};
use netcdf_classic::{DatasetBuilder, NetCdfError, NetCdfResult, Values};
use tracing::{debug, warn};

use crate::artifact::{write_atomic, WrittenArtifact};
use crate::error::{ConvertError, Result};
use crate::raw::{RawMeasurementFile, RawRecord};

pub const CALIBRATION_CYCLES: usize = 3;

/// Records between the +45 and -45 degree positions of a period.
pub const SECOND_POSITION_OFFSET: usize = 12;

/// Consecutive calibration records, in chronological order.
#[derive(Debug, Clone)]
pub struct CalibrationPeriod {
    /// From the first record to the end of the last one
    pub range: TimeRange,
    pub bins: usize,
    pub channels: usize,
    pub record_duration: Duration,
    pub zenith_angle: f64,
    pub records: Vec<RawRecord>,
}

impl CalibrationPeriod {
    pub fn start(&self) -> DateTime<Utc> {
        self.range.start
    }

    /// True if every cycle has a record at both polarisation positions.
    pub fn is_complete(&self) -> bool {
        self.records.len() >= SECOND_POSITION_OFFSET + CALIBRATION_CYCLES
    }

    /// True if the period lies strictly inside `range`.
    pub fn is_inside(&self, range: &TimeRange) -> bool {
        self.range.start > range.start && self.range.end < range.end
    }
}

/// Group the calibration records of `files` into periods.
///
/// Records further apart than two record lengths start a new period. For a
/// timestamp present in several files the first file wins. Files whose
/// shape differs from the first file are skipped.
pub fn find_calibration_periods(files: &[RawMeasurementFile]) -> Vec<CalibrationPeriod> {
    let Some(reference) = files.first() else {
        return Vec::new();
    };

    let mut records: Vec<&RawRecord> = Vec::new();
    for file in files {
        if file.bins() != reference.bins() || file.channels() != reference.channels() {
            warn!(
                path = %file.path().display(),
                reference = %reference.path().display(),
                "Raw file shape differs, ignoring its calibration records"
            );
            continue;
        }
        records.extend(file.records().iter().filter(|r| r.calibration));
    }
    // Stable, so the first file stays first on equal timestamps.
    records.sort_by_key(|r| r.timestamp);
    records.dedup_by_key(|r| r.timestamp);

    let duration = reference.record_duration();
    let mut runs: Vec<Vec<RawRecord>> = Vec::new();
    for record in records {
        match runs.last_mut() {
            Some(run)
                if run
                    .last()
                    .map_or(false, |last| record.timestamp - last.timestamp <= duration * 2) =>
            {
                run.push(record.clone())
            }
            _ => runs.push(vec![record.clone()]),
        }
    }

    runs.into_iter()
        .filter_map(|records| {
            let start = records.first()?.timestamp;
            let end = records.last()?.timestamp + duration;
            Some(CalibrationPeriod {
                range: TimeRange::new(start, end),
                bins: reference.bins(),
                channels: reference.channels(),
                record_duration: duration,
                zenith_angle: reference.zenith_angle(),
                records,
            })
        })
        .collect()
}

/// Identifier of the calibration measurements of a period: `<YYYYMMDD><code><HH>`.
pub fn calibration_id(station_code: &str, start: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        start.format("%Y%m%d"),
        station_code,
        start.format("%H")
    )
}

/// One calibration file for one wavelength.
#[derive(Debug, Clone)]
pub struct CalibrationArtifact {
    pub id: String,
    pub channels: CalibrationChannels,
    pub settings: CalibrationConfig,
    pub station: Arc<StationConfig>,
    pub period: Arc<CalibrationPeriod>,
}

impl CalibrationArtifact {
    /// One artifact per configured wavelength. A station without calibration
    /// settings yields none.
    pub fn for_period(
        station: &Arc<StationConfig>,
        period: Arc<CalibrationPeriod>,
    ) -> Result<Vec<CalibrationArtifact>> {
        let Some(settings) = &station.calibration else {
            return Ok(Vec::new());
        };
        if !period.is_complete() {
            return Err(ConvertError::Validation(format!(
                "calibration period {} has {} records, {} are required",
                period.range,
                period.records.len(),
                SECOND_POSITION_OFFSET + CALIBRATION_CYCLES
            )));
        }

        let id = calibration_id(&station.code, period.start());
        settings
            .wavelengths
            .iter()
            .map(|channels| {
                let highest = channels.total_raw_index.max(channels.cross_raw_index);
                if highest >= period.channels {
                    return Err(ConvertError::Validation(format!(
                        "station {} calibrates {} nm with raw channel {}, but the raw files have {} channels",
                        station.code, channels.wavelength, highest, period.channels
                    )));
                }
                Ok(CalibrationArtifact {
                    id: id.clone(),
                    channels: channels.clone(),
                    settings: settings.clone(),
                    station: Arc::clone(station),
                    period: Arc::clone(&period),
                })
            })
            .collect()
    }

    pub fn wavelength(&self) -> u32 {
        self.channels.wavelength
    }

    pub fn measurement_id(&self) -> String {
        format!("{}{}", self.id, self.channels.id_suffix())
    }

    pub fn file_name(&self) -> String {
        format!("calibration_{}_{}.nc", self.id, self.channels.wavelength)
    }

    pub fn encode(&self) -> NetCdfResult<Vec<u8>> {
        let period = &self.period;
        if !period.is_complete() {
            return Err(NetCdfError::MissingData(format!(
                "calibration records of {}",
                period.range
            )));
        }
        let records = &period.records;
        let first = period.range.start;
        let duration_secs = period.record_duration.num_seconds() as i32;
        let offset = |r: &RawRecord| (r.timestamp - first).num_seconds() as i32;
        let (cross, total) = (self.channels.cross_raw_index, self.channels.total_raw_index);

        let mut start_times = Vec::with_capacity(CALIBRATION_CYCLES);
        let mut stop_times = Vec::with_capacity(CALIBRATION_CYCLES);
        let mut signal = Vec::with_capacity(CALIBRATION_CYCLES * 4 * period.bins);
        let mut shots = Vec::with_capacity(CALIBRATION_CYCLES * 4);
        for cycle in 0..CALIBRATION_CYCLES {
            let plus = &records[cycle];
            let minus = &records[SECOND_POSITION_OFFSET + cycle];
            start_times.push(offset(plus));
            stop_times.push(offset(minus) + duration_secs);

            for (record, raw_index) in [(plus, cross), (plus, total), (minus, cross), (minus, total)] {
                signal.extend(
                    (0..period.bins).map(|bin| record.signal[bin * period.channels + raw_index]),
                );
                shots.push(record.shots[raw_index]);
            }
        }

        let mut builder = DatasetBuilder::new();
        builder.add_dimension("points", period.bins)?;
        builder.add_dimension("channels", 4)?;
        builder.add_unlimited_dimension("time")?;
        builder.add_dimension("nb_of_time_scales", 1)?;
        builder.add_dimension("scan_angles", 1)?;

        let start_date = first.format("%Y%m%d").to_string();
        let start_time = first.format("%H%M%S").to_string();
        let stop_time = period.range.end.format("%H%M%S").to_string();
        builder.add_attribute("Measurement_ID", Values::text(self.measurement_id()));
        builder.add_attribute("RawData_Start_Date", Values::text(&start_date));
        builder.add_attribute("RawData_Start_Time_UT", Values::text(&start_time));
        builder.add_attribute("RawData_Stop_Time_UT", Values::text(&stop_time));
        builder.add_attribute("RawBck_Start_Date", Values::text(&start_date));
        builder.add_attribute("RawBck_Start_Time_UT", Values::text(&start_time));
        builder.add_attribute("RawBck_Stop_Time_UT", Values::text(&stop_time));
        builder.add_attribute("X_System_ID", Values::Int(vec![self.channels.configuration]));

        builder.add_variable(
            "Raw_Data_Start_Time",
            &["time", "nb_of_time_scales"],
            Values::Int(start_times),
        )?;
        builder.add_variable(
            "Raw_Data_Stop_Time",
            &["time", "nb_of_time_scales"],
            Values::Int(stop_times),
        )?;
        builder.add_variable(
            "Raw_Lidar_Data",
            &["time", "channels", "points"],
            Values::Double(signal),
        )?;
        builder.add_variable(
            "channel_ID",
            &["channels"],
            Values::Int(self.channels.scc_ids.to_vec()),
        )?;
        builder.add_variable("id_timescale", &["channels"], Values::Int(vec![0; 4]))?;
        builder.add_variable(
            "Laser_Pointing_Angle",
            &["scan_angles"],
            Values::Double(vec![period.zenith_angle]),
        )?;
        builder.add_variable(
            "Laser_Pointing_Angle_of_Profiles",
            &["time", "nb_of_time_scales"],
            Values::Int(vec![0; CALIBRATION_CYCLES]),
        )?;
        builder.add_variable("Laser_Shots", &["time", "channels"], Values::Int(shots))?;
        builder.add_variable(
            "Background_Low",
            &["channels"],
            Values::Double(vec![self.settings.background_low; 4]),
        )?;
        builder.add_variable(
            "Background_High",
            &["channels"],
            Values::Double(vec![self.settings.background_high; 4]),
        )?;
        builder.add_variable("Molecular_Calc", &[], Values::Int(vec![0]))?;
        builder.add_variable(
            "Pol_Calib_Range_Min",
            &["channels"],
            Values::Double(vec![self.settings.range_min; 4]),
        )?;
        builder.add_variable(
            "Pol_Calib_Range_Max",
            &["channels"],
            Values::Double(vec![self.settings.range_max; 4]),
        )?;
        builder.add_variable(
            "Pressure_at_Lidar_Station",
            &[],
            Values::Double(vec![self.station.pressure]),
        )?;
        builder.add_variable(
            "Temperature_at_Lidar_Station",
            &[],
            Values::Double(vec![self.station.temperature]),
        )?;

        builder.encode()
    }

    /// Persist the file below `output_dir`, leaving an identical file untouched.
    pub fn write(&self, output_dir: &Path) -> Result<WrittenArtifact> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(self.file_name());
        let status = write_atomic(&path, &self.encode()?)?;
        debug!(id = %self.measurement_id(), path = %path.display(), "Wrote calibration file");
        Ok(WrittenArtifact {
            path,
            sounding_path: None,
            status,
        })
    }
}
