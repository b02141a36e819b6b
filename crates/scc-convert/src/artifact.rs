//! SCC measurement artifacts: one NetCDF file per window plus an optional
//! companion sounding file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lidar_common::{Atmosphere, MeasurementId, StationConfig, TimeWindow};
use netcdf_classic::{DatasetBuilder, NetCdfError, NetCdfResult, Values};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result, SoundingError};
use crate::merge::MergedProfile;
use crate::radiosonde::{encode_sounding_file, RadiosondeProfile, RadiosondeProvider};

/// NetCDF default fill value for doubles, used for unset calibration ranges.
const FILL_DOUBLE: f64 = 9.969_209_968_386_869e36;

/// A submission-ready measurement. Owns its records and sounding snapshot.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    pub id: MeasurementId,
    pub window: TimeWindow,
    pub atmosphere: Atmosphere,
    /// SCC system (lidar configuration) the measurement is processed with
    pub system_id: i32,
    pub station: Arc<StationConfig>,
    pub profile: MergedProfile,
    pub sounding: Option<RadiosondeProfile>,
}

/// Result of persisting one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Written,
    /// An identical file was already present
    Unchanged,
}

/// Paths produced for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub sounding_path: Option<PathBuf>,
    pub status: FileStatus,
}

/// Assembles artifacts for one station.
pub struct ArtifactBuilder {
    station: Arc<StationConfig>,
    atmosphere: Atmosphere,
    provider: Option<Arc<dyn RadiosondeProvider>>,
}

impl ArtifactBuilder {
    pub fn new(
        station: Arc<StationConfig>,
        atmosphere: Atmosphere,
        provider: Option<Arc<dyn RadiosondeProvider>>,
    ) -> Self {
        Self {
            station,
            atmosphere,
            provider,
        }
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    pub fn station_arc(&self) -> &Arc<StationConfig> {
        &self.station
    }

    /// Identifier the artifact of `window` will carry.
    pub fn measurement_id(&self, window: &TimeWindow) -> MeasurementId {
        MeasurementId::for_window(&self.station.code, window)
    }

    /// Build the artifact for a merged, non-empty window.
    ///
    /// With the radiosonde atmosphere the provider is queried for the window
    /// start and the returned profile must cover the station's required
    /// altitude range.
    pub fn build(&self, profile: MergedProfile) -> Result<OutputArtifact> {
        let window = profile.window;
        if profile.is_empty() {
            return Err(ConvertError::Validation(format!(
                "window {} contains no measurement records",
                window
            )));
        }

        for channel in &self.station.channels {
            if channel.raw_index >= profile.channels {
                return Err(ConvertError::Validation(format!(
                    "station {} maps SCC channel {} to raw channel {}, but the raw files have {} channels",
                    self.station.code, channel.scc_id, channel.raw_index, profile.channels
                )));
            }
        }

        let sounding = if self.atmosphere.requires_sounding() {
            let provider = self.provider.as_ref().ok_or_else(|| SoundingError::NotFound {
                timestamp: window.start(),
                reason: "no radiosonde provider configured".to_string(),
            })?;
            let sounding = provider.resolve(window.start(), &self.station.location())?;
            sounding.check_coverage(&self.station.required_altitude)?;
            debug!(
                provider = provider.name(),
                launch = %sounding.timestamp,
                levels = sounding.samples().len(),
                "Matched sounding"
            );
            Some(sounding)
        } else {
            None
        };

        Ok(OutputArtifact {
            id: self.measurement_id(&window),
            window,
            atmosphere: self.atmosphere,
            system_id: self.station.system_id_for(window.start()),
            station: Arc::clone(&self.station),
            profile,
            sounding,
        })
    }
}

impl OutputArtifact {
    pub fn file_name(&self) -> String {
        self.id.artifact_file_name()
    }

    /// Encode the SCC raw data file.
    pub fn encode(&self) -> NetCdfResult<Vec<u8>> {
        let profile = &self.profile;
        let channels = &self.station.channels;
        let records = &profile.records;
        let n_channels = channels.len();
        let bins = profile.bins;

        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(NetCdfError::MissingData("measurement records".to_string())),
        };
        let stop = last + profile.record_duration;
        let duration_secs = profile.record_duration.num_seconds() as i32;

        let mut builder = DatasetBuilder::new();
        builder.add_dimension("points", bins)?;
        builder.add_dimension("channels", n_channels)?;
        builder.add_unlimited_dimension("time")?;
        builder.add_dimension("nb_of_time_scales", 1)?;
        builder.add_dimension("scan_angles", 1)?;

        let start_date = first.format("%Y%m%d").to_string();
        let start_time = first.format("%H%M%S").to_string();
        let stop_time = stop.format("%H%M%S").to_string();
        builder.add_attribute("Measurement_ID", Values::text(self.id.as_str()));
        builder.add_attribute("RawData_Start_Date", Values::text(&start_date));
        builder.add_attribute("RawData_Start_Time_UT", Values::text(&start_time));
        builder.add_attribute("RawData_Stop_Time_UT", Values::text(&stop_time));
        builder.add_attribute("RawBck_Start_Date", Values::text(&start_date));
        builder.add_attribute("RawBck_Start_Time_UT", Values::text(&start_time));
        builder.add_attribute("RawBck_Stop_Time_UT", Values::text(&stop_time));
        if self.atmosphere == Atmosphere::Radiosonde {
            builder.add_attribute(
                "Sounding_File_Name",
                Values::text(self.id.sounding_file_name()),
            );
        }
        builder.add_attribute("X_System_ID", Values::Int(vec![self.system_id]));

        let offsets: Vec<i32> = records
            .iter()
            .map(|r| (r.timestamp - first).num_seconds() as i32)
            .collect();
        builder.add_variable(
            "Raw_Data_Start_Time",
            &["time", "nb_of_time_scales"],
            Values::Int(offsets.clone()),
        )?;
        builder.add_variable(
            "Raw_Data_Stop_Time",
            &["time", "nb_of_time_scales"],
            Values::Int(offsets.iter().map(|o| o + duration_secs).collect()),
        )?;

        // Raw files store [bin][channel]; SCC expects [channel][bin].
        let mut signal = Vec::with_capacity(records.len() * n_channels * bins);
        for record in records {
            for channel in channels {
                signal.extend(
                    (0..bins).map(|bin| record.signal[bin * profile.channels + channel.raw_index]),
                );
            }
        }
        builder.add_variable(
            "Raw_Lidar_Data",
            &["time", "channels", "points"],
            Values::Double(signal),
        )?;

        builder.add_variable(
            "channel_ID",
            &["channels"],
            Values::Int(channels.iter().map(|c| c.scc_id).collect()),
        )?;
        builder.add_variable("id_timescale", &["channels"], Values::Int(vec![0; n_channels]))?;
        builder.add_variable(
            "Laser_Pointing_Angle",
            &["scan_angles"],
            Values::Double(vec![profile.zenith_angle]),
        )?;
        builder.add_variable(
            "Laser_Pointing_Angle_of_Profiles",
            &["time", "nb_of_time_scales"],
            Values::Int(vec![0; records.len()]),
        )?;
        builder.add_variable(
            "Laser_Shots",
            &["time", "channels"],
            Values::Int(
                records
                    .iter()
                    .flat_map(move |r| channels.iter().map(move |c| r.shots[c.raw_index]))
                    .collect(),
            ),
        )?;
        builder.add_variable(
            "Background_Low",
            &["channels"],
            Values::Double(channels.iter().map(|c| c.background_low).collect()),
        )?;
        builder.add_variable(
            "Background_High",
            &["channels"],
            Values::Double(channels.iter().map(|c| c.background_high).collect()),
        )?;
        builder.add_variable(
            "Molecular_Calc",
            &[],
            Values::Int(vec![self.atmosphere.molecular_calc()]),
        )?;
        builder.add_variable(
            "Pol_Calib_Range_Min",
            &["channels"],
            Values::Double(vec![FILL_DOUBLE; n_channels]),
        )?;
        builder.add_variable(
            "Pol_Calib_Range_Max",
            &["channels"],
            Values::Double(vec![FILL_DOUBLE; n_channels]),
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
        builder.add_variable(
            "LR_Input",
            &["channels"],
            Values::Int(channels.iter().map(|c| c.lr_input).collect()),
        )?;

        builder.encode()
    }

    /// Encode the companion `rs_<id>.nc` file, if the artifact carries a sounding.
    pub fn encode_sounding(&self) -> Option<NetCdfResult<Vec<u8>>> {
        self.sounding
            .as_ref()
            .map(|s| encode_sounding_file(s, &self.station.name))
    }

    /// Persist the artifact (and its sounding) below `output_dir`.
    ///
    /// Writing is idempotent: an identical file already on disk is left
    /// untouched and reported as [`FileStatus::Unchanged`].
    pub fn write(&self, output_dir: &Path) -> Result<WrittenArtifact> {
        fs::create_dir_all(output_dir)?;

        let path = output_dir.join(self.file_name());
        let status = write_atomic(&path, &self.encode()?)?;

        let sounding_path = match self.encode_sounding() {
            Some(bytes) => {
                let path = output_dir.join(self.id.sounding_file_name());
                write_atomic(&path, &bytes?)?;
                Some(path)
            }
            None => None,
        };

        Ok(WrittenArtifact {
            path,
            sounding_path,
            status,
        })
    }
}

/// Write through a `.partial` file and rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<FileStatus> {
    match fs::read(path) {
        Ok(existing) if existing == bytes => return Ok(FileStatus::Unchanged),
        Ok(_) => warn!(path = %path.display(), "Replacing existing file with different content"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{}.partial", file_name));
    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(FileStatus::Written)
}
