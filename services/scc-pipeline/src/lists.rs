//! CSV files exchanged between commands: upload lists and search exports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scc_client::MeasurementInfo;
use serde::{Deserialize, Serialize};

/// One row of an upload list, written by `upload --list` and read back by
/// `download --list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    #[serde(rename = "Filename")]
    pub filename: PathBuf,
    #[serde(rename = "Measurement_ID")]
    pub measurement_id: String,
    #[serde(rename = "Products_Downloaded")]
    pub products_downloaded: bool,
}

pub fn read_list(path: &Path) -> Result<Vec<ListEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open list file {}", path.display()))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<ListEntry>, _>>()
        .with_context(|| format!("Invalid list file {}", path.display()))
}

pub fn write_list(path: &Path, entries: &[ListEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create list file {}", path.display()))?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct SearchRow<'a> {
    id: &'a str,
    station_id: &'a str,
    start: &'a str,
    stop: &'a str,
    state: String,
    upload: i32,
    hirelpp: i32,
    cloudmask: i32,
    elpp: i32,
    elda: i32,
    elic: i32,
    is_running: bool,
}

/// Export search results, one measurement per row.
pub fn write_search_csv(path: &Path, measurements: &[MeasurementInfo]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for m in measurements {
        writer.serialize(SearchRow {
            id: &m.id,
            station_id: m.station_id.as_deref().unwrap_or(""),
            start: m.start.as_deref().unwrap_or(""),
            stop: m.stop.as_deref().unwrap_or(""),
            state: m.state().to_string(),
            upload: m.upload,
            hirelpp: m.hirelpp,
            cloudmask: m.cloudmask,
            elpp: m.elpp,
            elda: m.elda,
            elic: m.elic,
            is_running: m.is_running,
        })?;
    }
    writer.flush()?;
    Ok(())
}
