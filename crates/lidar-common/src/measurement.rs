//! Deterministic measurement identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LidarError;
use crate::time::TimeWindow;

/// Identifier of one output artifact / remote measurement.
///
/// Locally built identifiers follow `<station><YYYYMMDD><startHHMM><endHHMM>`,
/// using the window start date. Identifiers observed on the remote service
/// are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(String);

impl MeasurementId {
    pub fn for_window(station_code: &str, window: &TimeWindow) -> Self {
        Self(format!(
            "{}{}{}{}",
            station_code,
            window.start().format("%Y%m%d"),
            window.start().format("%H%M"),
            window.end().format("%H%M"),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the raw-data artifact.
    pub fn artifact_file_name(&self) -> String {
        format!("{}.nc", self.0)
    }

    /// File name of the companion sounding file.
    pub fn sounding_file_name(&self) -> String {
        format!("rs_{}.nc", self.0)
    }
}

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MeasurementId {
    type Err = LidarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LidarError::InvalidMeasurementId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for MeasurementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
