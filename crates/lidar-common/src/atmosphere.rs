//! Molecular atmosphere selection for SCC processing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LidarError;

/// Which atmosphere the SCC uses for the molecular calculation.
///
/// The discriminant is the value written to `Molecular_Calc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atmosphere {
    Automatic,
    Radiosonde,
    Cloudnet,
    Standard,
}

impl Atmosphere {
    pub fn molecular_calc(&self) -> i32 {
        match self {
            Atmosphere::Automatic => 0,
            Atmosphere::Radiosonde => 1,
            Atmosphere::Cloudnet => 2,
            Atmosphere::Standard => 4,
        }
    }

    /// Only the radiosonde atmosphere needs a matched sounding profile.
    pub fn requires_sounding(&self) -> bool {
        matches!(self, Atmosphere::Radiosonde)
    }
}

impl Default for Atmosphere {
    fn default() -> Self {
        Atmosphere::Radiosonde
    }
}

impl FromStr for Atmosphere {
    type Err = LidarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "automatic" => Ok(Atmosphere::Automatic),
            "radiosonde" => Ok(Atmosphere::Radiosonde),
            "cloudnet" => Ok(Atmosphere::Cloudnet),
            "standard" => Ok(Atmosphere::Standard),
            _ => Err(LidarError::UnknownAtmosphere(s.to_string())),
        }
    }
}

impl fmt::Display for Atmosphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Atmosphere::Automatic => "automatic",
            Atmosphere::Radiosonde => "radiosonde",
            Atmosphere::Cloudnet => "cloudnet",
            Atmosphere::Standard => "standard",
        };
        f.write_str(name)
    }
}
