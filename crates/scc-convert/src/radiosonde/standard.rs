use chrono::{DateTime, Utc};
use lidar_common::Location;

use super::{RadiosondeProfile, RadiosondeProvider, SoundingSample};
use crate::error::SoundingError;

const SEA_LEVEL_TEMPERATURE_K: f64 = 288.15;
const SEA_LEVEL_PRESSURE_HPA: f64 = 1013.25;
const TROPOPAUSE_M: f64 = 11_000.0;
const TROPOPAUSE_TEMPERATURE_K: f64 = 216.65;
const TROPOPAUSE_PRESSURE_HPA: f64 = 226.321;
const STRATOPAUSE_LOWER_M: f64 = 20_000.0;
const STRATOPAUSE_LOWER_PRESSURE_HPA: f64 = 54.7489;
/// g * M / R, in K/m
const HYDROSTATIC_CONSTANT: f64 = 0.034_163_2;

/// ICAO standard atmosphere from the station altitude up to a ceiling.
pub struct StandardAtmosphereProvider {
    ceiling: f64,
    step: f64,
}

impl StandardAtmosphereProvider {
    pub fn new(ceiling: f64, step: f64) -> Result<Self, SoundingError> {
        if !(step > 0.0) || !(ceiling > 0.0) || ceiling > 32_000.0 {
            return Err(SoundingError::InvalidProfile(format!(
                "standard atmosphere needs 0 < ceiling <= 32000 m and step > 0, got {} / {}",
                ceiling, step
            )));
        }
        Ok(Self { ceiling, step })
    }
}

/// Temperature (K) and pressure (hPa) at a geometric altitude below 32 km.
fn icao(altitude: f64) -> (f64, f64) {
    if altitude <= TROPOPAUSE_M {
        let lapse = 0.0065;
        let t = SEA_LEVEL_TEMPERATURE_K - lapse * altitude;
        let p = SEA_LEVEL_PRESSURE_HPA
            * (t / SEA_LEVEL_TEMPERATURE_K).powf(HYDROSTATIC_CONSTANT / lapse);
        (t, p)
    } else if altitude <= STRATOPAUSE_LOWER_M {
        let p = TROPOPAUSE_PRESSURE_HPA
            * (-HYDROSTATIC_CONSTANT * (altitude - TROPOPAUSE_M) / TROPOPAUSE_TEMPERATURE_K).exp();
        (TROPOPAUSE_TEMPERATURE_K, p)
    } else {
        let lapse = -0.001;
        let t = TROPOPAUSE_TEMPERATURE_K - lapse * (altitude - STRATOPAUSE_LOWER_M);
        let p = STRATOPAUSE_LOWER_PRESSURE_HPA
            * (t / TROPOPAUSE_TEMPERATURE_K).powf(HYDROSTATIC_CONSTANT / lapse);
        (t, p)
    }
}

impl RadiosondeProvider for StandardAtmosphereProvider {
    fn name(&self) -> &str {
        "standard_atmosphere"
    }

    fn resolve(
        &self,
        timestamp: DateTime<Utc>,
        location: &Location,
    ) -> Result<RadiosondeProfile, SoundingError> {
        let base = location.altitude.max(0.0);
        let mut samples = Vec::new();
        let mut altitude = base;
        while altitude < self.ceiling {
            let (t, p) = icao(altitude);
            samples.push(SoundingSample {
                altitude,
                pressure: p,
                temperature: t - 273.15,
                relative_humidity: 0.0,
            });
            altitude += self.step;
        }
        let (t, p) = icao(self.ceiling);
        samples.push(SoundingSample {
            altitude: self.ceiling,
            pressure: p,
            temperature: t - 273.15,
            relative_humidity: 0.0,
        });

        RadiosondeProfile::new(timestamp, *location, samples)
    }
}
