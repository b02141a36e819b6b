//! Station fixtures.

use lidar_common::{Location, StationConfig};

/// Station `ABC` mapping SCC channels 1001/1002 to raw channels 0 and 2.
pub const STATION_YAML: &str = r#"
code: ABC
name: Antikythera
profile_name: ANTIKYTHERA
latitude: 35.8612
longitude: 23.3100
altitude: 193.0
pressure: 1013.25
temperature: 20.0
daytime_configuration: 590
nighttime_configuration: 591
channels:
  - scc_id: 1001
    raw_index: 0
    background_low: 0
    background_high: 3
  - scc_id: 1002
    raw_index: 2
    background_low: 0
    background_high: 3
    lr_input: 0
required_altitude:
  min: 200
  max: 12000
calibration:
  background_high: 3
  wavelengths:
    - wavelength: 355
      total_raw_index: 0
      cross_raw_index: 1
      scc_ids: [2001, 2002, 2003, 2004]
      configuration: 592
    - wavelength: 532
      total_raw_index: 2
      cross_raw_index: 1
      scc_ids: [2011, 2012, 2013, 2014]
      configuration: 593
"#;

pub fn test_station() -> StationConfig {
    // Fixture is a constant; a parse failure is a bug in this crate.
    serde_yaml::from_str(STATION_YAML).unwrap_or_else(|e| panic!("invalid station fixture: {e}"))
}

pub fn test_location() -> Location {
    test_station().location()
}

/// A registry file with the test station and a second station `XYZ`.
pub fn stations_yaml() -> String {
    let second = STATION_YAML
        .replace("code: ABC", "code: XYZ")
        .replace("name: Antikythera", "name: Other")
        .replace("profile_name: ANTIKYTHERA", "profile_name: OTHER");
    format!(
        "stations:\n{}{}",
        indent_as_list_item(STATION_YAML),
        indent_as_list_item(&second)
    )
}

fn indent_as_list_item(yaml: &str) -> String {
    yaml.trim()
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                format!("  - {}\n", line)
            } else {
                format!("    {}\n", line)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_fixture_is_valid() {
        let station = test_station();
        assert_eq!(station.code, "ABC");
        assert_eq!(station.calibration.as_ref().unwrap().wavelengths.len(), 2);
        station.validate().unwrap();
    }

    #[test]
    fn test_stations_yaml_parses() {
        #[derive(serde::Deserialize)]
        struct File {
            stations: Vec<StationConfig>,
        }
        let file: File = serde_yaml::from_str(&stations_yaml()).unwrap();
        assert_eq!(file.stations.len(), 2);
        assert_eq!(file.stations[1].code, "XYZ");
        assert_eq!(file.stations[1].channels.len(), 2);
    }
}
