//! Time boundary expressions and their resolution against raw file coverage.
//!
//! Accepted forms:
//! - `YYYY-MM-DD_HH:MM`, `YYYY-MM-DDTHH:MM[:SS][Z]`, `YYYY-MM-DD HH:MM[:SS]`: absolute UTC time
//! - `YYYY-MM-DD`: first (start) or last (end) available instant of that date
//! - `XX:MM`: first available instant whose minute of hour is `MM`
//! - `HH:MM`: that time on the first (start) or last (end) day with data

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use lidar_common::TimeRange;

use crate::error::{ConvertError, Result};

const ABSOLUTE_FORMATS: &[&str] = &[
    "%Y-%m-%d_%H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// A time boundary as typed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Absolute(DateTime<Utc>),
    Date(NaiveDate),
    /// `XX:MM`
    RelativeMinute(u32),
    /// `HH:MM`
    TimeOfDay(NaiveTime),
}

/// Which end of the range a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl FromStr for TimeSpec {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || ConvertError::Validation(format!("invalid time specification '{}'", s));

        if let Some(minute) = s.strip_prefix("XX:").or_else(|| s.strip_prefix("xx:")) {
            if minute.len() != 2 {
                return Err(invalid());
            }
            let minute: u32 = minute.parse().map_err(|_| invalid())?;
            if minute >= 60 {
                return Err(invalid());
            }
            return Ok(TimeSpec::RelativeMinute(minute));
        }

        if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M") {
            return Ok(TimeSpec::TimeOfDay(time));
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(TimeSpec::Date(date));
        }

        let naive = s.strip_suffix('Z').unwrap_or(s);
        ABSOLUTE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
            .map(|dt| TimeSpec::Absolute(Utc.from_utc_datetime(&dt)))
            .ok_or_else(invalid)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpec::Absolute(dt) => write!(f, "{}", dt.format("%Y-%m-%d_%H:%M:%S")),
            TimeSpec::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            TimeSpec::RelativeMinute(minute) => write!(f, "XX:{:02}", minute),
            TimeSpec::TimeOfDay(time) => write!(f, "{}", time.format("%H:%M")),
        }
    }
}

impl TimeSpec {
    /// Resolve this boundary to a concrete instant.
    ///
    /// `coverage` holds the time ranges of the candidate raw files. For an end
    /// boundary, `after` is the already resolved start.
    pub fn resolve(
        &self,
        boundary: Boundary,
        coverage: &[TimeRange],
        after: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        let (earliest, latest) = envelope(coverage)?;

        match *self {
            TimeSpec::Absolute(dt) => check_in_envelope(dt, boundary, earliest, latest),
            TimeSpec::TimeOfDay(time) => {
                let date = match boundary {
                    Boundary::Start => earliest.date_naive(),
                    Boundary::End => (latest - Duration::seconds(1)).date_naive(),
                };
                let dt = Utc.from_utc_datetime(&date.and_time(time));
                check_in_envelope(dt, boundary, earliest, latest)
            }
            TimeSpec::Date(date) => resolve_date(date, boundary, coverage),
            TimeSpec::RelativeMinute(minute) => {
                resolve_minute(minute, boundary, coverage, after, earliest, latest)
            }
        }
    }
}

/// Resolve an optional start/end pair against the raw file coverage.
///
/// A missing start means the beginning of the data, a missing end its last
/// instant. An end without a start is rejected.
pub fn resolve_range(
    start: Option<&TimeSpec>,
    end: Option<&TimeSpec>,
    coverage: &[TimeRange],
    round_to_hour: bool,
) -> Result<TimeRange> {
    let (earliest, latest) = envelope(coverage)?;

    let start = match (start, end) {
        (None, Some(_)) => {
            return Err(ConvertError::Validation(
                "an end time requires a start time".to_string(),
            ))
        }
        (None, None) => earliest,
        (Some(spec), _) => spec.resolve(Boundary::Start, coverage, None)?,
    };
    let start = if round_to_hour { floor_hour(start) } else { start };

    let end = match end {
        Some(spec) => spec.resolve(Boundary::End, coverage, Some(start))?,
        None => latest,
    };

    Ok(TimeRange::new(start, end))
}

/// Truncate to the start of the hour.
pub fn floor_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt - Duration::seconds((dt.minute() * 60 + dt.second()) as i64)
        - Duration::nanoseconds(dt.nanosecond() as i64)
}

fn envelope(coverage: &[TimeRange]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let earliest = coverage.iter().map(|r| r.start).min();
    let latest = coverage.iter().map(|r| r.end).max();
    match (earliest, latest) {
        (Some(earliest), Some(latest)) => Ok((earliest, latest)),
        _ => Err(ConvertError::Validation(
            "no raw files to resolve times against".to_string(),
        )),
    }
}

fn check_in_envelope(
    dt: DateTime<Utc>,
    boundary: Boundary,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let inside = match boundary {
        Boundary::Start => dt >= earliest && dt < latest,
        Boundary::End => dt > earliest && dt <= latest,
    };
    if inside {
        Ok(dt)
    } else {
        Err(ConvertError::Validation(format!(
            "{} is outside the raw data coverage {} - {}",
            dt.format("%Y-%m-%d %H:%M:%S"),
            earliest.format("%Y-%m-%d %H:%M:%S"),
            latest.format("%Y-%m-%d %H:%M:%S"),
        )))
    }
}

fn is_covered(dt: DateTime<Utc>, boundary: Boundary, coverage: &[TimeRange]) -> bool {
    coverage.iter().any(|r| match boundary {
        Boundary::Start => r.contains(&dt),
        Boundary::End => r.contains_end(&dt),
    })
}

fn resolve_date(date: NaiveDate, boundary: Boundary, coverage: &[TimeRange]) -> Result<DateTime<Utc>> {
    let day_start = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
    let day = TimeRange::new(day_start, day_start + Duration::days(1));

    let on_day = coverage.iter().filter(|r| r.intersects(&day));
    let resolved = match boundary {
        Boundary::Start => on_day.map(|r| r.start.max(day.start)).min(),
        Boundary::End => on_day.map(|r| r.end.min(day.end)).max(),
    };

    resolved.ok_or_else(|| {
        ConvertError::Validation(format!("no raw data on {}", date.format("%Y-%m-%d")))
    })
}

fn resolve_minute(
    minute: u32,
    boundary: Boundary,
    coverage: &[TimeRange],
    after: Option<DateTime<Utc>>,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let anchor = match boundary {
        Boundary::Start => earliest,
        Boundary::End => after.unwrap_or(earliest),
    };

    let mut candidate = floor_hour(anchor) + Duration::minutes(minute as i64);
    let too_early = |c: DateTime<Utc>| match boundary {
        Boundary::Start => c < anchor,
        Boundary::End => c <= anchor,
    };
    if too_early(candidate) {
        candidate += Duration::hours(1);
    }

    while candidate <= latest {
        if is_covered(candidate, boundary, coverage) {
            return Ok(candidate);
        }
        candidate += Duration::hours(1);
    }

    Err(ConvertError::Validation(format!(
        "no raw data at minute {:02} of any hour after {}",
        minute,
        anchor.format("%Y-%m-%d %H:%M")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, d, h, m, 0).unwrap()
    }

    fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
        TimeRange::new(start, end)
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "2023-05-01_08:30".parse::<TimeSpec>().unwrap(),
            TimeSpec::Absolute(at(1, 8, 30))
        );
        assert_eq!(
            "2023-05-01T08:30:00Z".parse::<TimeSpec>().unwrap(),
            TimeSpec::Absolute(at(1, 8, 30))
        );
        assert_eq!(
            "2023-05-01 08:30".parse::<TimeSpec>().unwrap(),
            TimeSpec::Absolute(at(1, 8, 30))
        );
        assert_eq!(
            "2023-05-01".parse::<TimeSpec>().unwrap(),
            TimeSpec::Date(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap())
        );
        assert_eq!("XX:30".parse::<TimeSpec>().unwrap(), TimeSpec::RelativeMinute(30));
        assert_eq!(
            "12:00".parse::<TimeSpec>().unwrap(),
            TimeSpec::TimeOfDay(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for input in ["26:00", "XX:70", "1996-13-14_00:01", "1996/13/14 00:01", "00-01", "XX:5", ""] {
            assert!(
                matches!(input.parse::<TimeSpec>(), Err(ConvertError::Validation(_))),
                "{} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_relative_minute_first_available() {
        let coverage = [
            range(at(1, 8, 0), at(1, 8, 30)),
            range(at(1, 8, 30), at(1, 9, 15)),
            range(at(1, 9, 15), at(1, 10, 0)),
        ];
        let spec = TimeSpec::RelativeMinute(30);
        assert_eq!(spec.resolve(Boundary::Start, &coverage, None).unwrap(), at(1, 8, 30));
    }

    #[test]
    fn test_relative_minute_rolls_to_next_hour() {
        let coverage = [range(at(1, 1, 23), at(1, 23, 0))];
        let spec = TimeSpec::RelativeMinute(0);
        assert_eq!(spec.resolve(Boundary::Start, &coverage, None).unwrap(), at(1, 2, 0));
    }

    #[test]
    fn test_relative_minute_skips_gaps() {
        let coverage = [
            range(at(1, 8, 0), at(1, 8, 20)),
            range(at(1, 9, 0), at(1, 10, 0)),
        ];
        let spec = TimeSpec::RelativeMinute(30);
        assert_eq!(spec.resolve(Boundary::Start, &coverage, None).unwrap(), at(1, 9, 30));
    }

    #[test]
    fn test_relative_minute_without_match() {
        let coverage = [range(at(1, 8, 0), at(1, 8, 20))];
        assert!(TimeSpec::RelativeMinute(30)
            .resolve(Boundary::Start, &coverage, None)
            .is_err());
    }

    #[test]
    fn test_relative_end_is_after_start() {
        let coverage = [range(at(1, 8, 0), at(1, 12, 0))];
        let spec = TimeSpec::RelativeMinute(30);
        assert_eq!(
            spec.resolve(Boundary::End, &coverage, Some(at(1, 8, 30))).unwrap(),
            at(1, 9, 30)
        );
    }

    #[test]
    fn test_time_of_day_uses_coverage_dates() {
        let coverage = [range(at(1, 1, 23), at(2, 23, 0))];
        let noon = TimeSpec::TimeOfDay(NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(noon.resolve(Boundary::Start, &coverage, None).unwrap(), at(1, 12, 0));
        assert_eq!(noon.resolve(Boundary::End, &coverage, None).unwrap(), at(2, 12, 0));
    }

    #[test]
    fn test_date_resolves_to_available_instants() {
        let coverage = [
            range(at(1, 22, 0), at(2, 3, 0)),
            range(at(2, 20, 0), at(2, 21, 30)),
        ];
        let date = TimeSpec::Date(NaiveDate::from_ymd_opt(2023, 5, 2).unwrap());
        assert_eq!(date.resolve(Boundary::Start, &coverage, None).unwrap(), at(2, 0, 0));
        assert_eq!(date.resolve(Boundary::End, &coverage, None).unwrap(), at(2, 21, 30));

        let missing = TimeSpec::Date(NaiveDate::from_ymd_opt(2023, 5, 5).unwrap());
        assert!(missing.resolve(Boundary::Start, &coverage, None).is_err());
    }

    #[test]
    fn test_absolute_outside_coverage() {
        let coverage = [range(at(1, 8, 0), at(1, 10, 0))];
        assert!(TimeSpec::Absolute(at(1, 11, 0))
            .resolve(Boundary::Start, &coverage, None)
            .is_err());
        assert_eq!(
            TimeSpec::Absolute(at(1, 10, 0))
                .resolve(Boundary::End, &coverage, None)
                .unwrap(),
            at(1, 10, 0)
        );
    }

    #[test]
    fn test_resolve_range_defaults_and_rounding() {
        let coverage = [range(at(1, 8, 17), at(1, 10, 0))];

        let full = resolve_range(None, None, &coverage, false).unwrap();
        assert_eq!(full, range(at(1, 8, 17), at(1, 10, 0)));

        let rounded = resolve_range(None, None, &coverage, true).unwrap();
        assert_eq!(rounded.start, at(1, 8, 0));

        let end = TimeSpec::RelativeMinute(0);
        assert!(resolve_range(None, Some(&end), &coverage, false).is_err());
    }

    #[test]
    fn test_empty_coverage() {
        assert!(resolve_range(None, None, &[], false).is_err());
    }
}
