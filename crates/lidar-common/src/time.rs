//! Time intervals used for raw file coverage and output windows.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LidarError, LidarResult};

/// Half-open time range `[start, end)` covered by a raw measurement file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True if `dt` lies inside `[start, end)`.
    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt < &self.end
    }

    /// True if `dt` lies inside `(start, end]`, i.e. is usable as an exclusive end bound.
    pub fn contains_end(&self, dt: &DateTime<Utc>) -> bool {
        dt > &self.start && dt <= &self.end
    }

    /// True if the two half-open ranges share at least one instant.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// One output window `[start, end)`.
///
/// Invariant: `start < end`. Construct through [`TimeWindow::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> LidarResult<Self> {
        if start >= end {
            return Err(LidarError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt < &self.end
    }

    pub fn as_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    pub fn intersects(&self, range: &TimeRange) -> bool {
        self.as_range().intersects(range)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.date_naive() == self.end.date_naive() {
            write!(
                f,
                "{} {}-{}",
                self.start.format("%Y-%m-%d"),
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )
        } else {
            write!(
                f,
                "{} - {}",
                self.start.format("%Y-%m-%d %H:%M"),
                self.end.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_window_rejects_empty_interval() {
        assert!(TimeWindow::new(at(8, 0), at(8, 0)).is_err());
        assert!(TimeWindow::new(at(9, 0), at(8, 0)).is_err());
    }

    #[test]
    fn test_window_is_half_open() {
        let window = TimeWindow::new(at(8, 0), at(8, 30)).unwrap();
        assert!(window.contains(&at(8, 0)));
        assert!(window.contains(&at(8, 29)));
        assert!(!window.contains(&at(8, 30)));
    }

    #[test]
    fn test_range_intersection_excludes_touching_edges() {
        let a = TimeRange::new(at(8, 0), at(9, 0));
        let b = TimeRange::new(at(9, 0), at(10, 0));
        let c = TimeRange::new(at(8, 30), at(9, 30));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }

    #[test]
    fn test_window_display() {
        let window = TimeWindow::new(at(8, 0), at(8, 30)).unwrap();
        assert_eq!(window.to_string(), "2023-05-01 08:00-08:30");
    }
}
