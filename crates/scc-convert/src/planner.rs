//! Splits a resolved time range into output windows.

use chrono::{DateTime, Duration, Utc};
use lidar_common::TimeWindow;

use crate::error::{ConvertError, Result};

/// Plan the windows covering `[start, end)`.
///
/// Every window is `interval` long except possibly the last one. Without an
/// interval the whole range is a single window. Windows are not clipped at
/// day boundaries.
pub fn plan_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Option<Duration>,
) -> Result<Vec<TimeWindow>> {
    if end <= start {
        return Err(ConvertError::Validation(format!(
            "end {} is not after start {}",
            end.format("%Y-%m-%d %H:%M:%S"),
            start.format("%Y-%m-%d %H:%M:%S")
        )));
    }

    let interval = match interval {
        None => return Ok(vec![TimeWindow::new(start, end)?]),
        Some(interval) if interval <= Duration::zero() => {
            return Err(ConvertError::Validation(format!(
                "interval must be positive, got {} s",
                interval.num_seconds()
            )))
        }
        Some(interval) => interval,
    };

    let mut windows = Vec::new();
    let mut window_start = start;
    while window_start < end {
        let window_end = (window_start + interval).min(end);
        windows.push(TimeWindow::new(window_start, window_end)?);
        window_start = window_end;
    }

    Ok(windows)
}
