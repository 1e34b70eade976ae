//! Display decomposition of durations

use serde::{Deserialize, Serialize};
use std::fmt;

const CENTIS_PER_MINUTE: u64 = 60 * 100;
const CENTIS_PER_HOUR: u64 = 60 * CENTIS_PER_MINUTE;
const CENTIS_PER_DAY: u64 = 24 * CENTIS_PER_HOUR;

/// A duration split into days, hours, minutes and seconds
///
/// Computed on whole centiseconds, so the seconds component is rounded to
/// two decimals and carries into minutes instead of ever reading `60.00`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationBreakdown {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: f64,
}

impl DurationBreakdown {
    pub fn from_secs(secs: f64) -> Self {
        let centis = if secs.is_finite() && secs > 0.0 {
            (secs * 100.0).round() as u64
        } else {
            0
        };

        let days = centis / CENTIS_PER_DAY;
        let rem = centis % CENTIS_PER_DAY;
        let hours = rem / CENTIS_PER_HOUR;
        let rem = rem % CENTIS_PER_HOUR;
        let minutes = rem / CENTIS_PER_MINUTE;
        let seconds = (rem % CENTIS_PER_MINUTE) as f64 / 100.0;

        Self {
            days,
            hours,
            minutes,
            seconds,
        }
    }

    /// Total represented by the breakdown, in seconds
    pub fn total_secs(&self) -> f64 {
        (self.days * 86_400 + self.hours * 3_600 + self.minutes * 60) as f64 + self.seconds
    }
}

impl fmt::Display for DurationBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}d {}h {}m {:.2}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// A duration statistic in raw seconds plus its display breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationValue {
    pub seconds: f64,
    pub breakdown: DurationBreakdown,
}

impl DurationValue {
    pub fn from_secs(seconds: f64) -> Self {
        Self {
            seconds,
            breakdown: DurationBreakdown::from_secs(seconds),
        }
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2} seconds)", self.breakdown, self.seconds)
    }
}
