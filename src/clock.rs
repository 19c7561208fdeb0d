//! Conversion between raw seconds and an hours/minutes/seconds breakdown.

use std::fmt;
use std::time::Duration;

use crate::errors::TimerError;

const SECONDS_PER_MINUTE: f64 = 60.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: u64 = 24;

/// Validates a raw seconds value at an API boundary.
///
/// Negative and non-finite values are rejected here so that
/// [`to_clock_parts`] never has to deal with them.
pub fn checked_seconds(value: f64) -> Result<f64, TimerError> {
    if !value.is_finite() {
        return Err(TimerError::InvalidParameter(format!(
            "Seconds must be a finite number, got {value}."
        )));
    }
    if value < 0.0 {
        return Err(TimerError::InvalidParameter(format!(
            "Seconds must not be negative, got {value}."
        )));
    }
    Ok(value)
}

/// A duration broken down into hours, minutes and fractional seconds.
///
/// `hours` is not capped at 24; use [`ClockParts::split_days`] when a
/// day rollover is wanted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockParts {
    /// Whole hours; not capped at 24.
    pub hours: u64,
    /// Whole minutes, `0..60`.
    pub minutes: u64,
    /// Remaining seconds including the fraction, `0.0..60.0`.
    pub seconds: f64,
}

/// Decomposes a non-negative, finite number of seconds.
pub fn to_clock_parts(seconds: f64) -> ClockParts {
    debug_assert!(seconds.is_finite() && seconds >= 0.0);

    let total_minutes = (seconds / SECONDS_PER_MINUTE).floor();
    let secs = (seconds - total_minutes * SECONDS_PER_MINUTE).max(0.0);
    let hours = (total_minutes / MINUTES_PER_HOUR).floor();
    let minutes = total_minutes - hours * MINUTES_PER_HOUR;

    ClockParts {
        hours: hours as u64,
        minutes: minutes as u64,
        seconds: secs,
    }
}

impl ClockParts {
    /// Recomposes the parts into a raw seconds count.
    pub fn total_seconds(&self) -> f64 {
        (self.hours as f64 * MINUTES_PER_HOUR + self.minutes as f64) * SECONDS_PER_MINUTE
            + self.seconds
    }

    /// Splits off whole days, leaving `hours` below 24.
    pub fn split_days(&self) -> (u64, ClockParts) {
        let days = self.hours / HOURS_PER_DAY;
        let rest = ClockParts {
            hours: self.hours % HOURS_PER_DAY,
            ..*self
        };
        (days, rest)
    }

    /// Converts back into a [`Duration`].
    pub fn to_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_seconds())
    }
}

impl From<Duration> for ClockParts {
    fn from(duration: Duration) -> Self {
        to_clock_parts(duration.as_secs_f64())
    }
}

impl fmt::Display for ClockParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:09.6}",
            self.hours, self.minutes, self.seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(value: f64) {
        let parts = to_clock_parts(value);
        assert!(
            (parts.total_seconds() - value).abs() < 1e-6,
            "{value} decomposed to {parts:?}"
        );
        assert!(parts.minutes < 60);
        assert!(parts.seconds >= 0.0 && parts.seconds < 60.0);
    }

    #[test]
    fn decomposes_representative_values() {
        assert_eq!(
            to_clock_parts(3725.5),
            ClockParts {
                hours: 1,
                minutes: 2,
                seconds: 5.5
            }
        );
        assert_eq!(to_clock_parts(59.0).minutes, 0);
        assert_eq!(to_clock_parts(60.0).minutes, 1);
        assert_eq!(to_clock_parts(60.0).seconds, 0.0);
    }

    #[test]
    fn round_trips_boundary_and_large_values() {
        for value in [0.0, 0.001, 0.5, 1.0, 59.999, 60.0, 3599.9, 3600.0, 3601.25, 90061.75] {
            assert_round_trip(value);
        }
    }

    #[test]
    fn round_trips_random_values() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..1_000 {
            let value = rng.f64() * 200_000.0;
            assert_round_trip(value);
        }
    }

    #[test]
    fn splits_days() {
        let (days, rest) = to_clock_parts(2.0 * 86_400.0 + 3_661.0).split_days();
        assert_eq!(days, 2);
        assert_eq!(rest.hours, 1);
        assert_eq!(rest.minutes, 1);
        assert_eq!(rest.seconds, 1.0);
    }

    #[test]
    fn formats_like_a_clock() {
        assert_eq!(to_clock_parts(3.5).to_string(), "00:00:03.500000");
        assert_eq!(to_clock_parts(36_125.0).to_string(), "10:02:05.000000");
    }

    #[test]
    fn converts_from_duration() {
        let parts = ClockParts::from(Duration::from_millis(61_250));
        assert_eq!(parts.minutes, 1);
        assert!((parts.seconds - 1.25).abs() < 1e-9);
        assert_eq!(parts.to_duration(), Duration::from_millis(61_250));
    }

    #[test]
    fn rejects_bad_input_at_the_boundary() {
        assert!(checked_seconds(-1.0).is_err());
        assert!(checked_seconds(f64::NAN).is_err());
        assert!(checked_seconds(f64::INFINITY).is_err());
        assert_eq!(checked_seconds(2.5), Ok(2.5));
    }
}
