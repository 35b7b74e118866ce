use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};

/// Time unit used by duration strings in task declarations and configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// `None` when the result does not fit in a `u64`.
    pub fn to_millis(&self, value: u64) -> Option<u64> {
        let factor = match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        };
        value.checked_mul(factor)
    }

    /// Parse a duration string like "5s", "10m", "2h", "500ms"
    /// Returns (value, TimeUnit) if successful
    ///
    /// Strict rules:
    /// - Only lowercase suffixes are accepted: "ms", "s", "m", "h", "d"
    /// - Format must be: <number><suffix> (e.g., "5s", "100ms")
    /// - No spaces allowed between number and suffix
    pub fn parse_duration(s: &str) -> Option<(u64, TimeUnit)> {
        let s = s.trim();

        let split_pos = s.find(|c: char| !c.is_ascii_digit())?;
        if split_pos == 0 {
            return None;
        }

        let (num_str, unit_str) = s.split_at(split_pos);
        let value = num_str.parse::<u64>().ok()?;

        let time_unit = match unit_str {
            "ms" => TimeUnit::Milliseconds,
            "s" => TimeUnit::Seconds,
            "m" => TimeUnit::Minutes,
            "h" => TimeUnit::Hours,
            "d" => TimeUnit::Days,
            _ => return None,
        };

        Some((value, time_unit))
    }
}

/// Parse "30s"-style shorthand, or a bare integer taken as milliseconds.
pub fn parse_duration_str(s: &str) -> SchedulerResult<Duration> {
    if let Some((value, unit)) = TimeUnit::parse_duration(s) {
        return unit
            .to_millis(value)
            .map(Duration::from_millis)
            .ok_or_else(|| SchedulerError::InvalidDuration(format!("{s} is out of range")));
    }
    s.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| SchedulerError::InvalidDuration(s.to_string()))
}
