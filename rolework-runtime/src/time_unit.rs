use std::time::Duration;

use crate::error::{Result, RoleworkError};

/// Time unit used when reading interval settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn to_millis(&self, value: u64) -> u64 {
        match self {
            TimeUnit::Milliseconds => value,
            TimeUnit::Seconds => value.saturating_mul(1000),
            TimeUnit::Minutes => value.saturating_mul(60_000),
            TimeUnit::Hours => value.saturating_mul(3_600_000),
            TimeUnit::Days => value.saturating_mul(86_400_000),
        }
    }

    pub fn to_duration(&self, value: u64) -> Duration {
        Duration::from_millis(self.to_millis(value))
    }

    /// Parse a duration string like "5s", "10m", "2h", "500ms"
    /// Returns (value, TimeUnit) if successful
    ///
    /// Only lowercase suffixes are accepted and no space is allowed between
    /// the number and the suffix.
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

    /// Resolve a setting value into a non-zero `Duration`.
    ///
    /// Shorthand ("30s") wins; a bare integer is read in `bare_unit`.
    pub fn resolve(value: &str, bare_unit: TimeUnit) -> Result<Duration> {
        let duration = if let Some((amount, unit)) = Self::parse_duration(value) {
            unit.to_duration(amount)
        } else {
            let amount = value
                .trim()
                .parse::<u64>()
                .map_err(|_| RoleworkError::InvalidDuration(value.to_string()))?;
            bare_unit.to_duration(amount)
        };

        if duration.is_zero() {
            return Err(RoleworkError::InvalidDuration(value.to_string()));
        }
        Ok(duration)
    }
}
