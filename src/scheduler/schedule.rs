//! Recurrence of scheduled tasks
//!
//! A schedule is a fixed interval. Accepted forms:
//! - `@every <n><unit>` or `<n><unit>`, unit one of `s`, `m`, `h`, `d`
//! - `@hourly`, `@daily`, `@weekly`
//!
//! Cron expressions are rejected rather than approximated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest accepted interval (ten years)
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid schedule '{expression}': {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

/// A fixed-interval recurrence, kept with the expression it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    expression: String,
    every_secs: u64,
}

impl Schedule {
    /// Builds a schedule directly from an interval
    pub fn every(interval: Duration) -> Result<Self, ScheduleError> {
        let secs = interval.as_secs();
        let expression = format!("@every {}s", secs);
        Self::checked(expression, secs)
    }

    fn checked(expression: String, secs: u64) -> Result<Self, ScheduleError> {
        if secs == 0 {
            return Err(ScheduleError {
                expression,
                reason: "interval must be at least one second".to_string(),
            });
        }
        if secs > MAX_INTERVAL_SECS {
            return Err(ScheduleError {
                expression,
                reason: "interval is too long".to_string(),
            });
        }
        Ok(Self {
            expression,
            every_secs: secs,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.every_secs)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The next run after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        // every_secs is bounded by MAX_INTERVAL_SECS, so the cast is lossless
        after + chrono::Duration::seconds(self.every_secs as i64)
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let expression = raw.trim().to_string();
        let error = |reason: &str| ScheduleError {
            expression: expression.clone(),
            reason: reason.to_string(),
        };

        let secs = match expression.to_ascii_lowercase().as_str() {
            "@hourly" => 3600,
            "@daily" => 24 * 3600,
            "@weekly" => 7 * 24 * 3600,
            other => {
                let spec = other
                    .strip_prefix("@every")
                    .map(str::trim)
                    .unwrap_or(other);

                if spec.contains(char::is_whitespace) || spec.contains('*') {
                    return Err(error(
                        "cron expressions are not supported, use '@every <n><s|m|h|d>'",
                    ));
                }

                let split = spec
                    .find(|c: char| !c.is_ascii_digit())
                    .ok_or_else(|| error("missing unit (s, m, h or d)"))?;
                let (count, unit) = spec.split_at(split);
                let count: u64 = count.parse().map_err(|_| error("missing interval count"))?;

                let unit_secs = match unit {
                    "s" => 1,
                    "m" => 60,
                    "h" => 3600,
                    "d" => 24 * 3600,
                    _ => return Err(error("unit must be one of s, m, h, d")),
                };

                count
                    .checked_mul(unit_secs)
                    .ok_or_else(|| error("interval is too long"))?
            }
        };

        Self::checked(expression, secs)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.expression
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_forms() {
        let cases = [
            ("@every 30s", 30),
            ("@every 5m", 300),
            ("2h", 7200),
            ("1d", 86400),
            ("@hourly", 3600),
            ("@DAILY", 86400),
            ("@weekly", 604800),
        ];
        for (raw, secs) in cases {
            let schedule: Schedule = raw.parse().unwrap();
            assert_eq!(schedule.interval(), Duration::from_secs(secs), "{}", raw);
        }
    }

    #[test]
    fn test_rejects_cron_and_garbage() {
        for raw in ["*/5 * * * *", "0 0 * * *", "", "@every", "10", "5x", "@every 0s", "@monthly"] {
            assert!(raw.parse::<Schedule>().is_err(), "{}", raw);
        }
    }

    #[test]
    fn test_rejects_overflowing_interval() {
        assert!("99999999999999999d".parse::<Schedule>().is_err());
        assert!("4000d".parse::<Schedule>().is_err());
    }

    #[test]
    fn test_next_after_adds_interval() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule: Schedule = "@every 90m".parse().unwrap();
        assert_eq!(
            schedule.next_after(at),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_serde_keeps_expression() {
        let schedule: Schedule = "@daily".parse().unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "\"@daily\"");

        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
        assert!(serde_json::from_str::<Schedule>("\"0 * * * *\"").is_err());
    }

    #[test]
    fn test_every_constructor() {
        let schedule = Schedule::every(Duration::from_secs(45)).unwrap();
        assert_eq!(schedule.expression(), "@every 45s");
        assert!(Schedule::every(Duration::ZERO).is_err());
    }
}
