use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{SchedulerError, SchedulerResult};

/// Parsed cron expression, evaluated in UTC.
///
/// Accepts the six/seven field syntax with a leading seconds column,
/// e.g. `"0 30 9 * * Mon-Fri"`.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Next fire time strictly after `from`, or `None` once the schedule is exhausted.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_is_strictly_after() {
        let schedule = CronSchedule::parse("0 * * * * *").unwrap();
        let on_tick = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let next = schedule.next_after(on_tick).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 16, 0).unwrap());
    }

    #[test]
    fn test_finite_schedule_exhausts() {
        let schedule = CronSchedule::parse("0 0 0 1 1 * 2020").unwrap();
        let from = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert!(schedule.next_after(from).is_none());
    }

    #[test]
    fn test_invalid_expression() {
        let err = CronSchedule::parse("every tuesday").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }
}
