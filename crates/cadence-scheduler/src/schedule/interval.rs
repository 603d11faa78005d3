use chrono::{DateTime, Duration, Utc};

use super::Schedule;
use crate::error::{Result, SchedulerError};

pub const TYPE: &str = "interval";

/// Fires every `<n> <unit>` (unit one of `s`, `m`, `h`, `d`) after the last
/// run. A job that never ran waits one full interval before its first run.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    config: String,
    interval: Duration,
}

impl IntervalSchedule {
    pub fn new(config: &str) -> Result<Self> {
        Ok(Self {
            config: config.to_string(),
            interval: parse_interval(config)?,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

fn parse_interval(config: &str) -> Result<Duration> {
    let invalid = || {
        SchedulerError::InvalidSchedule(format!(
            "'{config}' does not match '<number> <s|m|h|d>'"
        ))
    };
    let (count, unit) = config.split_once(' ').ok_or_else(invalid)?;
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let count: i64 = count.parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "interval '{config}' must be positive"
        )));
    }
    let seconds_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    count
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("interval '{config}' is too large")))
}

impl Schedule for IntervalSchedule {
    fn schedule_type(&self) -> &'static str {
        TYPE
    }

    fn config(&self) -> &str {
        &self.config
    }

    fn set_config(&mut self, config: &str) -> Result<()> {
        self.interval = parse_interval(config)?;
        self.config = config.to_string();
        Ok(())
    }

    fn at_startup(&self) -> bool {
        false
    }

    fn next_run_time(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        last_run.unwrap_or(now).checked_add_signed(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_convert_to_durations() {
        assert_eq!(IntervalSchedule::new("30 s").unwrap().interval(), Duration::seconds(30));
        assert_eq!(IntervalSchedule::new("5 m").unwrap().interval(), Duration::minutes(5));
        assert_eq!(IntervalSchedule::new("2 h").unwrap().interval(), Duration::hours(2));
        assert_eq!(IntervalSchedule::new("1 d").unwrap().interval(), Duration::days(1));
    }

    #[test]
    fn first_run_is_deferred_by_one_interval() {
        let schedule = IntervalSchedule::new("5 m").unwrap();
        let now = Utc::now();
        assert_eq!(schedule.next_run_time(now, None), Some(now + Duration::minutes(5)));
    }

    #[test]
    fn next_run_counts_from_last_run() {
        let schedule = IntervalSchedule::new("10 s").unwrap();
        let now = Utc::now();
        let last = now - Duration::seconds(3);
        assert_eq!(schedule.next_run_time(now, Some(last)), Some(last + Duration::seconds(10)));
    }

    #[test]
    fn malformed_configs_are_rejected() {
        for config in ["", "5", "5m", "5  m", "-5 m", "0 s", "5 w", "five m", "5 m ", " 5 m"] {
            assert!(
                matches!(IntervalSchedule::new(config), Err(SchedulerError::InvalidSchedule(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(IntervalSchedule::new("99999999999999999 d").is_err());
    }
}
