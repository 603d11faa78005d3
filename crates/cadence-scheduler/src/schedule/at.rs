use cadence_core::DateFormat;
use chrono::{DateTime, Utc};

use super::Schedule;
use crate::error::{Result, SchedulerError};

pub const TYPE: &str = "at";

/// Fires at a fixed list of instants, separated by `;` in the configuration.
#[derive(Debug, Clone)]
pub struct AtSchedule {
    format: DateFormat,
    config: String,
    /// Sorted ascending.
    run_times: Vec<DateTime<Utc>>,
}

impl AtSchedule {
    pub fn new(format: DateFormat, config: &str) -> Result<Self> {
        let run_times = parse_run_times(&format, config)?;
        Ok(Self {
            format,
            config: config.to_string(),
            run_times,
        })
    }

    pub fn run_times(&self) -> &[DateTime<Utc>] {
        &self.run_times
    }
}

fn parse_run_times(format: &DateFormat, config: &str) -> Result<Vec<DateTime<Utc>>> {
    let mut run_times = config
        .split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            format.parse(token).map_err(|e| {
                SchedulerError::InvalidSchedule(format!("invalid date format '{token}': {e}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    run_times.sort_unstable();
    Ok(run_times)
}

impl Schedule for AtSchedule {
    fn schedule_type(&self) -> &'static str {
        TYPE
    }

    fn config(&self) -> &str {
        &self.config
    }

    fn set_config(&mut self, config: &str) -> Result<()> {
        self.run_times = parse_run_times(&self.format, config)?;
        self.config = config.to_string();
        Ok(())
    }

    fn at_startup(&self) -> bool {
        false
    }

    fn next_run_time(
        &self,
        now: DateTime<Utc>,
        _last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let idx = self.run_times.partition_point(|t| *t <= now);
        self.run_times.get(idx).copied()
    }
}
