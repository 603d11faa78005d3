//! Schedule evaluators.
//!
//! | Type       | Config example              | Behaviour                              |
//! |------------|-----------------------------|----------------------------------------|
//! | `at`       | `2024-01-01 10:00;2024-02-01 10:00` | Fixed instants, fired in order |
//! | `interval` | `5 m`                       | Every N s/m/h/d after the last run     |
//! | `cron`     | `*/15 9-17 * * mon-fri`     | Calendar field matching, `@special`    |

use std::collections::BTreeMap;
use std::fmt;

use cadence_core::DateFormat;
use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

pub mod at;
pub mod cron;
pub mod interval;

pub use at::AtSchedule;
pub use cron::CronSchedule;
pub use interval::IntervalSchedule;

/// Computes when a job should run next.
///
/// `next_run_time` must be a pure function of its arguments and the parsed
/// configuration.
pub trait Schedule: Send + Sync + fmt::Debug {
    /// Registered type name, e.g. `"cron"`.
    fn schedule_type(&self) -> &'static str;

    /// The textual configuration this schedule was parsed from.
    fn config(&self) -> &str;

    /// Replace the configuration. On error the schedule is left unchanged.
    fn set_config(&mut self, config: &str) -> Result<()>;

    /// Whether the job should fire once when the scheduler starts.
    fn at_startup(&self) -> bool;

    /// First fire time after `now`, or `None` when the schedule is exhausted.
    fn next_run_time(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>>;
}

/// Builds a schedule of one type from its configuration string.
pub type ScheduleFactory = Box<dyn Fn(&str) -> Result<Box<dyn Schedule>> + Send + Sync>;

/// Schedule types known to a scheduler, keyed by type name.
pub struct ScheduleFactories {
    factories: BTreeMap<&'static str, ScheduleFactory>,
}

impl ScheduleFactories {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `at`, `interval` and `cron` types.
    pub fn with_defaults(format: &DateFormat) -> Self {
        let mut factories = Self::new();
        let at_format = format.clone();
        factories.register(at::TYPE, move |config| {
            Ok(Box::new(AtSchedule::new(at_format.clone(), config)?) as Box<dyn Schedule>)
        });
        factories.register(interval::TYPE, |config| {
            Ok(Box::new(IntervalSchedule::new(config)?) as Box<dyn Schedule>)
        });
        let zone = format.zone();
        factories.register(cron::TYPE, move |config| {
            Ok(Box::new(CronSchedule::new(config, zone)?) as Box<dyn Schedule>)
        });
        factories
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn Schedule>> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Parse `config` with the factory registered for `schedule_type`.
    pub fn create(&self, schedule_type: &str, config: &str) -> Result<Box<dyn Schedule>> {
        let factory = self.factories.get(schedule_type).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!(
                "schedule factory for type '{schedule_type}' not registered"
            ))
        })?;
        factory(config)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for ScheduleFactories {
    fn default() -> Self {
        Self::with_defaults(&DateFormat::default())
    }
}

impl fmt::Debug for ScheduleFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleFactories")
            .field("types", &self.types())
            .finish()
    }
}
