//! `cadence-core`: configuration, date formatting and time zone handling
//! shared by the scheduler and the daemon.

pub mod config;
pub mod error;
pub mod time;

pub use config::{CadenceConfig, JobDefinition, SchedulerSettings, StoreKind};
pub use error::{CoreError, Result};
pub use time::{DateFormat, Zone};
