use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel for "no run count limit".
pub const UNLIMITED_RUNS: i64 = -1;

/// Flat, storable snapshot of a job descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub schedule_type: String,
    pub schedule_config: String,
    /// Registered job type identifier.
    pub job_type: String,
    pub argument: Option<String>,
    pub run_count: i64,
    /// [`UNLIMITED_RUNS`] or the maximum number of runs.
    pub run_count_limit: i64,
    pub last_run_time: Option<DateTime<Utc>>,
    /// Inclusive.
    pub run_time_limit_start: Option<DateTime<Utc>>,
    /// Exclusive.
    pub run_time_limit_end: Option<DateTime<Utc>>,
    pub auto_clean: bool,
    pub reentrant: bool,
    pub enabled: bool,
}

impl JobRecord {
    /// A fresh, never-run, disabled job with no limits.
    pub fn new(
        name: impl Into<String>,
        schedule_type: impl Into<String>,
        schedule_config: impl Into<String>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule_type: schedule_type.into(),
            schedule_config: schedule_config.into(),
            job_type: job_type.into(),
            argument: None,
            run_count: 0,
            run_count_limit: UNLIMITED_RUNS,
            last_run_time: None,
            run_time_limit_start: None,
            run_time_limit_end: None,
            auto_clean: false,
            reentrant: false,
            enabled: false,
        }
    }
}

/// Operational status of a job, as shown to administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Disabled,
    /// Enabled and waiting in the queue.
    Scheduled,
    /// At least one instance executing.
    Running,
    /// Enabled but with no further fire time.
    Idle,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Disabled => "disabled",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Idle => "idle",
        };
        write!(f, "{s}")
    }
}
