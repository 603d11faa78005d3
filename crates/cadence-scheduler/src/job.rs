use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};

/// A unit of work the scheduler can run.
///
/// One implementation may back many jobs; each job passes its own
/// [`JobContext::argument`].
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;

    /// Extra termination hook called after the job's cancellation token has
    /// been cancelled, for implementations that cannot poll the token.
    fn terminate(&self, _job_name: &str) {}
}

/// Per-invocation data handed to [`Job::run`].
#[derive(Debug, Clone)]
pub struct JobContext {
    pub name: String,
    pub argument: Option<String>,
    /// 1-based number of this run.
    pub run_count: i64,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        name: impl Into<String>,
        argument: Option<String>,
        run_count: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            argument,
            run_count,
            started_at: Utc::now(),
            cancel,
        }
    }

    /// True once the job has been asked to stop (e.g. it was disabled).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job has been asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Job implementations keyed by job type identifier.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, job: impl Job + 'static) -> &mut Self {
        self.jobs.insert(job_type.into(), Arc::new(job));
        self
    }

    /// Look up a job implementation; unknown types are configuration errors.
    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn Job>> {
        self.jobs
            .get(job_type)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJobType {
                job_type: job_type.to_string(),
            })
    }

    pub fn job_types(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
