//! Worker execution facility.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

use crate::error::{Result, SchedulerError};

/// A named unit of asynchronous work.
pub trait Task: Send + 'static {
    /// Diagnostic name, used for the task's tracing span.
    fn name(&self) -> String;

    fn process(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Executes tasks on behalf of the scheduler.
pub trait WorkerPool: Send + Sync {
    /// Run a short-lived task (a job run).
    fn run_worker(&self, task: Box<dyn Task>);

    /// Run a long-lived background task (the timekeeping loop).
    fn run_daemon(&self, task: Box<dyn Task>);
}

/// Pool backed by the tokio runtime it was created on.
///
/// At most `max_workers` worker tasks execute at once; the rest wait for a
/// permit. Daemon tasks are not counted.
#[derive(Debug, Clone)]
pub struct TokioWorkerPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
}

impl TokioWorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(SchedulerError::Worker(
                "max_workers must be at least 1".into(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| SchedulerError::Worker(format!("no tokio runtime available: {e}")))?;
        Ok(Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_workers)),
        })
    }

    /// Worker permits currently free.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

impl WorkerPool for TokioWorkerPool {
    fn run_worker(&self, task: Box<dyn Task>) {
        let span = info_span!("worker", task = %task.name());
        let permits = self.permits.clone();
        self.runtime.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!("worker pool closed, task dropped");
                    return;
                };
                task.process().await;
            }
            .instrument(span),
        );
    }

    fn run_daemon(&self, task: Box<dyn Task>) {
        let span = info_span!("daemon", task = %task.name());
        self.runtime.spawn(task.process().instrument(span));
    }
}
